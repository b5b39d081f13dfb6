pub mod artifact;
pub mod user;
