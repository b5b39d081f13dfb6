// Generation: prompt templates, the provider/parameter policy table, and the
// service that runs one use case against one provider call.
// All provider traffic goes through llm_client; nothing here talks HTTP directly.

pub mod ats;
pub mod handlers;
pub mod policy;
pub mod prompt_builder;
pub mod prompts;
pub mod service;

pub use service::{
    Completion, CoverLetterInput, GenerationContext, GenerationError, GenerationService,
    ResumeInput, ValidationError,
};
