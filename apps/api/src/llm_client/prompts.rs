// Shared prompt fragments used across use cases.
// Each use case defines its own templates in generation/prompts.rs.

/// Appended to every writing prompt. The candidate's history is the only source of truth.
pub const FACTUAL_INSTRUCTION: &str = "\
    Never fabricate experience, skills, employers, dates, or metrics that are not \
    present in the candidate's original material.";

/// Keeps output ready to store as-is: no commentary around the document.
pub const PLAIN_DOCUMENT_INSTRUCTION: &str = "\
    Respond with the finished document only. Do not add explanations, notes, \
    or markdown code fences around it.";
