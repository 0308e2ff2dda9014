// Prompt fragments shared by every structured-extraction call.
// Kind-specific templates live in extraction/prompts.rs.

/// System prompt fragment that pins the model to the response schema.
pub const JSON_ONLY_SYSTEM: &str = "You extract structured facts from hiring documents. \
    Respond with a single JSON object that matches the provided schema exactly. \
    Use only facts stated in the document; leave optional fields null when absent. \
    Never add commentary, markdown or code fences.";
