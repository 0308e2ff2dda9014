// Document → plain text → schema-valid structured record.
// All LLM calls go through llm_client; nothing here talks HTTP directly.

pub mod fields;
mod prompts;
pub mod schema;
pub mod text;
