pub mod content;
pub mod llm;
pub mod pipeline;
