//! Concrete completion providers.

pub mod claude;
pub mod ollama;
pub mod openai;
