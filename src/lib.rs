pub mod chain;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod llm;
pub mod openai;
pub mod retriever;
pub mod session;
pub mod typewriter;
pub mod utils;
pub mod vector_db;

pub use error::{Error, Result};
