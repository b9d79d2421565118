//! Document processing: text extraction, chunking, embedding, the background
//! job runner and similarity search over stored chunks.

pub mod chunker;
pub mod embedder;
pub mod extract;
pub mod processor;
pub mod runner;
pub mod search;

pub use processor::Processor;
pub use runner::JobRunner;
