//! Text splitting and embedding generation.

mod service;
mod splitter;

pub use service::EmbeddingService;
pub use splitter::{RecursiveTextSplitter, TextChunk};
