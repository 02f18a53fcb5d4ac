//! docquery — document question answering over a streamed
//! generate-then-verify retry pipeline.
//!
//! The binary in `main.rs` wires these modules together; integration tests
//! drive them directly.

pub mod config;
pub mod error;
pub mod llm;
pub mod logger;
pub mod pipeline;
pub mod server;
pub mod store;
