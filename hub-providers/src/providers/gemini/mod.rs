//! Gemini (Google) provider adapter.

mod completion;
mod types;

pub use completion::GeminiAdapter;
