//! Claude (Anthropic) provider adapter.

mod client;
mod completion;
mod types;

pub use completion::ClaudeAdapter;
