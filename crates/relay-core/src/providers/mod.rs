//! Provider adapter layer
//!
//! The router only sees [`ProviderAdapter`]: prompt in, text out. Timeouts,
//! fallback and rate accounting stay in the router.

pub mod openai_compat;
pub mod types;

pub use openai_compat::OpenAiCompatAdapter;
pub use types::ProviderAdapter;
