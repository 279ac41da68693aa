//! Upstream SMS provider client.

mod client;
mod error;
mod types;

pub use client::{ProviderClient, SmsProvider};
pub use error::ProviderError;
pub use types::*;
