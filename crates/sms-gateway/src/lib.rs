//! SMS Gateway - multi-tenant SMS reselling on one upstream provider account.
//!
//! This service:
//! - Routes provider pushes to the owning tenant and stores them for polling
//! - Forwards routed messages to tenant endpoints with an HMAC signature
//! - Dispatches outbound sends and charges prepaid credits for every unit

pub mod api;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod forwarder;
pub mod inbound;
pub mod phone;
pub mod routing;

pub use config::Config;
pub use dispatch::{DispatchOutcome, DispatchResult, Dispatcher, UnknownResolution};
pub use error::GatewayError;
pub use inbound::{InboundService, IngestOutcome};
