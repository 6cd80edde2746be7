//! shield-common: configuration, errors, telemetry and the detection service
//! client shared by the PII overlay crates.

pub mod client;
pub mod config;
pub mod error;
#[cfg(feature = "telemetry")]
pub mod telemetry;
pub mod wire;

pub use crate::client::{DetectionService, RetryPolicy, ShieldApiClient};
pub use crate::config::{FileStore, Loader, Saver, ShieldConfig};
pub use crate::error::{ApiError, ShieldError};
pub use crate::wire::{DetectionRequest, MaskResponse};
