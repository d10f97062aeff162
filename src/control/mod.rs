//! Control-plane integration: HTTP client and configuration refresh.

pub mod client;
pub mod refresh;

pub use client::ControlPlaneClient;
pub use refresh::{ConfigListener, ConfigRefresh, RefreshOutcome};
