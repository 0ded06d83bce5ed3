//! Token launch lifecycle monitor
//!
//! Tracks a single project through its fee-collection window, buyback phase
//! and graduation, streaming whale trades and lifecycle snapshots to a live
//! dashboard over REST and a push socket.

pub mod api;
pub mod catalog;
pub mod config;
pub mod contracts;
pub mod machine;
pub mod monitors;
pub mod notify;
pub mod probe;
pub mod rpc;
pub mod utils;
pub mod valuation;

// Re-exports for convenience
pub use api::{ApiState, Event, EventKind};
pub use catalog::{CatalogClient, Project, SelectedProject};
pub use config::Settings;
pub use machine::{LifecycleContext, Phase, StateMachine};
pub use monitors::{BuybackTracker, TaxTracker, WhaleDetector, WhaleTrade};
pub use rpc::{PushClient, RpcPool};
pub use utils::error::{MonitorError, Result};
