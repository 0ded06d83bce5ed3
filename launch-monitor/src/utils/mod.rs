pub mod amounts;
pub mod backoff;
pub mod dedup;
pub mod error;

pub use amounts::{format_display, parse_display, to_display, BASE_TOKEN_DECIMALS};
pub use backoff::Backoff;
pub use dedup::DedupCache;
pub use error::{MonitorError, Result};
