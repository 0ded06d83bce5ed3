pub mod settings;

pub use settings::{Settings, DEFAULT_API_PORT, DEFAULT_HEALTH_PORT};
