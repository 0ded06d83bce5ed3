pub mod context;
pub mod state_machine;

pub use context::{LifecycleContext, Phase};
pub use state_machine::StateMachine;
