pub mod dto;
pub mod events;
pub mod handlers;
pub mod routes;
pub mod state;
pub mod ws;

pub use events::{Event, EventKind};
pub use routes::create_router;
pub use state::{ApiState, RING_CAPACITY};
