pub mod pool;
pub mod push;

pub use pool::{CallError, RpcHealth, RpcPool};
pub use push::PushClient;
