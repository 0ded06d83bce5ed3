pub mod buyback;
pub mod tax;
pub mod whale;

pub use buyback::{BuybackStatus, BuybackTracker, SpendRecord};
pub use tax::{TaxAccounting, TaxSnapshot, TaxTracker, TransferRecord};
pub use whale::{DetectorMode, TradeSide, WhaleDetector, WhaleTrade};
