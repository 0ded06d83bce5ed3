use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use alloy::rpc::types::Log;
use alloy_primitives::{Address, B256, U256};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use super::tax::decode_transfer;
use crate::utils::amounts::{amount_string, amount_string_opt};
use crate::utils::{to_display, DedupCache};

const DEDUP_CAPACITY: usize = 1000;

/// One observed outbound transfer from the fee receiver.
#[derive(Debug, Clone)]
pub struct SpendRecord {
    pub at: DateTime<Utc>,
    pub amount: U256,
    pub tx_hash: B256,
}

/// Derived buyback progress served over the API.
#[derive(Debug, Clone, Serialize)]
pub struct BuybackStatus {
    #[serde(rename = "spentTotal", with = "amount_string")]
    pub spent_total: U256,
    #[serde(rename = "spentInWindow", with = "amount_string")]
    pub spent_in_window: U256,
    /// Display units per hour over the rate window.
    #[serde(rename = "ratePerHour")]
    pub rate_per_hour: f64,
    #[serde(with = "amount_string")]
    pub remaining: U256,
    /// `None` encodes an infinite ETA (no spend observed in the window).
    #[serde(rename = "etaHours")]
    pub eta_hours: Option<f64>,
    pub progress: f64,
    #[serde(rename = "lastTxAmount", with = "amount_string_opt")]
    pub last_tx_amount: Option<U256>,
}

/// Sliding-window spend tracker for the buyback phase.
///
/// The budget is the tax total snapshotted at `T1`; the tracker is complete
/// once cumulative spend reaches it.
pub struct BuybackTracker {
    budget: U256,
    rate_window: Duration,
    stall_alert: Duration,
    records: VecDeque<SpendRecord>,
    spent_total: U256,
    last_spent_at: Option<DateTime<Utc>>,
    last_tx_amount: Option<U256>,
    dedup: DedupCache<B256>,
    stall_alerted: bool,
}

impl BuybackTracker {
    pub fn new(budget: U256, rate_window: Duration, stall_alert: Duration) -> Self {
        Self {
            budget,
            rate_window,
            stall_alert,
            records: VecDeque::new(),
            spent_total: U256::ZERO,
            last_spent_at: None,
            last_tx_amount: None,
            dedup: DedupCache::new(DEDUP_CAPACITY),
            stall_alerted: false,
        }
    }

    pub fn budget(&self) -> U256 {
        self.budget
    }

    /// Record one spend. Returns `false` for a transaction hash that was
    /// already counted. A fresh spend re-arms the stall alert.
    pub fn record_spend(&mut self, record: SpendRecord) -> bool {
        if !self.dedup.insert(record.tx_hash) {
            return false;
        }

        self.spent_total += record.amount;
        self.last_spent_at = Some(record.at);
        self.last_tx_amount = Some(record.amount);
        self.stall_alerted = false;
        self.prune(record.at);
        self.records.push_back(record);
        true
    }

    /// Drop records older than the rate window.
    fn prune(&mut self, now: DateTime<Utc>) {
        let window = ChronoDuration::from_std(self.rate_window)
            .unwrap_or_else(|_| ChronoDuration::minutes(20));
        let cutoff = now - window;
        while self
            .records
            .front()
            .is_some_and(|record| record.at < cutoff)
        {
            self.records.pop_front();
        }
    }

    /// Derived status at `now`.
    pub fn status(&mut self, now: DateTime<Utc>) -> BuybackStatus {
        self.prune(now);

        let spent_in_window: U256 = self
            .records
            .iter()
            .fold(U256::ZERO, |acc, record| acc + record.amount);

        let window_secs = self.rate_window.as_secs_f64();
        let rate_per_hour = if window_secs > 0.0 {
            to_display(spent_in_window) / window_secs * 3600.0
        } else {
            0.0
        };

        let remaining = self.budget.saturating_sub(self.spent_total);
        let eta_hours =
            (rate_per_hour > 0.0).then(|| to_display(remaining) / rate_per_hour);

        let progress = if self.budget.is_zero() {
            100.0
        } else {
            (to_display(self.spent_total) / to_display(self.budget) * 100.0).min(100.0)
        };

        BuybackStatus {
            spent_total: self.spent_total,
            spent_in_window,
            rate_per_hour,
            remaining,
            eta_hours,
            progress,
            last_tx_amount: self.last_tx_amount,
        }
    }

    /// Stall check: incomplete budget, at least one spend observed, and the
    /// last spend is older than the alert threshold. Fires at most once per
    /// quiet period; a new spend re-arms it.
    pub fn check_stall(&mut self, now: DateTime<Utc>) -> bool {
        if self.stall_alerted || self.is_complete() {
            return false;
        }
        let Some(last) = self.last_spent_at else {
            return false;
        };
        let threshold = ChronoDuration::from_std(self.stall_alert)
            .unwrap_or_else(|_| ChronoDuration::minutes(5));
        if now - last > threshold {
            self.stall_alerted = true;
            return true;
        }
        false
    }

    pub fn is_complete(&self) -> bool {
        self.spent_total >= self.budget
    }

    pub fn last_spent_at(&self) -> Option<DateTime<Utc>> {
        self.last_spent_at
    }
}

/// Drain the outbound-transfer subscription into the shared tracker until
/// the channel closes (push client destroyed).
pub async fn run_loop(
    tracker: Arc<Mutex<BuybackTracker>>,
    receiver: Address,
    mut logs: mpsc::UnboundedReceiver<Log>,
) {
    while let Some(log) = logs.recv().await {
        let Some(transfer) = decode_transfer(&log) else {
            continue;
        };
        if transfer.from != receiver {
            continue;
        }
        let record = SpendRecord {
            at: Utc::now(),
            amount: transfer.value,
            tx_hash: transfer.tx_hash,
        };
        if tracker.lock().record_spend(record) {
            tracing::info!(
                amount = %transfer.value,
                tx = %transfer.tx_hash,
                "Buyback spend observed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::parse_display;

    fn minutes(n: i64) -> ChronoDuration {
        ChronoDuration::minutes(n)
    }

    fn spend(at: DateTime<Utc>, display: &str, seed: u8) -> SpendRecord {
        SpendRecord {
            at,
            amount: parse_display(display).unwrap(),
            tx_hash: B256::repeat_byte(seed),
        }
    }

    fn tracker(budget: &str) -> BuybackTracker {
        BuybackTracker::new(
            parse_display(budget).unwrap(),
            Duration::from_secs(20 * 60),
            Duration::from_secs(5 * 60),
        )
    }

    #[test]
    fn test_rate_and_eta_scenario() {
        // Budget 1000, spends of 100 (t-15min) and 50 (t-5min) in a 20 min
        // window: rate 450/h, remaining 850, eta ~1.888 h, progress 15%.
        let now = Utc::now();
        let mut tracker = tracker("1000");
        assert!(tracker.record_spend(spend(now - minutes(15), "100", 1)));
        assert!(tracker.record_spend(spend(now - minutes(5), "50", 2)));

        let status = tracker.status(now);
        assert_eq!(status.spent_in_window, parse_display("150").unwrap());
        assert!((status.rate_per_hour - 450.0).abs() < 1e-9);
        assert_eq!(status.remaining, parse_display("850").unwrap());
        let eta = status.eta_hours.unwrap();
        assert!((eta - 850.0 / 450.0).abs() < 1e-9);
        assert!((status.progress - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_window_has_zero_rate_and_infinite_eta() {
        let now = Utc::now();
        let mut tracker = tracker("1000");
        let status = tracker.status(now);
        assert_eq!(status.rate_per_hour, 0.0);
        assert!(status.eta_hours.is_none());
        assert_eq!(status.progress, 0.0);
    }

    #[test]
    fn test_window_pruning_keeps_total() {
        let now = Utc::now();
        let mut tracker = tracker("1000");
        tracker.record_spend(spend(now - minutes(30), "200", 1));
        tracker.record_spend(spend(now - minutes(10), "50", 2));

        let status = tracker.status(now);
        // The 30-minute-old spend left the window but stays in the total.
        assert_eq!(status.spent_in_window, parse_display("50").unwrap());
        assert_eq!(status.spent_total, parse_display("250").unwrap());
    }

    #[test]
    fn test_duplicate_hash_ignored() {
        let now = Utc::now();
        let mut tracker = tracker("1000");
        assert!(tracker.record_spend(spend(now, "100", 7)));
        assert!(!tracker.record_spend(spend(now, "100", 7)));
        assert_eq!(tracker.status(now).spent_total, parse_display("100").unwrap());
    }

    #[test]
    fn test_stall_fires_once_then_rearms_on_spend() {
        // stallAlert 5 min, last spend 6 min ago: one alert. A new spend
        // re-arms; a later stall alerts again.
        let now = Utc::now();
        let mut tracker = tracker("1000");
        tracker.record_spend(spend(now - minutes(6), "10", 1));

        assert!(tracker.check_stall(now));
        assert!(!tracker.check_stall(now));
        assert!(!tracker.check_stall(now + minutes(1)));

        tracker.record_spend(spend(now, "10", 2));
        assert!(!tracker.check_stall(now + minutes(1)));
        assert!(tracker.check_stall(now + minutes(6)));
        assert!(!tracker.check_stall(now + minutes(7)));
    }

    #[test]
    fn test_no_stall_without_any_spend() {
        let now = Utc::now();
        let mut tracker = tracker("1000");
        assert!(!tracker.check_stall(now));
    }

    #[test]
    fn test_completion_at_budget() {
        let now = Utc::now();
        let mut tracker = tracker("100");
        tracker.record_spend(spend(now, "60", 1));
        assert!(!tracker.is_complete());
        tracker.record_spend(spend(now, "40", 2));
        assert!(tracker.is_complete());
        assert_eq!(tracker.status(now).progress, 100.0);
        assert!(!tracker.check_stall(now + minutes(10)));
    }
}
