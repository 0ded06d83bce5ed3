use std::sync::Arc;

use alloy::rpc::types::{Filter, Log};
use alloy::sol_types::SolEvent;
use alloy_primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::contracts::{IAmmPair, IErc20};
use crate::rpc::RpcPool;
use crate::utils::amounts::amount_string;
use crate::utils::{DedupCache, Result};

const DEDUP_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// A trade whose base-token size crossed the configured threshold.
#[derive(Debug, Clone, Serialize)]
pub struct WhaleTrade {
    pub side: TradeSide,
    #[serde(rename = "amountVirtual", with = "amount_string")]
    pub amount_virtual: U256,
    /// Project-token leg; zero in curve mode where only the base-token
    /// transfer is observable.
    #[serde(rename = "amountToken", with = "amount_string")]
    pub amount_token: U256,
    pub trader: Address,
    #[serde(rename = "txHash")]
    pub tx_hash: B256,
    #[serde(rename = "blockNumber")]
    pub block_number: u64,
    pub timestamp: DateTime<Utc>,
}

/// How trades are observed, chosen by the selected project's pool type.
#[derive(Debug, Clone, Copy)]
pub enum DetectorMode {
    /// Post-graduation AMM pair: watch its swap event, orienting amounts by
    /// which side of the pair the base token sits on.
    AmmV2 {
        pool: Address,
        base_is_token0: bool,
    },
    /// Pre-graduation bonding curve: watch base-token transfers touching
    /// the curve address.
    Curve {
        pool: Address,
        base_token: Address,
    },
}

/// Threshold + dedup classifier over the subscribed log stream.
pub struct WhaleDetector {
    mode: DetectorMode,
    threshold: U256,
    dedup: DedupCache<B256>,
}

impl WhaleDetector {
    pub fn new(mode: DetectorMode, threshold: U256) -> Self {
        Self {
            mode,
            threshold,
            dedup: DedupCache::new(DEDUP_CAPACITY),
        }
    }

    /// Read `token0` once to orient an AMM pair against the base token.
    pub async fn resolve_amm_mode(
        pool: &Arc<RpcPool>,
        pair: Address,
        base_token: Address,
    ) -> Result<DetectorMode> {
        let token0 = pool
            .call(|provider| async move {
                let contract = IAmmPair::new(pair, provider);
                contract.token0().call().await.map_err(Into::into)
            })
            .await?;
        Ok(DetectorMode::AmmV2 {
            pool: pair,
            base_is_token0: token0 == base_token,
        })
    }

    /// Subscription filter for the active mode.
    pub fn filter(&self) -> Filter {
        match self.mode {
            DetectorMode::AmmV2 { pool, .. } => Filter::new()
                .address(pool)
                .event_signature(IAmmPair::Swap::SIGNATURE_HASH),
            // The transfer stream is filtered to curve-touching entries in
            // `classify`; topic filters cannot express the from/to union.
            DetectorMode::Curve { base_token, .. } => Filter::new()
                .address(base_token)
                .event_signature(IErc20::Transfer::SIGNATURE_HASH),
        }
    }

    /// Classify one log, applying the threshold and the per-monitor
    /// transaction-hash dedup.
    pub fn classify(&mut self, log: &Log) -> Option<WhaleTrade> {
        let candidate = match self.mode {
            DetectorMode::AmmV2 { base_is_token0, .. } => classify_swap(log, base_is_token0),
            DetectorMode::Curve { pool, .. } => classify_curve_transfer(log, pool),
        }?;

        if candidate.amount_virtual < self.threshold {
            return None;
        }
        if !self.dedup.insert(candidate.tx_hash) {
            return None;
        }
        Some(candidate)
    }
}

fn classify_swap(log: &Log, base_is_token0: bool) -> Option<WhaleTrade> {
    let decoded = log.log_decode::<IAmmPair::Swap>().ok()?;
    let swap = &decoded.inner.data;

    let (base_in, base_out, token_in, token_out) = if base_is_token0 {
        (swap.amount0In, swap.amount0Out, swap.amount1In, swap.amount1Out)
    } else {
        (swap.amount1In, swap.amount1Out, swap.amount0In, swap.amount0Out)
    };

    let side = if base_in > base_out {
        TradeSide::Buy
    } else {
        TradeSide::Sell
    };

    Some(WhaleTrade {
        side,
        amount_virtual: base_in.abs_diff(base_out),
        amount_token: token_in.abs_diff(token_out),
        trader: swap.to,
        tx_hash: log.transaction_hash.unwrap_or_default(),
        block_number: log.block_number.unwrap_or_default(),
        timestamp: Utc::now(),
    })
}

fn classify_curve_transfer(log: &Log, pool: Address) -> Option<WhaleTrade> {
    let decoded = log.log_decode::<IErc20::Transfer>().ok()?;
    let transfer = &decoded.inner.data;

    let (side, trader) = if transfer.to == pool {
        (TradeSide::Buy, transfer.from)
    } else if transfer.from == pool {
        (TradeSide::Sell, transfer.to)
    } else {
        return None;
    };

    Some(WhaleTrade {
        side,
        amount_virtual: transfer.value,
        amount_token: U256::ZERO,
        trader,
        tx_hash: log.transaction_hash.unwrap_or_default(),
        block_number: log.block_number.unwrap_or_default(),
        timestamp: Utc::now(),
    })
}

/// Drain the subscription, forwarding qualifying trades until the channel
/// closes (push client destroyed) or the callback owner goes away.
pub async fn run_loop<F>(
    mut detector: WhaleDetector,
    mut logs: mpsc::UnboundedReceiver<Log>,
    on_trade: F,
) where
    F: Fn(WhaleTrade) + Send + 'static,
{
    while let Some(log) = logs.recv().await {
        if let Some(trade) = detector.classify(&log) {
            tracing::info!(
                side = ?trade.side,
                amount = %trade.amount_virtual,
                tx = %trade.tx_hash,
                "Whale trade detected"
            );
            on_trade(trade);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::parse_display;
    use alloy_primitives::LogData;

    fn wrap_log(address: Address, data: LogData, tx_seed: u8) -> Log {
        Log {
            inner: alloy_primitives::Log { address, data },
            block_hash: None,
            block_number: Some(42),
            block_timestamp: None,
            transaction_hash: Some(B256::repeat_byte(tx_seed)),
            transaction_index: None,
            log_index: Some(0),
            removed: false,
        }
    }

    fn swap_log(
        pool: Address,
        amount0_in: U256,
        amount1_in: U256,
        amount0_out: U256,
        amount1_out: U256,
        tx_seed: u8,
    ) -> Log {
        let event = IAmmPair::Swap {
            sender: Address::repeat_byte(0x01),
            amount0In: amount0_in,
            amount1In: amount1_in,
            amount0Out: amount0_out,
            amount1Out: amount1_out,
            to: Address::repeat_byte(0x02),
        };
        wrap_log(pool, event.encode_log_data(), tx_seed)
    }

    fn transfer_log(token: Address, from: Address, to: Address, value: U256, tx_seed: u8) -> Log {
        let event = IErc20::Transfer { from, to, value };
        wrap_log(token, event.encode_log_data(), tx_seed)
    }

    #[test]
    fn test_amm_buy_over_threshold() {
        // 1500 base in, threshold 1000: one buy, then the same hash is
        // ignored.
        let pool = Address::repeat_byte(0xF0);
        let mut detector = WhaleDetector::new(
            DetectorMode::AmmV2 {
                pool,
                base_is_token0: true,
            },
            parse_display("1000").unwrap(),
        );

        let log = swap_log(
            pool,
            parse_display("1500").unwrap(),
            U256::ZERO,
            U256::ZERO,
            parse_display("3").unwrap(),
            0x11,
        );

        let trade = detector.classify(&log).unwrap();
        assert_eq!(trade.side, TradeSide::Buy);
        assert_eq!(trade.amount_virtual, parse_display("1500").unwrap());
        assert_eq!(trade.amount_token, parse_display("3").unwrap());
        assert_eq!(trade.block_number, 42);

        assert!(detector.classify(&log).is_none(), "same hash must not re-emit");
    }

    #[test]
    fn test_amm_sell_orientation_token1() {
        let pool = Address::repeat_byte(0xF0);
        let mut detector = WhaleDetector::new(
            DetectorMode::AmmV2 {
                pool,
                base_is_token0: false,
            },
            parse_display("100").unwrap(),
        );

        // Base token is token1 and leaves the pool: a sell.
        let log = swap_log(
            pool,
            parse_display("5").unwrap(),
            U256::ZERO,
            U256::ZERO,
            parse_display("400").unwrap(),
            0x22,
        );

        let trade = detector.classify(&log).unwrap();
        assert_eq!(trade.side, TradeSide::Sell);
        assert_eq!(trade.amount_virtual, parse_display("400").unwrap());
    }

    #[test]
    fn test_amm_below_threshold_ignored() {
        let pool = Address::repeat_byte(0xF0);
        let mut detector = WhaleDetector::new(
            DetectorMode::AmmV2 {
                pool,
                base_is_token0: true,
            },
            parse_display("1000").unwrap(),
        );

        let log = swap_log(
            pool,
            parse_display("999").unwrap(),
            U256::ZERO,
            U256::ZERO,
            U256::ZERO,
            0x33,
        );
        assert!(detector.classify(&log).is_none());
    }

    #[test]
    fn test_curve_transfer_sides() {
        let curve = Address::repeat_byte(0xC0);
        let token = Address::repeat_byte(0xBA);
        let trader = Address::repeat_byte(0x07);
        let mut detector = WhaleDetector::new(
            DetectorMode::Curve {
                pool: curve,
                base_token: token,
            },
            parse_display("10").unwrap(),
        );

        let buy = transfer_log(token, trader, curve, parse_display("50").unwrap(), 0x44);
        let trade = detector.classify(&buy).unwrap();
        assert_eq!(trade.side, TradeSide::Buy);
        assert_eq!(trade.trader, trader);
        assert_eq!(trade.amount_token, U256::ZERO);

        let sell = transfer_log(token, curve, trader, parse_display("60").unwrap(), 0x55);
        let trade = detector.classify(&sell).unwrap();
        assert_eq!(trade.side, TradeSide::Sell);
        assert_eq!(trade.trader, trader);
    }

    #[test]
    fn test_curve_unrelated_transfer_ignored() {
        let curve = Address::repeat_byte(0xC0);
        let token = Address::repeat_byte(0xBA);
        let mut detector = WhaleDetector::new(
            DetectorMode::Curve {
                pool: curve,
                base_token: token,
            },
            parse_display("10").unwrap(),
        );

        let log = transfer_log(
            token,
            Address::repeat_byte(0x08),
            Address::repeat_byte(0x09),
            parse_display("500").unwrap(),
            0x66,
        );
        assert!(detector.classify(&log).is_none());
    }
}
