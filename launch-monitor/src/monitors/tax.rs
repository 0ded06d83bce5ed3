use std::sync::Arc;

use alloy::providers::Provider;
use alloy::rpc::types::{BlockNumberOrTag, Filter, Log};
use alloy::sol_types::SolEvent;
use alloy_primitives::{Address, B256, I256, U256};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::contracts::IErc20;
use crate::rpc::RpcPool;
use crate::utils::amounts::{amount_string, signed_string_opt};
use crate::utils::Result;

/// Per-call block range cap for log queries.
pub const RANGE_CAP: u64 = 2000;
/// Catch-up iterations allowed within a single refresh tick.
pub const MAX_CATCH_UP_ROUNDS: u32 = 10;
/// Half-width of the timestamp binary search around the estimated block.
const SEARCH_SLACK: u64 = 500;

/// One decoded base-token transfer touching the fee receiver.
#[derive(Debug, Clone)]
pub struct TransferRecord {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub block_number: u64,
    pub tx_hash: B256,
}

/// Cumulative counters over `[blockStart, lastProcessedBlock]`.
///
/// `netInflow = inflow − outflow` is the tax total; `delta` is the
/// self-consistency residual against the balance diff and should stay near
/// zero — a large value means missed logs.
#[derive(Debug, Clone, Serialize)]
pub struct TaxSnapshot {
    #[serde(with = "amount_string")]
    pub inflow: U256,
    #[serde(with = "amount_string")]
    pub outflow: U256,
    #[serde(rename = "netInflow", with = "amount_string")]
    pub net_inflow: U256,
    #[serde(rename = "balanceDiff", with = "signed_string_opt")]
    pub balance_diff: Option<I256>,
    #[serde(with = "signed_string_opt")]
    pub delta: Option<I256>,
    #[serde(rename = "lastProcessedBlock")]
    pub last_processed_block: u64,
}

/// Pure accounting core of the tax tracker, separated from chain access so
/// the arithmetic and the catch-up bound are testable offline.
#[derive(Debug, Clone)]
pub struct TaxAccounting {
    pub start_block: u64,
    pub last_processed_block: u64,
    pub start_balance: Option<U256>,
    pub inflow: U256,
    pub outflow: U256,
}

impl TaxAccounting {
    pub fn new(start_block: u64, start_balance: Option<U256>) -> Self {
        Self {
            start_block,
            last_processed_block: start_block,
            start_balance,
            inflow: U256::ZERO,
            outflow: U256::ZERO,
        }
    }

    /// The next `(from, to]` scan range, capped at `RANGE_CAP` blocks, or
    /// `None` when already at the tip.
    pub fn next_range(&self, latest_block: u64) -> Option<(u64, u64)> {
        let upper = latest_block.min(self.last_processed_block + RANGE_CAP);
        (upper > self.last_processed_block).then_some((self.last_processed_block + 1, upper))
    }

    /// Whether the scanner is far enough behind to warrant the catch-up loop.
    pub fn needs_catch_up(&self, latest_block: u64) -> bool {
        latest_block.saturating_sub(self.last_processed_block) > RANGE_CAP
    }

    /// Fold one scanned range into the cumulative counters.
    ///
    /// A transfer with `from == to == receiver` lands in both slices and
    /// cancels to zero in the net.
    pub fn apply(
        &mut self,
        inflows: &[TransferRecord],
        outflows: &[TransferRecord],
        scanned_to: u64,
    ) {
        for record in inflows {
            self.inflow += record.value;
        }
        for record in outflows {
            self.outflow += record.value;
        }
        debug_assert!(scanned_to >= self.last_processed_block);
        self.last_processed_block = scanned_to;
    }

    pub fn net_inflow(&self) -> U256 {
        self.inflow.saturating_sub(self.outflow)
    }

    pub fn snapshot(&self, current_balance: Option<U256>) -> TaxSnapshot {
        let balance_diff = match (current_balance, self.start_balance) {
            (Some(current), Some(start)) => {
                Some(I256::try_from(current).unwrap_or(I256::MAX)
                    - I256::try_from(start).unwrap_or(I256::ZERO))
            }
            _ => None,
        };
        let delta = balance_diff
            .map(|diff| diff - I256::try_from(self.net_inflow()).unwrap_or(I256::ZERO));

        TaxSnapshot {
            inflow: self.inflow,
            outflow: self.outflow,
            net_inflow: self.net_inflow(),
            balance_diff,
            delta,
            last_processed_block: self.last_processed_block,
        }
    }
}

/// Incremental scanner for net inflow into the fee receiver over
/// `[T0, now]`, driven by the base token's transfer logs.
pub struct TaxTracker {
    pool: Arc<RpcPool>,
    token: Address,
    receiver: Address,
    accounting: TaxAccounting,
}

impl TaxTracker {
    /// Resolve `T0` to a start block, read the receiver's balance at that
    /// block, and position the scanner.
    pub async fn init(
        pool: Arc<RpcPool>,
        token: Address,
        receiver: Address,
        t0: DateTime<Utc>,
        avg_block_time_secs: f64,
    ) -> Result<Self> {
        let latest = Self::latest_block(&pool).await?;
        let latest_ts = Self::block_timestamp(&pool, latest).await?;

        let behind_secs = latest_ts.saturating_sub(t0.timestamp().max(0) as u64);
        let estimate =
            latest.saturating_sub((behind_secs as f64 / avg_block_time_secs.max(0.1)) as u64);
        let start_block =
            Self::search_start_block(&pool, estimate, latest, t0.timestamp().max(0) as u64).await?;

        let start_balance = match Self::balance_at(&pool, token, receiver, start_block).await {
            Ok(balance) => Some(balance),
            Err(first) => match Self::balance_at(&pool, token, receiver, start_block).await {
                Ok(balance) => Some(balance),
                Err(_) => {
                    tracing::warn!(
                        error = %first,
                        block = start_block,
                        "Historical balance unavailable, tracking net inflow only"
                    );
                    None
                }
            },
        };

        tracing::info!(start_block, ?start_balance, "Tax tracker initialised");
        Ok(Self {
            pool,
            token,
            receiver,
            accounting: TaxAccounting::new(start_block, start_balance),
        })
    }

    /// Binary-search the first block at or after `t0` within the slack
    /// window around the estimate.
    async fn search_start_block(
        pool: &Arc<RpcPool>,
        estimate: u64,
        latest: u64,
        t0_ts: u64,
    ) -> Result<u64> {
        let mut low = estimate.saturating_sub(SEARCH_SLACK);
        let mut high = estimate.saturating_add(SEARCH_SLACK).min(latest);

        while low < high {
            let mid = low + (high - low) / 2;
            let ts = Self::block_timestamp(pool, mid).await?;
            if ts < t0_ts {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        Ok(low)
    }

    async fn latest_block(pool: &Arc<RpcPool>) -> Result<u64> {
        pool.call(|provider| async move {
            provider.get_block_number().await.map_err(Into::into)
        })
        .await
    }

    async fn block_timestamp(pool: &Arc<RpcPool>, number: u64) -> Result<u64> {
        pool.call(|provider| async move {
            let block = provider
                .get_block_by_number(BlockNumberOrTag::Number(number))
                .await?
                .ok_or_else(|| format!("block {} not found", number))?;
            Ok(block.header.timestamp)
        })
        .await
    }

    async fn balance_at(
        pool: &Arc<RpcPool>,
        token: Address,
        receiver: Address,
        block: u64,
    ) -> Result<U256> {
        pool.call(|provider| async move {
            let erc20 = IErc20::new(token, provider);
            erc20
                .balanceOf(receiver)
                .block(block.into())
                .call()
                .await
                .map_err(Into::into)
        })
        .await
    }

    async fn current_balance(&self) -> Result<U256> {
        let (token, receiver) = (self.token, self.receiver);
        self.pool
            .call(|provider| async move {
                let erc20 = IErc20::new(token, provider);
                erc20.balanceOf(receiver).call().await.map_err(Into::into)
            })
            .await
    }

    /// Query transfers touching the receiver within `(from, to]`.
    async fn fetch_transfers(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<(Vec<TransferRecord>, Vec<TransferRecord>)> {
        let base = Filter::new()
            .address(self.token)
            .event_signature(IErc20::Transfer::SIGNATURE_HASH)
            .from_block(from_block)
            .to_block(to_block);

        let inflow_filter = base.clone().topic2(self.receiver.into_word());
        let outflow_filter = base.topic1(self.receiver.into_word());

        let inflows = self.fetch_logs(inflow_filter).await?;
        let outflows = self.fetch_logs(outflow_filter).await?;
        Ok((inflows, outflows))
    }

    async fn fetch_logs(&self, filter: Filter) -> Result<Vec<TransferRecord>> {
        let logs: Vec<Log> = self
            .pool
            .call(move |provider| {
                let filter = filter.clone();
                async move { provider.get_logs(&filter).await.map_err(Into::into) }
            })
            .await?;

        let mut records: Vec<TransferRecord> = logs.iter().filter_map(decode_transfer).collect();
        // On-chain order: block ascending, then log index.
        records.sort_by_key(|r| r.block_number);
        Ok(records)
    }

    /// Scan the next capped range and fold it into the counters.
    pub async fn update(&mut self) -> Result<TaxSnapshot> {
        let latest = Self::latest_block(&self.pool).await?;

        if let Some((from_block, to_block)) = self.accounting.next_range(latest) {
            let (inflows, outflows) = match self.fetch_transfers(from_block, to_block).await {
                Ok(result) => result,
                Err(e) => {
                    // The pool already rotated through its endpoints; the
                    // next update rebinds against whichever is now active.
                    self.pool.rotate_request();
                    return Err(e);
                }
            };
            self.accounting.apply(&inflows, &outflows, to_block);
        }

        let current_balance = self.current_balance().await.ok();
        Ok(self.accounting.snapshot(current_balance))
    }

    /// Run `update` repeatedly (at most `MAX_CATCH_UP_ROUNDS`) while the
    /// scanner is more than one range behind the tip.
    pub async fn catch_up(&mut self) -> Result<()> {
        for _ in 0..MAX_CATCH_UP_ROUNDS {
            let latest = Self::latest_block(&self.pool).await?;
            if !self.accounting.needs_catch_up(latest) {
                return Ok(());
            }
            self.update().await?;
        }
        Ok(())
    }

    /// Net inflow so far; snapshotted by the state machine at `T1` as the
    /// buyback budget.
    pub fn get_tax_total(&self) -> U256 {
        self.accounting.net_inflow()
    }

    pub fn accounting(&self) -> &TaxAccounting {
        &self.accounting
    }
}

/// Decode one transfer log into a record, skipping undecodable entries.
pub fn decode_transfer(log: &Log) -> Option<TransferRecord> {
    let decoded = log.log_decode::<IErc20::Transfer>().ok()?;
    Some(TransferRecord {
        from: decoded.inner.data.from,
        to: decoded.inner.data.to,
        value: decoded.inner.data.value,
        block_number: log.block_number.unwrap_or_default(),
        tx_hash: log.transaction_hash.unwrap_or_default(),
    })
}
