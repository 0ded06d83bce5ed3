use std::collections::VecDeque;
use std::sync::Arc;

use alloy_primitives::B256;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::dto::{
    BuybackDto, ChainConfigDto, ConfigResponse, ProjectDto, RpcCountsDto, StateResponse, TaxDto,
    VirtualsConfigDto,
};
use super::events::{Event, EventKind};
use crate::catalog::CatalogClient;
use crate::config::Settings;
use crate::machine::LifecycleContext;
use crate::monitors::{BuybackStatus, TaxSnapshot, WhaleTrade};
use crate::rpc::RpcPool;
use crate::utils::DedupCache;
use crate::valuation::FdvFigure;

/// Ring capacity for both the trade and the event history.
pub const RING_CAPACITY: usize = 100;
/// Broadcast buffer per push-socket client; a slow client skips past
/// overflowed entries instead of stalling the fan-out.
const BROADCAST_CAPACITY: usize = 256;

#[derive(Default)]
struct Snapshot {
    ctx: LifecycleContext,
    tax: Option<TaxSnapshot>,
    tax_elapsed_minutes: Option<i64>,
    buyback: Option<BuybackStatus>,
    onchain_fdv: Option<FdvFigure>,
    api_fdv: Option<FdvFigure>,
}

/// Shared surface between the monitoring core and its HTTP/push clients.
///
/// The state machine and the monitors write through the `update_*` methods;
/// REST handlers read synchronous snapshots; push-socket clients get every
/// broadcast in per-client order.
pub struct ApiState {
    pub settings: Settings,
    pub pool: Arc<RpcPool>,
    pub catalog: Arc<CatalogClient>,
    /// Cancelled on shutdown so open push sockets close promptly.
    pub shutdown: CancellationToken,
    snapshot: RwLock<Snapshot>,
    trades: Mutex<VecDeque<WhaleTrade>>,
    trade_hashes: Mutex<DedupCache<B256>>,
    events: Mutex<VecDeque<Event>>,
    broadcast: broadcast::Sender<Event>,
}

impl ApiState {
    pub fn new(
        settings: Settings,
        pool: Arc<RpcPool>,
        catalog: Arc<CatalogClient>,
        shutdown: CancellationToken,
    ) -> Self {
        let (broadcast, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            settings,
            pool,
            catalog,
            shutdown,
            snapshot: RwLock::new(Snapshot::default()),
            trades: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
            trade_hashes: Mutex::new(DedupCache::new(RING_CAPACITY * 10)),
            events: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
            broadcast,
        }
    }

    // ================================================================
    // Writers (state machine + monitors)
    // ================================================================

    /// Take the machine's context snapshot. Broadcasts `state_change` only
    /// when the phase actually moved, so repeated pushes of the same
    /// context stay silent.
    pub fn update_context(&self, ctx: &LifecycleContext) {
        let phase_changed = {
            let mut snapshot = self.snapshot.write();
            let changed = snapshot.ctx.phase != ctx.phase;
            if ctx.selected.is_none() {
                snapshot.tax = None;
                snapshot.tax_elapsed_minutes = None;
                snapshot.buyback = None;
                snapshot.onchain_fdv = None;
                snapshot.api_fdv = None;
            }
            snapshot.ctx = ctx.clone();
            changed
        };

        if phase_changed {
            let payload = serde_json::to_value(self.state_response()).unwrap_or_default();
            self.emit(EventKind::StateChange, payload);
        }
    }

    /// Push a whale trade into the ring (newest first) and broadcast it.
    /// A transaction hash that was already recorded is dropped.
    pub fn record_trade(&self, trade: WhaleTrade) {
        if !self.trade_hashes.lock().insert(trade.tx_hash) {
            return;
        }

        {
            let mut trades = self.trades.lock();
            trades.push_front(trade.clone());
            while trades.len() > RING_CAPACITY {
                trades.pop_back();
            }
        }

        let payload = serde_json::to_value(&trade).unwrap_or_default();
        self.emit(EventKind::WhaleTrade, payload);
    }

    pub fn update_tax(&self, tax: TaxSnapshot, elapsed_minutes: i64) {
        let payload = serde_json::json!({
            "netInflow": tax.net_inflow.to_string(),
            "balanceDiff": tax.balance_diff.map(|d| d.to_string()),
            "elapsedMinutes": elapsed_minutes,
        });
        {
            let mut snapshot = self.snapshot.write();
            snapshot.tax = Some(tax);
            snapshot.tax_elapsed_minutes = Some(elapsed_minutes);
        }
        self.emit(EventKind::TaxUpdate, payload);
    }

    pub fn update_buyback(&self, status: BuybackStatus) {
        let payload = serde_json::to_value(&status).unwrap_or_default();
        self.snapshot.write().buyback = Some(status);
        self.emit(EventKind::BuybackUpdate, payload);
    }

    /// On-chain FDV; takes precedence over the catalog estimate.
    pub fn update_onchain_fdv(&self, figure: FdvFigure) {
        self.snapshot.write().onchain_fdv = Some(figure);
    }

    /// Catalog-reported FDV, kept as the estimate fallback.
    pub fn update_api_fdv(&self, figure: FdvFigure) {
        self.snapshot.write().api_fdv = Some(figure);
    }

    /// Record an event in the ring (newest first) and fan it out.
    pub fn emit(&self, kind: EventKind, payload: serde_json::Value) {
        let event = Event::new(kind, payload);
        {
            let mut events = self.events.lock();
            events.push_front(event.clone());
            while events.len() > RING_CAPACITY {
                events.pop_back();
            }
        }
        let _ = self.broadcast.send(event);
    }

    // ================================================================
    // Readers (REST + push socket)
    // ================================================================

    pub fn state_response(&self) -> StateResponse {
        let snapshot = self.snapshot.read();
        let now = Utc::now();

        let project = snapshot.ctx.selected.as_ref().map(|selected| ProjectDto {
            id: selected.project.id,
            name: selected.project.name.clone(),
            symbol: selected.project.symbol.clone(),
            factory: selected.project.factory,
            status: selected.project.status,
            pool_address: selected.pool_address,
            pool_type: selected.pool_type,
        });

        let tax = snapshot.ctx.selected.as_ref().and(snapshot.tax.as_ref()).map(|tax| TaxDto {
            net_inflow: tax.net_inflow.to_string(),
            balance_diff: tax.balance_diff.map(|d| d.to_string()),
        });

        let buyback = snapshot.buyback.as_ref().map(|status| BuybackDto {
            spent_total: status.spent_total.to_string(),
            progress: status.progress,
            eta_hours: status.eta_hours,
            rate_per_hour: Some(status.rate_per_hour),
            last_tx_amount: status.last_tx_amount.map(|a| a.to_string()),
        });

        StateResponse {
            state: snapshot.ctx.phase,
            project,
            t0: snapshot.ctx.t0,
            t1: snapshot.ctx.t1,
            tax_total: snapshot.ctx.tax_total,
            start_balance: snapshot.ctx.start_balance,
            elapsed_minutes: snapshot.ctx.elapsed_minutes(now),
            remaining_minutes: snapshot.ctx.remaining_minutes(now),
            onchain_fdv_virtual: snapshot.onchain_fdv.as_ref().map(|f| f.fdv_virtual.clone()),
            onchain_fdv_usd: snapshot.onchain_fdv.as_ref().and_then(|f| f.fdv_usd),
            api_fdv_virtual: snapshot.api_fdv.as_ref().map(|f| f.fdv_virtual.clone()),
            api_fdv_usd: snapshot.api_fdv.as_ref().and_then(|f| f.fdv_usd),
            tax,
            buyback,
        }
    }

    pub fn trades(&self) -> Vec<WhaleTrade> {
        self.trades.lock().iter().cloned().collect()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().iter().cloned().collect()
    }

    pub fn config_response(&self) -> ConfigResponse {
        ConfigResponse {
            chain: ChainConfigDto {
                avg_block_time_secs: self.settings.chain.avg_block_time_secs,
                rpc: RpcCountsDto {
                    http_endpoints: self.settings.chain.rpc.http.len(),
                    wss_endpoints: self.settings.chain.rpc.wss.len(),
                },
            },
            thresholds: self.settings.thresholds.clone(),
            virtuals: VirtualsConfigDto {
                api_base: self.settings.virtuals.api_base.clone(),
                poll_interval_ms: self.settings.virtuals.poll_interval_ms,
                max_project_age_minutes: self.settings.virtuals.max_project_age_minutes,
            },
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.broadcast.subscribe()
    }

    /// The greeting every push-socket client receives on connect.
    pub fn initial_event(&self) -> Event {
        Event::new(
            EventKind::StateChange,
            serde_json::to_value(self.state_response()).unwrap_or_default(),
        )
    }
}
