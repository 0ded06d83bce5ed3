use std::sync::Arc;
use std::time::Duration;

use alloy::rpc::types::Filter;
use alloy::sol_types::SolEvent;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::context::{LifecycleContext, Phase};
use crate::api::{ApiState, EventKind};
use crate::catalog::{CatalogClient, DiscoveryParams, PoolType};
use crate::config::Settings;
use crate::contracts::IErc20;
use crate::monitors::whale::{self, DetectorMode, WhaleDetector};
use crate::monitors::{buyback, BuybackTracker, TaxTracker};
use crate::notify::Notifier;
use crate::probe::HealthProbe;
use crate::rpc::{PushClient, RpcPool};
use crate::utils::{format_display, MonitorError, Result};
use crate::valuation::{figure_from_catalog, FdvCalculator};

const TICK: Duration = Duration::from_secs(1);
const ERROR_SLEEP: Duration = Duration::from_secs(5);
const HEALTH_PUSH_TICKS: u64 = 60;
const TAX_REFRESH_MINUTES: i64 = 5;
const GRADUATION_POLL_SECONDS: i64 = 60;
const BUYBACK_PUBLISH_MINUTES: i64 = 10;

struct WhaleHandle {
    client: PushClient,
    task: JoinHandle<()>,
}

struct BuybackHandle {
    tracker: Arc<Mutex<BuybackTracker>>,
    client: PushClient,
    task: JoinHandle<()>,
}

/// Five-phase orchestrator. Sole writer of the lifecycle context; owns the
/// monitors' lifetimes and drives every periodic refresh.
pub struct StateMachine {
    settings: Settings,
    pool: Arc<RpcPool>,
    catalog: Arc<CatalogClient>,
    api: Arc<ApiState>,
    probe: Arc<HealthProbe>,
    notifier: Arc<dyn Notifier>,
    fdv: FdvCalculator,
    cancel: CancellationToken,
    ctx: LifecycleContext,
    tax: Option<TaxTracker>,
    whale: Option<WhaleHandle>,
    buyback: Option<BuybackHandle>,
    start_announced: bool,
    last_graduation_poll: Option<DateTime<Utc>>,
    latest_catalog_mcap: Option<f64>,
    tick_count: u64,
    fatal: bool,
}

impl StateMachine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: Settings,
        pool: Arc<RpcPool>,
        catalog: Arc<CatalogClient>,
        api: Arc<ApiState>,
        probe: Arc<HealthProbe>,
        notifier: Arc<dyn Notifier>,
        cancel: CancellationToken,
    ) -> Self {
        let fdv = FdvCalculator::new(pool.clone(), settings.virtuals.usd_price_url.clone());
        Self {
            settings,
            pool,
            catalog,
            api,
            probe,
            notifier,
            fdv,
            cancel,
            ctx: LifecycleContext::new(),
            tax: None,
            whale: None,
            buyback: None,
            start_announced: false,
            last_graduation_poll: None,
            latest_catalog_mcap: None,
            tick_count: 0,
            fatal: false,
        }
    }

    /// Tick loop: once per second dispatch the current phase handler; on a
    /// recoverable error log, publish, sleep 5 s and carry on. Only config
    /// errors and catalog exhaustion terminate the machine.
    pub async fn run(mut self) -> Result<()> {
        let mut ticker = tokio::time::interval(TICK);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("State machine cancelled, cleaning up");
                    self.cleanup().await;
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.step().await {
                if !e.is_recoverable() || self.fatal {
                    tracing::error!(error = %e, "State machine stopping");
                    self.cleanup().await;
                    return Err(e);
                }
                tracing::error!(error = %e, phase = self.ctx.phase.as_str(), "Tick failed");
                self.api.emit(
                    EventKind::Error,
                    serde_json::json!({ "message": e.to_string(), "phase": self.ctx.phase }),
                );
                tokio::select! {
                    _ = tokio::time::sleep(ERROR_SLEEP) => {}
                    _ = self.cancel.cancelled() => {}
                }
            }

            self.tick_count += 1;
            if self.tick_count % HEALTH_PUSH_TICKS == 0 {
                self.push_probe(true).await;
            }
        }
    }

    async fn step(&mut self) -> Result<()> {
        match self.ctx.phase {
            Phase::Discover => self.handle_discover().await,
            Phase::WaitT0 => self.handle_wait_t0().await,
            Phase::LaunchWindow => self.handle_launch_window().await,
            Phase::BuybackPhase => self.handle_buyback().await,
            Phase::Done => self.handle_done().await,
        }
    }

    /// Transitions are the only place the phase changes; each one refreshes
    /// the API snapshot and the health probe.
    fn transition(&mut self, to: Phase) {
        tracing::info!(from = self.ctx.phase.as_str(), to = to.as_str(), "Phase transition");
        self.ctx.phase = to;
        self.api.update_context(&self.ctx);
        self.probe.update(to, self.project_symbol(), None);
    }

    fn project_symbol(&self) -> Option<String> {
        self.ctx
            .selected
            .as_ref()
            .map(|s| s.project.symbol.clone())
    }

    async fn push_probe(&self, with_rpc: bool) {
        let rpc_healthy = if with_rpc {
            Some(self.pool.health_snapshot().await.healthy)
        } else {
            None
        };
        self.probe
            .update(self.ctx.phase, self.project_symbol(), rpc_healthy);
    }

    // ================================================================
    // discover
    // ================================================================

    async fn handle_discover(&mut self) -> Result<()> {
        self.ctx.reset();
        self.start_announced = false;
        self.latest_catalog_mcap = None;
        self.api.update_context(&self.ctx);

        let params = DiscoveryParams {
            poll_interval: self.settings.poll_interval(),
            tax_window: self.settings.tax_window(),
            max_project_age: Duration::from_secs(
                self.settings.virtuals.max_project_age_minutes * 60,
            ),
            preferred_symbol: self.settings.virtuals.preferred_symbol.clone(),
        };

        let selected = match self.catalog.discover_project(&params, &self.cancel).await {
            Ok(selected) => selected,
            Err(e) => {
                if self.cancel.is_cancelled() {
                    return Ok(());
                }
                // Catalog exhaustion is one of the two conditions that may
                // terminate the process.
                self.fatal = true;
                return Err(e);
            }
        };

        self.latest_catalog_mcap = selected.project.mcap_in_virtual;
        self.ctx.set_project(selected, self.settings.tax_window());
        self.transition(Phase::WaitT0);
        Ok(())
    }

    // ================================================================
    // wait_t0
    // ================================================================

    async fn handle_wait_t0(&mut self) -> Result<()> {
        let selected = self
            .ctx
            .selected
            .clone()
            .ok_or_else(|| MonitorError::Generic("wait_t0 without a selected project".into()))?;

        if !self.start_announced {
            self.start_announced = true;
            let text = format!(
                "Tracking launch: {} ({}) — window closes {}",
                selected.project.name,
                selected.project.symbol,
                self.ctx.t1.map(|t| t.to_rfc3339()).unwrap_or_default()
            );
            self.notifier.notify(&text).await;
            self.api.emit(
                EventKind::ProjectStart,
                serde_json::json!({
                    "id": selected.project.id,
                    "name": selected.project.name,
                    "symbol": selected.project.symbol,
                    "t0": selected.t0,
                }),
            );
        }

        if self.tax.is_none() {
            let tracker = TaxTracker::init(
                self.pool.clone(),
                self.settings.virtual_token_address(),
                self.settings.buyback_address(),
                selected.t0,
                self.settings.chain.avg_block_time_secs,
            )
            .await?;
            self.ctx.start_balance = tracker.accounting().start_balance;
            self.tax = Some(tracker);
        }

        if self.whale.is_none() {
            self.start_whale_detector(&selected).await?;
        }

        self.api.update_context(&self.ctx);
        self.transition(Phase::LaunchWindow);
        Ok(())
    }

    async fn start_whale_detector(
        &mut self,
        selected: &crate::catalog::SelectedProject,
    ) -> Result<()> {
        let base_token = self.settings.virtual_token_address();
        let mode = match selected.pool_type {
            PoolType::Curve => DetectorMode::Curve {
                pool: selected.pool_address,
                base_token,
            },
            PoolType::AmmV2 => {
                WhaleDetector::resolve_amm_mode(&self.pool, selected.pool_address, base_token)
                    .await?
            }
        };
        let detector = WhaleDetector::new(mode, self.settings.big_trade_threshold()?);

        let client = PushClient::new(self.pool.clone());
        client.connect().await?;
        let logs = client.subscribe(detector.filter()).await?;

        let api = self.api.clone();
        let task = tokio::spawn(whale::run_loop(detector, logs, move |trade| {
            api.record_trade(trade);
        }));

        self.whale = Some(WhaleHandle { client, task });
        Ok(())
    }

    // ================================================================
    // launch_window
    // ================================================================

    async fn handle_launch_window(&mut self) -> Result<()> {
        let now = Utc::now();

        if self.ctx.t1.is_some_and(|t1| now >= t1) {
            self.close_tax_window(now).await?;
            self.enter_buyback().await?;
            return Ok(());
        }

        let refresh_due = self
            .ctx
            .last_tax_refresh
            .map_or(true, |t| now - t >= ChronoDuration::minutes(TAX_REFRESH_MINUTES));
        if refresh_due {
            self.refresh_tax(now).await?;
        }

        self.refresh_fdv().await;

        if self.graduation_poll_due(now) {
            if self.check_graduation(now).await? {
                self.transition(Phase::Done);
                return Ok(());
            }
        }

        Ok(())
    }

    /// Final accounting at `T1`: catch up, take the closing snapshot, and
    /// freeze the tax total as the buyback budget.
    async fn close_tax_window(&mut self, now: DateTime<Utc>) -> Result<()> {
        if let Some(tax) = self.tax.as_mut() {
            tax.catch_up().await?;
            let snapshot = tax.update().await?;
            self.ctx.tax_total = tax.get_tax_total();
            self.ctx.last_tax_refresh = Some(now);
            self.api.update_tax(snapshot, self.ctx.elapsed_minutes(now));
            self.api.update_context(&self.ctx);
        }
        Ok(())
    }

    async fn refresh_tax(&mut self, now: DateTime<Utc>) -> Result<()> {
        let Some(tax) = self.tax.as_mut() else {
            return Ok(());
        };
        tax.catch_up().await?;
        let snapshot = tax.update().await?;
        let elapsed = self.ctx.elapsed_minutes(now);

        self.ctx.tax_total = tax.get_tax_total();
        self.ctx.last_tax_refresh = Some(now);

        let text = format!(
            "Tax window: {} VIRTUAL net inflow after {} min",
            format_display(snapshot.net_inflow),
            elapsed
        );
        self.api.update_tax(snapshot, elapsed);
        self.api.update_context(&self.ctx);
        self.notifier.notify(&text).await;
        Ok(())
    }

    /// On-chain FDV preferred; the catalog-reported market cap fills in as
    /// a flagged estimate when the chain read fails.
    async fn refresh_fdv(&mut self) {
        let Some(selected) = self.ctx.selected.clone() else {
            return;
        };
        if selected.pool_type != PoolType::Curve {
            return;
        }

        match self
            .fdv
            .compute_curve_fdv(selected.pool_address, selected.project.token_address)
            .await
        {
            Ok(Some(figure)) => self.api.update_onchain_fdv(figure),
            Ok(None) => {}
            Err(e) => {
                tracing::debug!(error = %e, "On-chain FDV unavailable");
                if let Some(mcap) = self.latest_catalog_mcap {
                    let usd = self.fdv.usd_cache().virtual_usd_price().await;
                    self.api.update_api_fdv(figure_from_catalog(mcap, usd));
                }
            }
        }
    }

    fn graduation_poll_due(&self, now: DateTime<Utc>) -> bool {
        self.last_graduation_poll
            .map_or(true, |t| now - t >= ChronoDuration::seconds(GRADUATION_POLL_SECONDS))
    }

    /// Ask the catalog whether the project graduated. Lookup failures are
    /// logged and retried at the next poll rather than failing the tick.
    async fn check_graduation(&mut self, now: DateTime<Utc>) -> Result<bool> {
        self.last_graduation_poll = Some(now);
        let Some(selected) = self.ctx.selected.as_ref() else {
            return Ok(false);
        };

        match self.catalog.by_id(selected.project.id).await {
            Ok(Some(project)) => {
                if project.mcap_in_virtual.is_some() {
                    self.latest_catalog_mcap = project.mcap_in_virtual;
                }
                Ok(project.is_graduated())
            }
            Ok(None) => Ok(false),
            Err(e) => {
                tracing::warn!(error = %e, "Graduation poll failed");
                Ok(false)
            }
        }
    }

    // ================================================================
    // buyback_phase
    // ================================================================

    async fn enter_buyback(&mut self) -> Result<()> {
        let budget = self.ctx.tax_total;
        let receiver = self.settings.buyback_address();
        let tracker = Arc::new(Mutex::new(BuybackTracker::new(
            budget,
            self.settings.buyback_rate_window(),
            self.settings.stall_alert(),
        )));

        let client = PushClient::new(self.pool.clone());
        client.connect().await?;
        let filter = Filter::new()
            .address(self.settings.virtual_token_address())
            .event_signature(IErc20::Transfer::SIGNATURE_HASH)
            .topic1(receiver.into_word());
        let logs = client.subscribe(filter).await?;

        let task = tokio::spawn(buyback::run_loop(tracker.clone(), receiver, logs));
        self.buyback = Some(BuybackHandle {
            tracker,
            client,
            task,
        });

        self.ctx.last_buyback_refresh = Some(Utc::now());
        self.notifier
            .notify(&format!(
                "Buyback phase: budget {} VIRTUAL",
                format_display(budget)
            ))
            .await;
        self.transition(Phase::BuybackPhase);
        Ok(())
    }

    async fn handle_buyback(&mut self) -> Result<()> {
        let now = Utc::now();

        let Some(handle) = self.buyback.as_ref() else {
            // Subscription setup failed earlier; retry the entry action.
            return self.enter_buyback().await;
        };
        let tracker = handle.tracker.clone();

        if tracker.lock().is_complete() {
            self.transition(Phase::Done);
            return Ok(());
        }

        if tracker.lock().check_stall(now) {
            let last = tracker.lock().last_spent_at();
            let text = format!(
                "Buyback stalled: no spend since {}",
                last.map(|t| t.to_rfc3339()).unwrap_or_default()
            );
            self.api.emit(
                EventKind::Error,
                serde_json::json!({ "message": text, "lastSpentAt": last }),
            );
            self.notifier.notify(&text).await;
        }

        if self.graduation_poll_due(now) {
            if self.check_graduation(now).await? {
                self.transition(Phase::Done);
                return Ok(());
            }
        }

        let publish_due = self
            .ctx
            .last_buyback_refresh
            .map_or(true, |t| now - t >= ChronoDuration::minutes(BUYBACK_PUBLISH_MINUTES));
        if publish_due {
            let status = tracker.lock().status(now);
            let text = format!(
                "Buyback progress: {:.1}% spent, {} VIRTUAL remaining",
                status.progress,
                format_display(status.remaining)
            );
            self.api.update_buyback(status);
            self.ctx.last_buyback_refresh = Some(now);
            self.api.update_context(&self.ctx);
            self.notifier.notify(&text).await;
        }

        Ok(())
    }

    // ================================================================
    // done
    // ================================================================

    async fn handle_done(&mut self) -> Result<()> {
        let summary = match (&self.ctx.selected, &self.buyback) {
            (Some(selected), Some(handle)) => {
                let status = handle.tracker.lock().status(Utc::now());
                serde_json::json!({
                    "id": selected.project.id,
                    "symbol": selected.project.symbol,
                    "taxTotal": self.ctx.tax_total.to_string(),
                    "spentTotal": status.spent_total.to_string(),
                    "progress": status.progress,
                })
            }
            (Some(selected), None) => serde_json::json!({
                "id": selected.project.id,
                "symbol": selected.project.symbol,
                "taxTotal": self.ctx.tax_total.to_string(),
            }),
            _ => serde_json::json!({}),
        };

        self.api.emit(EventKind::ProjectComplete, summary);
        if let Some(selected) = &self.ctx.selected {
            self.notifier
                .notify(&format!(
                    "Run complete for {} ({})",
                    selected.project.name, selected.project.symbol
                ))
                .await;
        }

        self.teardown_monitors().await;
        self.ctx.reset();
        self.transition(Phase::Discover);
        Ok(())
    }

    // ================================================================
    // teardown
    // ================================================================

    async fn teardown_monitors(&mut self) {
        if let Some(handle) = self.whale.take() {
            handle.client.destroy().await;
            handle.task.abort();
        }
        if let Some(handle) = self.buyback.take() {
            handle.client.destroy().await;
            handle.task.abort();
        }
        self.tax = None;
    }

    async fn cleanup(&mut self) {
        self.teardown_monitors().await;
        self.api.update_context(&self.ctx);
        self.pool.shutdown();
    }
}
