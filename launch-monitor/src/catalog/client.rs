use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Duration as ChronoDuration, Utc};
use serde::de::DeserializeOwned;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

use super::selection::{select_project, SelectionParams};
use super::types::{FactoryTag, Page, Project, ProjectSort, ProjectStatus, SelectedProject};
use crate::utils::{Backoff, MonitorError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_ATTEMPTS: u32 = 3;
const RETRY_BASE: Duration = Duration::from_secs(1);
const RETRY_CAP: Duration = Duration::from_secs(10);
const DISCOVERY_FAILURE_CAP: Duration = Duration::from_secs(30);
const MAX_CONSECUTIVE_FAILURES: u32 = 10;
const UPCOMING_TTL: Duration = Duration::from_secs(30);
const UPCOMING_HORIZON_DAYS: i64 = 10;
const EXHAUSTIVE_PAGE_SIZE: u32 = 100;

/// Discovery-loop knobs taken from settings.
#[derive(Debug, Clone)]
pub struct DiscoveryParams {
    pub poll_interval: Duration,
    pub tax_window: Duration,
    pub max_project_age: Duration,
    pub preferred_symbol: Option<String>,
}

type UpcomingResult = Option<Arc<Vec<Project>>>;

/// TTL cache + single-flight guard for the upcoming-launch aggregation:
/// one mutex over `{cached?, inflight?}`, late arrivers await the leader's
/// done-channel.
struct UpcomingState {
    cached: Option<(Instant, Arc<Vec<Project>>)>,
    inflight: Option<watch::Receiver<UpcomingResult>>,
}

/// Off-chain project catalog client. All operations are idempotent reads.
pub struct CatalogClient {
    http: reqwest::Client,
    base_url: String,
    upcoming: Mutex<UpcomingState>,
}

impl CatalogClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            upcoming: Mutex::new(UpcomingState {
                cached: None,
                inflight: None,
            }),
        }
    }

    // ================================================================
    // HTTP plumbing
    // ================================================================

    /// GET with retry: 3 attempts, 1 s doubling to a 10 s cap. A 404 aborts
    /// retries immediately so single-resource lookups can map it to "none".
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let mut backoff = Backoff::new(RETRY_BASE, RETRY_CAP);
        let mut last_err = None;

        for attempt in 0..REQUEST_ATTEMPTS {
            match self.http.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .json::<T>()
                            .await
                            .map_err(|e| MonitorError::api(status.as_u16(), url, e));
                    }
                    let err = MonitorError::api(status.as_u16(), url, "unexpected status");
                    if status == reqwest::StatusCode::NOT_FOUND {
                        return Err(err);
                    }
                    last_err = Some(err);
                }
                Err(e) => {
                    let status = e.status().map(|s| s.as_u16()).unwrap_or(0);
                    last_err = Some(MonitorError::api(status, url, e));
                }
            }

            if attempt + 1 < REQUEST_ATTEMPTS {
                tokio::time::sleep(backoff.next()).await;
            }
        }

        Err(last_err.unwrap_or_else(|| MonitorError::api(0, url, "request failed")))
    }

    // ================================================================
    // Listings
    // ================================================================

    pub async fn list_by_sort(
        &self,
        sort: ProjectSort,
        page: u32,
        page_size: u32,
    ) -> Result<Page<Project>> {
        let url = format!(
            "{}/virtuals?sort={}&page={}&pageSize={}",
            self.base_url,
            sort.as_query(),
            page,
            page_size
        );
        self.get_json(&url).await
    }

    pub async fn list_by_factory(
        &self,
        factory: FactoryTag,
        page: u32,
        page_size: u32,
    ) -> Result<Page<Project>> {
        let url = format!(
            "{}/virtuals?factory={}&page={}&pageSize={}",
            self.base_url,
            factory.as_query(),
            page,
            page_size
        );
        self.get_json(&url).await
    }

    /// Walk every page of a factory listing until `pageCount` is reached.
    pub async fn list_all_by_factory(&self, factory: FactoryTag) -> Result<Vec<Project>> {
        let mut all = Vec::new();
        let mut page = 1;
        loop {
            let listing = self
                .list_by_factory(factory, page, EXHAUSTIVE_PAGE_SIZE)
                .await?;
            let page_count = listing.meta.pagination.page_count;
            all.extend(listing.data);
            if page >= page_count {
                return Ok(all);
            }
            page += 1;
        }
    }

    /// Single-resource lookup; 404 becomes `None`, other failures re-raise.
    pub async fn by_id(&self, id: u64) -> Result<Option<Project>> {
        let url = format!("{}/virtuals/{}", self.base_url, id);
        match self.get_json::<Project>(&url).await {
            Ok(project) => Ok(Some(project)),
            Err(MonitorError::Api { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    // ================================================================
    // Upcoming launches (30 s TTL + single-flight)
    // ================================================================

    pub async fn upcoming_launches(&self) -> Result<Arc<Vec<Project>>> {
        let tx = loop {
            let mut state = self.upcoming.lock().await;
            if let Some((at, cached)) = &state.cached {
                if at.elapsed() < UPCOMING_TTL {
                    return Ok(cached.clone());
                }
            }
            match &state.inflight {
                Some(rx) => {
                    let mut rx = rx.clone();
                    drop(state);
                    let _ = rx.changed().await;
                    let value = rx.borrow().clone();
                    match value {
                        Some(result) => return Ok(result),
                        // Leader failed; loop to retry or join a newer flight.
                        None => continue,
                    }
                }
                None => {
                    let (tx, rx) = watch::channel(None);
                    state.inflight = Some(rx);
                    break tx;
                }
            }
        };

        let result = self.fetch_upcoming().await;

        let mut state = self.upcoming.lock().await;
        state.inflight = None;
        match result {
            Ok(list) => {
                let shared = Arc::new(list);
                state.cached = Some((Instant::now(), shared.clone()));
                let _ = tx.send(Some(shared.clone()));
                Ok(shared)
            }
            Err(e) => {
                let _ = tx.send(None);
                Err(e)
            }
        }
    }

    /// Exhaust the three bonding factories concurrently, merge keep-first by
    /// id, keep pre-launch projects scheduled within the next ten days, and
    /// order them soonest first.
    async fn fetch_upcoming(&self) -> Result<Vec<Project>> {
        let (v2, v4, vibes) = tokio::try_join!(
            self.list_all_by_factory(FactoryTag::BondingV2),
            self.list_all_by_factory(FactoryTag::BondingV4),
            self.list_all_by_factory(FactoryTag::Vibes),
        )?;

        let now = Utc::now();
        let horizon = now + ChronoDuration::days(UPCOMING_HORIZON_DAYS);

        let mut merged: HashMap<u64, Project> = HashMap::new();
        for project in v2.into_iter().chain(v4).chain(vibes) {
            merged.entry(project.id).or_insert(project);
        }

        let mut upcoming: Vec<Project> = merged
            .into_values()
            .filter(|p| {
                p.status == ProjectStatus::Initialized
                    && p.pre_token_pair.is_some()
                    && p.lp_created_at.is_none()
                    && p.launched_at.is_some_and(|t| t >= now && t <= horizon)
            })
            .collect();
        upcoming.sort_by_key(|p| p.launched_at);

        Ok(upcoming)
    }

    // ================================================================
    // Discovery
    // ================================================================

    /// Poll the catalog until the selection policy produces a project.
    ///
    /// Each iteration merges the two freshest sort views. Any successful
    /// fetch resets the consecutive-failure counter; ten consecutive
    /// failures give up with a fatal error.
    pub async fn discover_project(
        &self,
        params: &DiscoveryParams,
        cancel: &CancellationToken,
    ) -> Result<SelectedProject> {
        let mut failures: u32 = 0;
        let mut failure_backoff = Backoff::new(RETRY_BASE, DISCOVERY_FAILURE_CAP);

        loop {
            if cancel.is_cancelled() {
                return Err(MonitorError::Generic("discovery cancelled".into()));
            }

            let (created, launched) = tokio::join!(
                self.list_by_sort(ProjectSort::CreatedDesc, 1, EXHAUSTIVE_PAGE_SIZE),
                self.list_by_sort(ProjectSort::LaunchedDesc, 1, EXHAUSTIVE_PAGE_SIZE),
            );

            let mut candidates: Vec<Project> = Vec::new();
            let mut any_success = false;
            for outcome in [created, launched] {
                match outcome {
                    Ok(page) => {
                        any_success = true;
                        candidates.extend(page.data);
                    }
                    Err(e) => tracing::warn!(error = %e, "Discovery fetch failed"),
                }
            }

            if !any_success {
                failures += 1;
                if failures >= MAX_CONSECUTIVE_FAILURES {
                    return Err(MonitorError::Generic(format!(
                        "catalog unreachable after {} consecutive discovery failures",
                        failures
                    )));
                }
                let delay = failure_backoff.next();
                tracing::warn!(failures, delay_ms = delay.as_millis() as u64, "Discovery backing off");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => continue,
                    _ = cancel.cancelled() => continue,
                }
            }

            failures = 0;
            failure_backoff.reset();

            let now = Utc::now();
            let max_age = ChronoDuration::from_std(params.max_project_age)
                .unwrap_or_else(|_| ChronoDuration::days(365));

            // Merge by id (keep-first) and drop entries older than the
            // configured project age before the policy runs.
            let mut merged: HashMap<u64, Project> = HashMap::new();
            for project in candidates {
                if now - project.created_at > max_age {
                    continue;
                }
                merged.entry(project.id).or_insert(project);
            }
            let merged: Vec<Project> = merged.into_values().collect();

            let selection_params = SelectionParams {
                now,
                tax_window: params.tax_window,
                preferred_symbol: params.preferred_symbol.clone(),
            };

            if let Some(selected) = select_project(&merged, &selection_params) {
                tracing::info!(
                    id = selected.project.id,
                    symbol = %selected.project.symbol,
                    t0 = %selected.t0,
                    "Project selected"
                );
                return Ok(selected);
            }

            tracing::debug!(candidates = merged.len(), "No candidate selected, polling again");
            tokio::select! {
                _ = tokio::time::sleep(params.poll_interval) => {}
                _ = cancel.cancelled() => {}
            }
        }
    }
}
