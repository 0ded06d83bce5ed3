use alloy_primitives::{Address, U256};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::catalog::{FactoryTag, PoolType, ProjectStatus};
use crate::config::settings::ThresholdSettings;
use crate::machine::Phase;
use crate::utils::amounts::{amount_string, amount_string_opt};

/// Project summary inside the state snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectDto {
    pub id: u64,
    pub name: String,
    pub symbol: String,
    pub factory: FactoryTag,
    pub status: ProjectStatus,
    #[serde(rename = "poolAddress")]
    pub pool_address: Address,
    #[serde(rename = "poolType")]
    pub pool_type: PoolType,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaxDto {
    #[serde(rename = "netInflow")]
    pub net_inflow: String,
    #[serde(rename = "balanceDiff")]
    pub balance_diff: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuybackDto {
    #[serde(rename = "spentTotal")]
    pub spent_total: String,
    pub progress: f64,
    /// `null` encodes an infinite ETA.
    #[serde(rename = "etaHours")]
    pub eta_hours: Option<f64>,
    #[serde(rename = "ratePerHour", skip_serializing_if = "Option::is_none")]
    pub rate_per_hour: Option<f64>,
    #[serde(rename = "lastTxAmount", skip_serializing_if = "Option::is_none")]
    pub last_tx_amount: Option<String>,
}

/// `GET /api/state` body; also the payload of `state_change` broadcasts.
#[derive(Debug, Clone, Serialize)]
pub struct StateResponse {
    pub state: Phase,
    pub project: Option<ProjectDto>,
    pub t0: Option<DateTime<Utc>>,
    pub t1: Option<DateTime<Utc>>,
    #[serde(rename = "taxTotal", with = "amount_string")]
    pub tax_total: U256,
    #[serde(
        rename = "startBalance",
        with = "amount_string_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub start_balance: Option<U256>,
    #[serde(rename = "elapsedMinutes")]
    pub elapsed_minutes: i64,
    #[serde(rename = "remainingMinutes")]
    pub remaining_minutes: i64,
    #[serde(rename = "onchainFdvVirtual", skip_serializing_if = "Option::is_none")]
    pub onchain_fdv_virtual: Option<String>,
    #[serde(rename = "onchainFdvUsd", skip_serializing_if = "Option::is_none")]
    pub onchain_fdv_usd: Option<f64>,
    #[serde(rename = "apiFdvVirtual", skip_serializing_if = "Option::is_none")]
    pub api_fdv_virtual: Option<String>,
    #[serde(rename = "apiFdvUsd", skip_serializing_if = "Option::is_none")]
    pub api_fdv_usd: Option<f64>,
    pub tax: Option<TaxDto>,
    pub buyback: Option<BuybackDto>,
}

/// `GET /api/config` body: `{chain, thresholds, virtuals}` only. Every
/// config string may carry `${ENV}`-substituted credentials, so endpoint
/// URLs surface as counts and the virtuals block is cut down to its three
/// public fields.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigResponse {
    pub chain: ChainConfigDto,
    pub thresholds: ThresholdSettings,
    pub virtuals: VirtualsConfigDto,
}

#[derive(Debug, Clone, Serialize)]
pub struct VirtualsConfigDto {
    #[serde(rename = "apiBase")]
    pub api_base: String,
    #[serde(rename = "pollIntervalMs")]
    pub poll_interval_ms: u64,
    #[serde(rename = "maxProjectAgeMinutes")]
    pub max_project_age_minutes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChainConfigDto {
    #[serde(rename = "avgBlockTimeSecs")]
    pub avg_block_time_secs: f64,
    pub rpc: RpcCountsDto,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcCountsDto {
    #[serde(rename = "httpEndpoints")]
    pub http_endpoints: usize,
    #[serde(rename = "wssEndpoints")]
    pub wss_endpoints: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
