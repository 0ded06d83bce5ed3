use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status as reported by the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Initialized,
    Undergrad,
    Available,
}

/// Which factory deployed the project's bonding curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FactoryTag {
    #[serde(rename = "bonding-v2")]
    BondingV2,
    #[serde(rename = "bonding-v4")]
    BondingV4,
    #[serde(rename = "vibes")]
    Vibes,
    #[serde(other, rename = "other")]
    Other,
}

impl FactoryTag {
    /// Query-string value for factory-filtered listings.
    pub fn as_query(&self) -> &'static str {
        match self {
            Self::BondingV2 => "bonding-v2",
            Self::BondingV4 => "bonding-v4",
            Self::Vibes => "vibes",
            Self::Other => "other",
        }
    }
}

/// Catalog sort orders used by discovery and upcoming-launch aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectSort {
    CreatedDesc,
    LpCreatedDesc,
    LaunchedDesc,
}

impl ProjectSort {
    pub fn as_query(&self) -> &'static str {
        match self {
            Self::CreatedDesc => "createdAt:desc",
            Self::LpCreatedDesc => "lpCreatedAt:desc",
            Self::LaunchedDesc => "launchedAt:desc",
        }
    }
}

/// One project as listed by the catalog. Immutable for one run through the
/// state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: u64,
    pub name: String,
    pub symbol: String,
    pub factory: FactoryTag,
    pub status: ProjectStatus,
    #[serde(rename = "preTokenPair", default)]
    pub pre_token_pair: Option<Address>,
    #[serde(rename = "lpAddress", default)]
    pub lp_address: Option<Address>,
    #[serde(rename = "tokenAddress", default)]
    pub token_address: Option<Address>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "launchedAt", default)]
    pub launched_at: Option<DateTime<Utc>>,
    #[serde(rename = "lpCreatedAt", default)]
    pub lp_created_at: Option<DateTime<Utc>>,
    #[serde(rename = "mcapInVirtual", default)]
    pub mcap_in_virtual: Option<f64>,
}

impl Project {
    /// Anchor moment `T0`: launch time, falling back to pool creation, then
    /// catalog creation.
    pub fn anchor_t0(&self) -> DateTime<Utc> {
        self.launched_at
            .or(self.lp_created_at)
            .unwrap_or(self.created_at)
    }

    /// Graduated means the catalog flipped it to `available` or attached a
    /// real post-launch pool.
    pub fn is_graduated(&self) -> bool {
        self.status == ProjectStatus::Available || self.lp_address.is_some()
    }
}

/// Pool flavour the monitors run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolType {
    #[serde(rename = "curve")]
    Curve,
    #[serde(rename = "ammv2")]
    AmmV2,
}

/// Descriptor plus the derived pool identity and anchor time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectedProject {
    pub project: Project,
    #[serde(rename = "poolAddress")]
    pub pool_address: Address,
    #[serde(rename = "poolType")]
    pub pool_type: PoolType,
    pub t0: DateTime<Utc>,
}

/// Paged listing envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub meta: PageMeta,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageMeta {
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Pagination {
    pub page: u32,
    #[serde(rename = "pageSize")]
    pub page_size: u32,
    #[serde(rename = "pageCount")]
    pub page_count: u32,
    pub total: u64,
}
