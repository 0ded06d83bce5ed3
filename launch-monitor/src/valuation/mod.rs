//! Market-cap estimation: on-chain curve price x total supply, quoted in the
//! base token and optionally USD.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy_primitives::{Address, U256};
use parking_lot::Mutex;
use serde::Serialize;

use crate::contracts::{IBondingCurve, IErc20};
use crate::rpc::RpcPool;
use crate::utils::{format_display, to_display, Result};

const QUOTE_TTL: Duration = Duration::from_secs(10);
const QUOTE_TIMEOUT: Duration = Duration::from_secs(5);

/// Fully-diluted valuation figure. The virtual-denominated value is a
/// decimal string so integer precision survives JSON.
#[derive(Debug, Clone, Serialize)]
pub struct FdvFigure {
    #[serde(rename = "fdvVirtual")]
    pub fdv_virtual: String,
    #[serde(rename = "fdvUsd")]
    pub fdv_usd: Option<f64>,
}

/// Single external USD quote with a short stale-tolerant cache.
pub struct UsdQuoteCache {
    http: reqwest::Client,
    url: String,
    state: Mutex<Option<(Instant, f64)>>,
}

impl UsdQuoteCache {
    pub fn new(url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(QUOTE_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            url: url.into(),
            state: Mutex::new(None),
        }
    }

    /// USD price of the base token. Serves the cached value inside the TTL;
    /// on fetch failure falls back to the last known value, however stale.
    pub async fn virtual_usd_price(&self) -> Option<f64> {
        if let Some((at, price)) = *self.state.lock() {
            if at.elapsed() < QUOTE_TTL {
                return Some(price);
            }
        }

        match self.fetch().await {
            Some(price) => {
                *self.state.lock() = Some((Instant::now(), price));
                Some(price)
            }
            None => {
                let stale = self.state.lock().map(|(_, price)| price);
                if stale.is_some() {
                    tracing::debug!("USD quote fetch failed, serving stale value");
                }
                stale
            }
        }
    }

    /// Expects the coingecko simple-price shape:
    /// `{"<id>": {"usd": 1.23}}`.
    async fn fetch(&self) -> Option<f64> {
        let response = self.http.get(&self.url).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        let body: HashMap<String, HashMap<String, f64>> = response.json().await.ok()?;
        body.values().next()?.get("usd").copied()
    }

    #[cfg(test)]
    pub fn seed(&self, price: f64) {
        *self.state.lock() = Some((Instant::now(), price));
    }
}

/// Reads curve price and token supply to produce an FDV figure.
pub struct FdvCalculator {
    pool: Arc<RpcPool>,
    usd: UsdQuoteCache,
}

impl FdvCalculator {
    pub fn new(pool: Arc<RpcPool>, usd_price_url: impl Into<String>) -> Self {
        Self {
            pool,
            usd: UsdQuoteCache::new(usd_price_url),
        }
    }

    pub fn usd_cache(&self) -> &UsdQuoteCache {
        &self.usd
    }

    /// Discover the project token behind a curve: `token()`, falling back
    /// to `agentToken()`. Zero addresses are treated as absent.
    pub async fn token_from_curve(&self, curve: Address) -> Result<Option<Address>> {
        let primary = self
            .pool
            .call(|provider| async move {
                let contract = IBondingCurve::new(curve, provider);
                contract.token().call().await.map_err(Into::into)
            })
            .await;

        if let Ok(address) = primary {
            if address != Address::ZERO {
                return Ok(Some(address));
            }
        }

        let fallback = self
            .pool
            .call(|provider| async move {
                let contract = IBondingCurve::new(curve, provider);
                contract.agentToken().call().await.map_err(Into::into)
            })
            .await?;

        Ok((fallback != Address::ZERO).then_some(fallback))
    }

    async fn curve_price(&self, curve: Address) -> Result<U256> {
        let primary = self
            .pool
            .call(|provider| async move {
                let contract = IBondingCurve::new(curve, provider);
                contract.getTokenPrice().call().await.map_err(Into::into)
            })
            .await;

        match primary {
            Ok(price) => Ok(price),
            Err(_) => {
                self.pool
                    .call(|provider| async move {
                        let contract = IBondingCurve::new(curve, provider);
                        contract.getPrice().call().await.map_err(Into::into)
                    })
                    .await
            }
        }
    }

    async fn total_supply(&self, token: Address) -> Result<U256> {
        self.pool
            .call(|provider| async move {
                let contract = IErc20::new(token, provider);
                contract.totalSupply().call().await.map_err(Into::into)
            })
            .await
    }

    /// FDV of a pre-graduation curve. Returns `None` when no project token
    /// can be discovered; any on-chain failure propagates so the caller can
    /// fall back to the catalog estimate.
    pub async fn compute_curve_fdv(
        &self,
        curve: Address,
        token_hint: Option<Address>,
    ) -> Result<Option<FdvFigure>> {
        let token = match token_hint {
            Some(token) if token != Address::ZERO => token,
            _ => match self.token_from_curve(curve).await? {
                Some(token) => token,
                None => return Ok(None),
            },
        };

        let price = self.curve_price(curve).await?;
        let supply = self.total_supply(token).await?;

        Ok(Some(self.figure_from(price, supply).await))
    }

    /// `fdv = price x supply / 10^18`, USD-quoted when a rate is available.
    async fn figure_from(&self, price: U256, supply: U256) -> FdvFigure {
        let wad = U256::from(10u64).pow(U256::from(18u64));
        let fdv = price.saturating_mul(supply) / wad;
        let fdv_usd = self
            .usd
            .virtual_usd_price()
            .await
            .map(|rate| to_display(fdv) * rate);

        FdvFigure {
            fdv_virtual: format_display(fdv),
            fdv_usd,
        }
    }
}

/// Catalog-reported market cap, marked as an estimate by the API layer.
pub fn figure_from_catalog(mcap_in_virtual: f64, usd_rate: Option<f64>) -> FdvFigure {
    FdvFigure {
        fdv_virtual: format!("{}", mcap_in_virtual),
        fdv_usd: usd_rate.map(|rate| mcap_in_virtual * rate),
    }
}
