use std::env;
use std::time::Duration;

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::utils::{parse_display, MonitorError, Result};

pub const DEFAULT_HEALTH_PORT: u16 = 3000;
pub const DEFAULT_API_PORT: u16 = 4000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub chain: ChainSettings,
    pub virtuals: VirtualsSettings,
    pub addresses: AddressSettings,
    pub thresholds: ThresholdSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSettings {
    pub rpc: RpcEndpoints,
    #[serde(rename = "avgBlockTimeSecs", default = "default_avg_block_time")]
    pub avg_block_time_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcEndpoints {
    pub http: Vec<String>,
    pub wss: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualsSettings {
    #[serde(rename = "apiBase")]
    pub api_base: String,
    #[serde(rename = "pollIntervalMs")]
    pub poll_interval_ms: u64,
    #[serde(rename = "maxProjectAgeMinutes")]
    pub max_project_age_minutes: u64,
    #[serde(rename = "preferredSymbol", default)]
    pub preferred_symbol: Option<String>,
    #[serde(rename = "usdPriceUrl", default = "default_usd_price_url")]
    pub usd_price_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressSettings {
    #[serde(rename = "buybackAddr")]
    pub buyback_addr: String,
    #[serde(rename = "virtualToken")]
    pub virtual_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdSettings {
    /// Whale threshold in whole base tokens, e.g. "1000" or "2500.5".
    #[serde(rename = "bigTradeVirtual")]
    pub big_trade_virtual: String,
    #[serde(rename = "taxWindowMinutes")]
    pub tax_window_minutes: u64,
    #[serde(rename = "buybackRateWindowMinutes")]
    pub buyback_rate_window_minutes: u64,
    #[serde(rename = "stallAlertMinutes")]
    pub stall_alert_minutes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub level: String,
}

fn default_avg_block_time() -> f64 {
    2.0
}

fn default_usd_price_url() -> String {
    "https://api.coingecko.com/api/v3/simple/price?ids=virtual-protocol&vs_currencies=usd"
        .to_string()
}

impl Settings {
    /// Load from `CONFIG_PATH` (default `config/default.yaml`), after
    /// applying `.env` to the process environment.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let path =
            env::var("CONFIG_PATH").unwrap_or_else(|_| "config/default.yaml".to_string());
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| MonitorError::Config(format!("cannot read {}: {}", path, e)))?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let mut doc: serde_yaml::Value = serde_yaml::from_str(raw)
            .map_err(|e| MonitorError::Config(format!("invalid YAML: {}", e)))?;
        expand_env(&mut doc)?;
        let settings: Settings = serde_yaml::from_value(doc)
            .map_err(|e| MonitorError::Config(format!("invalid config document: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chain.rpc.http.is_empty() {
            return Err(MonitorError::Config("chain.rpc.http must not be empty".into()));
        }
        if self.chain.rpc.wss.is_empty() {
            return Err(MonitorError::Config("chain.rpc.wss must not be empty".into()));
        }
        validate_address("addresses.buybackAddr", &self.addresses.buyback_addr)?;
        validate_address("addresses.virtualToken", &self.addresses.virtual_token)?;
        self.big_trade_threshold()?;
        for (name, minutes) in [
            ("thresholds.taxWindowMinutes", self.thresholds.tax_window_minutes),
            (
                "thresholds.buybackRateWindowMinutes",
                self.thresholds.buyback_rate_window_minutes,
            ),
            ("thresholds.stallAlertMinutes", self.thresholds.stall_alert_minutes),
        ] {
            if minutes == 0 {
                return Err(MonitorError::Config(format!("{} must be > 0", name)));
            }
        }
        Ok(())
    }

    pub fn buyback_address(&self) -> Address {
        // Validated at load time.
        self.addresses.buyback_addr.parse().unwrap_or(Address::ZERO)
    }

    pub fn virtual_token_address(&self) -> Address {
        self.addresses.virtual_token.parse().unwrap_or(Address::ZERO)
    }

    /// Whale threshold in base units.
    pub fn big_trade_threshold(&self) -> Result<U256> {
        parse_display(&self.thresholds.big_trade_virtual).ok_or_else(|| {
            MonitorError::Config(format!(
                "thresholds.bigTradeVirtual is not a decimal amount: {}",
                self.thresholds.big_trade_virtual
            ))
        })
    }

    pub fn tax_window(&self) -> Duration {
        Duration::from_secs(self.thresholds.tax_window_minutes * 60)
    }

    pub fn buyback_rate_window(&self) -> Duration {
        Duration::from_secs(self.thresholds.buyback_rate_window_minutes * 60)
    }

    pub fn stall_alert(&self) -> Duration {
        Duration::from_secs(self.thresholds.stall_alert_minutes * 60)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.virtuals.poll_interval_ms)
    }

    pub fn health_port() -> u16 {
        port_from_env("HEALTH_PORT", DEFAULT_HEALTH_PORT)
    }

    pub fn api_port() -> u16 {
        port_from_env("API_PORT", DEFAULT_API_PORT)
    }
}

fn port_from_env(name: &str, default: u16) -> u16 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn validate_address(field: &str, value: &str) -> Result<()> {
    let hex = value
        .strip_prefix("0x")
        .ok_or_else(|| MonitorError::Config(format!("{} must start with 0x", field)))?;
    if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(MonitorError::Config(format!(
            "{} must be 0x followed by 40 hex characters, got {}",
            field, value
        )));
    }
    Ok(())
}

/// Substitute `${ENV_NAME}` placeholders in every string value of the
/// document. A placeholder naming an unset variable is fatal.
fn expand_env(value: &mut serde_yaml::Value) -> Result<()> {
    match value {
        serde_yaml::Value::String(s) => {
            *s = expand_env_str(s)?;
        }
        serde_yaml::Value::Sequence(seq) => {
            for item in seq {
                expand_env(item)?;
            }
        }
        serde_yaml::Value::Mapping(map) => {
            for (_, v) in map.iter_mut() {
                expand_env(v)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn expand_env_str(input: &str) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| {
            MonitorError::Config(format!("unterminated ${{...}} placeholder in {:?}", input))
        })?;
        let name = &after[..end];
        let value = env::var(name).map_err(|_| {
            MonitorError::Config(format!("environment variable {} is not set", name))
        })?;
        out.push_str(&value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
chain:
  rpc:
    http: ["https://mainnet.base.org"]
    wss: ["wss://mainnet.base.org"]
  avgBlockTimeSecs: 2.0
virtuals:
  apiBase: "https://api.virtuals.io/api"
  pollIntervalMs: 15000
  maxProjectAgeMinutes: 720
addresses:
  buybackAddr: "0x8888888888888888888888888888888888888888"
  virtualToken: "0x0b3e328455c4059eeb9e3f84b5543f74e24e7e1b"
thresholds:
  bigTradeVirtual: "1000"
  taxWindowMinutes: 100
  buybackRateWindowMinutes: 20
  stallAlertMinutes: 5
logging:
  level: "info"
"#;

    #[test]
    fn test_sample_parses_and_validates() {
        let settings = Settings::from_yaml(SAMPLE).unwrap();
        assert_eq!(settings.chain.rpc.http.len(), 1);
        assert_eq!(settings.thresholds.tax_window_minutes, 100);
        assert_eq!(settings.tax_window(), Duration::from_secs(6000));
        assert_eq!(
            settings.big_trade_threshold().unwrap(),
            crate::utils::parse_display("1000").unwrap()
        );
        assert_ne!(settings.buyback_address(), Address::ZERO);
    }

    #[test]
    fn test_round_trip_preserves_logical_document() {
        let settings = Settings::from_yaml(SAMPLE).unwrap();
        let json = serde_json::to_string(&settings).unwrap();
        let back: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(back.virtuals.api_base, settings.virtuals.api_base);
        assert_eq!(back.thresholds.big_trade_virtual, settings.thresholds.big_trade_virtual);
        assert_eq!(back.addresses.buyback_addr, settings.addresses.buyback_addr);
        // Wire keys stay camelCase.
        assert!(json.contains("\"apiBase\""));
        assert!(json.contains("\"taxWindowMinutes\""));
    }

    #[test]
    fn test_env_placeholder_substitution() {
        env::set_var("TEST_LAUNCH_MONITOR_RPC", "https://rpc.example");
        let yaml = SAMPLE.replace(
            "https://mainnet.base.org\"]\n    wss",
            "${TEST_LAUNCH_MONITOR_RPC}\"]\n    wss",
        );
        let settings = Settings::from_yaml(&yaml).unwrap();
        assert_eq!(settings.chain.rpc.http[0], "https://rpc.example");
    }

    #[test]
    fn test_missing_env_is_config_error() {
        let yaml = SAMPLE.replace(
            "https://mainnet.base.org",
            "${TEST_LAUNCH_MONITOR_UNSET_VAR}",
        );
        let err = Settings::from_yaml(&yaml).unwrap_err();
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_empty_endpoint_list_rejected() {
        let yaml = SAMPLE.replace("wss: [\"wss://mainnet.base.org\"]", "wss: []");
        assert!(Settings::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_malformed_address_rejected() {
        let yaml = SAMPLE.replace(
            "0x8888888888888888888888888888888888888888",
            "0x1234",
        );
        assert!(Settings::from_yaml(&yaml).is_err());
    }
}
