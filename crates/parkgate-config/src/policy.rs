//! Validated configuration structures

use crate::schema::{
    RawConfig, RawHardwareConfig, RawHubConfig, RawPipelineConfig, RawRate, RawTokenRules,
};
use parkgate_api::{Amount, RatePolicy};
use parkgate_util::{PaymentMethodId, VehicleTypeId};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_HUB_PORT: u16 = 5000;
pub const DEFAULT_HUB_PATH: &str = "/ws";
pub const DEFAULT_SCAN_PORT: u16 = 25900;
pub const DEFAULT_VEHICLE_TYPE: u32 = 1;
pub const DEFAULT_PAYMENT_METHOD: u32 = 1;
pub const DEFAULT_TOKEN_MIN_LEN: usize = 4;
pub const DEFAULT_TOKEN_MAX_LEN: usize = 16;

/// Wildcard entry in `allowed_origins`
pub const ANY_ORIGIN: &str = "*";

/// Validated configuration ready for use by the service
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub hub: HubConfig,
    pub pipeline: PipelineConfig,
    pub tokens: TokenRules,
    pub hardware: HardwareConfig,

    /// Shared, replaced only as a whole
    pub rates: Arc<RateTable>,
}

impl Config {
    /// Convert from raw config (after validation).
    ///
    /// Returns `None` if the default vehicle type has no rate.
    pub fn from_raw(raw: RawConfig) -> Option<Self> {
        let pipeline = PipelineConfig::from_raw(raw.pipeline);
        let rates = RateTable::new(
            raw.rates.into_iter().map(convert_rate).collect(),
            pipeline.default_vehicle_type,
        )?;

        Some(Self {
            data_dir: raw
                .service
                .data_dir
                .unwrap_or_else(parkgate_util::default_data_dir),
            hub: HubConfig::from_raw(raw.hub),
            pipeline,
            tokens: TokenRules::from_raw(raw.tokens),
            hardware: HardwareConfig::from_raw(raw.hardware),
            rates: Arc::new(rates),
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(parkgate_util::DATABASE_FILENAME)
    }

    pub fn images_dir(&self) -> PathBuf {
        self.data_dir.join("images")
    }
}

/// Broadcast hub listener configuration
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub bind: String,
    pub port: u16,
    pub path: String,
    pub allowed_origins: Vec<String>,
    pub send_timeout: Duration,
    pub handshake_timeout: Duration,
}

impl HubConfig {
    fn from_raw(raw: RawHubConfig) -> Self {
        let defaults = Self::default();
        Self {
            bind: raw.bind.unwrap_or(defaults.bind),
            port: raw.port.unwrap_or(defaults.port),
            path: raw.path.unwrap_or(defaults.path),
            allowed_origins: raw.allowed_origins.unwrap_or(defaults.allowed_origins),
            send_timeout: raw
                .send_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.send_timeout),
            handshake_timeout: raw
                .handshake_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.handshake_timeout),
        }
    }

    /// Whether a handshake carrying `origin` may proceed
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        match origin {
            None => true,
            Some(origin) => self
                .allowed_origins
                .iter()
                .any(|allowed| allowed == ANY_ORIGIN || allowed.eq_ignore_ascii_case(origin)),
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: DEFAULT_HUB_PORT,
            path: DEFAULT_HUB_PATH.into(),
            allowed_origins: vec![ANY_ORIGIN.into()],
            send_timeout: Duration::from_secs(2),
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

/// Entry/exit pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub store_timeout: Duration,
    pub partitions: usize,
    pub default_vehicle_type: VehicleTypeId,
    pub default_payment_method: PaymentMethodId,
}

impl PipelineConfig {
    fn from_raw(raw: RawPipelineConfig) -> Self {
        let defaults = Self::default();
        Self {
            store_timeout: raw
                .store_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.store_timeout),
            partitions: raw.partitions.unwrap_or(defaults.partitions),
            default_vehicle_type: raw
                .default_vehicle_type
                .map(VehicleTypeId)
                .unwrap_or(defaults.default_vehicle_type),
            default_payment_method: raw
                .default_payment_method
                .map(PaymentMethodId)
                .unwrap_or(defaults.default_payment_method),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(5),
            partitions: 4,
            default_vehicle_type: VehicleTypeId(DEFAULT_VEHICLE_TYPE),
            default_payment_method: PaymentMethodId(DEFAULT_PAYMENT_METHOD),
        }
    }
}

/// Length bounds for normalized identifier tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenRules {
    pub min_len: usize,
    pub max_len: usize,
}

impl TokenRules {
    fn from_raw(raw: RawTokenRules) -> Self {
        Self {
            min_len: raw.min_len.unwrap_or(DEFAULT_TOKEN_MIN_LEN),
            max_len: raw.max_len.unwrap_or(DEFAULT_TOKEN_MAX_LEN),
        }
    }
}

impl Default for TokenRules {
    fn default() -> Self {
        Self {
            min_len: DEFAULT_TOKEN_MIN_LEN,
            max_len: DEFAULT_TOKEN_MAX_LEN,
        }
    }
}

/// Lane hardware endpoints
#[derive(Debug, Clone)]
pub struct HardwareConfig {
    pub scan_bind: String,
    pub scan_port: u16,
    pub entry_gate_url: Option<String>,
    pub exit_gate_url: Option<String>,
    pub entry_camera_url: Option<String>,
    pub exit_camera_url: Option<String>,
    pub request_timeout: Duration,
}

impl HardwareConfig {
    fn from_raw(raw: RawHardwareConfig) -> Self {
        let defaults = Self::default();
        Self {
            scan_bind: raw.scan_bind.unwrap_or(defaults.scan_bind),
            scan_port: raw.scan_port.unwrap_or(defaults.scan_port),
            entry_gate_url: raw.entry_gate_url,
            exit_gate_url: raw.exit_gate_url,
            entry_camera_url: raw.entry_camera_url,
            exit_camera_url: raw.exit_camera_url,
            request_timeout: raw
                .request_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.request_timeout),
        }
    }
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            scan_bind: "0.0.0.0".into(),
            scan_port: DEFAULT_SCAN_PORT,
            entry_gate_url: None,
            exit_gate_url: None,
            entry_camera_url: None,
            exit_camera_url: None,
            request_timeout: Duration::from_secs(3),
        }
    }
}

/// Rate policies keyed by vehicle type, with a fallback for unknown types
#[derive(Debug, Clone)]
pub struct RateTable {
    policies: HashMap<VehicleTypeId, RatePolicy>,
    fallback: RatePolicy,
}

impl RateTable {
    /// Build a table; `None` if `fallback_type` has no policy
    pub fn new(policies: Vec<RatePolicy>, fallback_type: VehicleTypeId) -> Option<Self> {
        let policies: HashMap<_, _> = policies
            .into_iter()
            .map(|p| (p.vehicle_type_id, p))
            .collect();
        let fallback = policies.get(&fallback_type)?.clone();
        Some(Self { policies, fallback })
    }

    /// Table holding a single policy that also serves as the fallback
    pub fn single(policy: RatePolicy) -> Self {
        let mut policies = HashMap::new();
        policies.insert(policy.vehicle_type_id, policy.clone());
        Self {
            policies,
            fallback: policy,
        }
    }

    /// Policy for `vehicle_type`, or the fallback policy
    pub fn policy_for(&self, vehicle_type: VehicleTypeId) -> &RatePolicy {
        match self.policies.get(&vehicle_type) {
            Some(policy) => policy,
            None => {
                tracing::warn!(
                    vehicle_type = %vehicle_type,
                    fallback = %self.fallback.vehicle_type_id,
                    "No rate for vehicle type, using fallback"
                );
                &self.fallback
            }
        }
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Policies ordered by vehicle type
    pub fn policies(&self) -> Vec<&RatePolicy> {
        let mut all: Vec<_> = self.policies.values().collect();
        all.sort_by_key(|p| p.vehicle_type_id);
        all
    }
}

fn convert_rate(raw: RawRate) -> RatePolicy {
    RatePolicy {
        vehicle_type_id: VehicleTypeId(raw.vehicle_type),
        first_hour_rate: Amount(raw.first_hour),
        next_hour_rate: Amount(raw.next_hour),
        max_daily_rate: Amount(raw.max_daily),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(vt: u32, first: u64) -> RatePolicy {
        RatePolicy {
            vehicle_type_id: VehicleTypeId(vt),
            first_hour_rate: Amount(first),
            next_hour_rate: Amount(1000),
            max_daily_rate: Amount(20000),
        }
    }

    #[test]
    fn rate_table_falls_back() {
        let table = RateTable::new(vec![policy(1, 2000), policy(2, 5000)], VehicleTypeId(2)).unwrap();

        assert_eq!(table.policy_for(VehicleTypeId(1)).first_hour_rate, Amount(2000));
        assert_eq!(table.policy_for(VehicleTypeId(9)).vehicle_type_id, VehicleTypeId(2));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn rate_table_requires_fallback() {
        assert!(RateTable::new(vec![policy(1, 2000)], VehicleTypeId(3)).is_none());
    }

    #[test]
    fn origin_policy() {
        let any = HubConfig::default();
        assert!(any.origin_allowed(Some("http://evil.example")));
        assert!(any.origin_allowed(None));

        let restricted = HubConfig {
            allowed_origins: vec!["http://dashboard.local".into()],
            ..HubConfig::default()
        };
        assert!(restricted.origin_allowed(Some("http://dashboard.local")));
        assert!(restricted.origin_allowed(None));
        assert!(!restricted.origin_allowed(Some("http://evil.example")));
    }
}
