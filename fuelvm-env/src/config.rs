//! Runtime configuration.
//!
//! Everything has a default, so an empty TOML document is a valid
//! configuration. A few values may also be overridden from the environment.

use fuelvm_common::{
    fuel::{
        default_refill_amount, parse_fuel, DEFAULT_FUEL_REFILL_RATE, DEFAULT_MAX_EXECUTION_TIME,
        FUEL_ABSOLUTE_ACTION_AMOUNT, FUEL_EXTREME_ACTION_AMOUNT, FUEL_FASTEST_ACTION_AMOUNT,
        FUEL_FAST_ACTION_AMOUNT, FUEL_INSTANT_ACTION_AMOUNT, FUEL_LONG_ACTION_AMOUNT,
        FUEL_MID_ACTION_AMOUNT, FUEL_QUICK_ACTION_AMOUNT, FUEL_SLOW_ACTION_AMOUNT,
    },
    Fuel, VmOperation,
};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

use crate::{
    error::{VmError, VmResult},
    VmStandard,
};

/// Default interval between two fuel monitor samples.
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_millis(500);

/// Environment variable overriding the tank capacity, e.g. `100 vKFuel`.
pub const ENV_FUEL_TANK_CAPACITY: &str = "FUELVM_FUEL_TANK_CAPACITY";
/// Environment variable overriding the refuel amount, e.g. `5 vKFuel`.
pub const ENV_REFUEL_AMOUNT: &str = "FUELVM_REFUEL_AMOUNT";
/// Environment variable overriding the refuel rate, in milliseconds.
pub const ENV_REFUEL_RATE_MS: &str = "FUELVM_REFUEL_RATE_MS";
/// Environment variable overriding the max execution time, in milliseconds.
pub const ENV_MAX_EXECUTION_TIME_MS: &str = "FUELVM_MAX_EXECUTION_TIME_MS";

/// A fuel tier: calls up to `max_fuel` share `cores` concurrent slots.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierConfig {
    /// Inclusive fuel ceiling of the tier.
    pub max_fuel: Fuel,
    /// Size of the tier's core pool.
    pub cores: usize,
}

/// Pools serving one operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationPoolConfig {
    /// Operation served.
    pub operation: VmOperation,
    /// Size of the pool used when no tier matches.
    #[serde(default)]
    pub fallback: Option<usize>,
    /// Fuel tiers, matched by ascending ceiling.
    #[serde(default)]
    pub tiers: Vec<TierConfig>,
}

impl OperationPoolConfig {
    fn single(operation: VmOperation, cores: usize) -> Self {
        Self {
            operation,
            fallback: None,
            tiers: vec![TierConfig {
                max_fuel: operation.cost(),
                cores,
            }],
        }
    }
}

/// Shape of every core pool.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolsConfig {
    /// One entry per served operation.
    #[serde(default)]
    pub operations: Vec<OperationPoolConfig>,
}

impl VmStandard for PoolsConfig {
    fn vm_standard() -> anyhow::Result<Self> {
        let execute_tiers = [
            (FUEL_INSTANT_ACTION_AMOUNT, 1),
            (FUEL_QUICK_ACTION_AMOUNT, 3),
            (FUEL_FASTEST_ACTION_AMOUNT, 5),
            (FUEL_FAST_ACTION_AMOUNT, 8),
            (FUEL_MID_ACTION_AMOUNT, 10),
            (FUEL_SLOW_ACTION_AMOUNT, 12),
            (FUEL_EXTREME_ACTION_AMOUNT, 17),
            (FUEL_LONG_ACTION_AMOUNT, 15),
            (FUEL_ABSOLUTE_ACTION_AMOUNT, 20),
        ]
        .into_iter()
        .map(|(max_fuel, cores)| TierConfig { max_fuel, cores })
        .collect();

        Ok(Self {
            operations: vec![
                OperationPoolConfig {
                    operation: VmOperation::ExecuteContract,
                    fallback: Some(10),
                    tiers: execute_tiers,
                },
                OperationPoolConfig::single(VmOperation::CreateContract, 10),
                OperationPoolConfig::single(VmOperation::UpdateContract, 15),
                OperationPoolConfig::single(VmOperation::DeleteContract, 5),
                OperationPoolConfig::single(VmOperation::MakeContractRevision, 15),
                OperationPoolConfig::single(VmOperation::CreateUser, 5),
                OperationPoolConfig::single(VmOperation::UpdateUser, 10),
                OperationPoolConfig::single(VmOperation::DeleteUser, 5),
                OperationPoolConfig::single(VmOperation::Authenticate, 20),
                OperationPoolConfig::single(VmOperation::CreateAuth, 5),
                OperationPoolConfig::single(VmOperation::DeleteAuth, 5),
                OperationPoolConfig::single(VmOperation::VmStats, 5),
            ],
        })
    }
}

/// Configuration of a runtime instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Tank capacity, as `<amount> <unit>`.
    pub fuel_tank_capacity: String,
    /// Fuel given back at every station tick. Defaults to 5% of capacity.
    pub refuel_amount: Option<String>,
    /// Milliseconds between two station ticks.
    pub refuel_rate_ms: u64,
    /// Wall clock limit of contracts declaring more fuel than the largest
    /// execution bucket, in milliseconds.
    pub max_execution_time_ms: u64,
    /// Milliseconds between two monitor samples.
    pub monitor_interval_ms: u64,
    /// Core pool layout.
    pub pools: PoolsConfig,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            fuel_tank_capacity: "100 vKFuel".to_string(),
            refuel_amount: None,
            refuel_rate_ms: DEFAULT_FUEL_REFILL_RATE.as_millis() as u64,
            max_execution_time_ms: DEFAULT_MAX_EXECUTION_TIME.as_millis() as u64,
            monitor_interval_ms: DEFAULT_MONITOR_INTERVAL.as_millis() as u64,
            pools: PoolsConfig::default(),
        }
    }
}

impl VmStandard for VmConfig {
    fn vm_standard() -> anyhow::Result<Self> {
        Ok(Self {
            pools: PoolsConfig::vm_standard()?,
            ..Default::default()
        })
    }
}

impl VmConfig {
    /// Parses a TOML document. Missing pools fall back to the standard layout.
    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        if config.pools.operations.is_empty() {
            config.pools = PoolsConfig::vm_standard()?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    /// Serializes the configuration as TOML.
    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Applies the `FUELVM_*` environment overrides that are set.
    pub fn with_env_overrides(mut self) -> VmResult<Self> {
        if let Ok(capacity) = std::env::var(ENV_FUEL_TANK_CAPACITY) {
            self.fuel_tank_capacity = capacity;
        }
        if let Ok(amount) = std::env::var(ENV_REFUEL_AMOUNT) {
            self.refuel_amount = Some(amount);
        }
        if let Ok(rate) = std::env::var(ENV_REFUEL_RATE_MS) {
            self.refuel_rate_ms = parse_millis(ENV_REFUEL_RATE_MS, &rate)?;
        }
        if let Ok(limit) = std::env::var(ENV_MAX_EXECUTION_TIME_MS) {
            self.max_execution_time_ms = parse_millis(ENV_MAX_EXECUTION_TIME_MS, &limit)?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Checks every value that is parsed lazily.
    pub fn validate(&self) -> VmResult<()> {
        if self.tank_capacity()? == 0 {
            return Err(VmError::Config("fuel tank capacity must be positive".into()));
        }
        self.refill_amount()?;

        for (name, value) in [
            ("refuel_rate_ms", self.refuel_rate_ms),
            ("max_execution_time_ms", self.max_execution_time_ms),
            ("monitor_interval_ms", self.monitor_interval_ms),
        ] {
            if value == 0 {
                return Err(VmError::Config(format!("{name} must be positive")));
            }
        }

        Ok(())
    }

    /// Parsed tank capacity.
    pub fn tank_capacity(&self) -> VmResult<Fuel> {
        Ok(parse_fuel(&self.fuel_tank_capacity)?)
    }

    /// Parsed refuel amount, defaulting to 5% of the capacity.
    pub fn refill_amount(&self) -> VmResult<Fuel> {
        match &self.refuel_amount {
            Some(raw) => Ok(parse_fuel(raw)?),
            None => Ok(default_refill_amount(self.tank_capacity()?)),
        }
    }

    /// Interval between two station ticks.
    pub fn refill_rate(&self) -> Duration {
        Duration::from_millis(self.refuel_rate_ms)
    }

    /// Wall clock fallback for heavy contracts.
    pub fn max_execution_time(&self) -> Duration {
        Duration::from_millis(self.max_execution_time_ms)
    }

    /// Interval between two monitor samples.
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }
}

fn parse_millis(name: &str, raw: &str) -> VmResult<u64> {
    raw.trim()
        .parse()
        .map_err(|_| VmError::Config(format!("{name} is not a number of milliseconds: {raw}")))
}
