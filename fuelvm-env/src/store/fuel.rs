use async_trait::async_trait;
use fuelvm_common::Fuel;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{VmError, VmResult};

/// Key holding the used fuel counter.
pub const FUEL_USED_KEY: &str = "fuelvm_fuel_tank_fuel_used";

/// Key holding the amount refilled by the last refuel.
pub const FUEL_LAST_REFILL_AMOUNT_KEY: &str = "fuelvm_fuel_tank_fuel_last_refill_amount";

/// Key holding the unix time of the last refuel.
pub const FUEL_LAST_REFILL_TIME_KEY: &str = "fuelvm_fuel_tank_fuel_last_refill_time";

/// Raw storage of the fuel tank counters. Implementations are not expected
/// to be atomic across calls, the tank holds its lock around them.
#[async_trait]
pub trait FuelStore: Send + Sync {
    /// Current used fuel, zero if never written.
    async fn fuel_used(&self) -> VmResult<Fuel>;

    /// Overwrites the used fuel counter.
    async fn set_fuel_used(&self, used: Fuel) -> VmResult<()>;

    /// Amount and unix time of the last refuel. The time is `None` if the
    /// tank was never refuelled.
    async fn last_refuel(&self) -> VmResult<(Fuel, Option<u64>)>;

    /// Records a refuel.
    async fn set_last_refuel(&self, amount: Fuel, at: u64) -> VmResult<()>;
}

/// Process-local fuel counters.
#[derive(Debug, Default)]
pub struct LocalFuelStore {
    used: AtomicU64,
    last_refuel_amount: AtomicU64,
    last_refuel_at: AtomicU64,
}

impl LocalFuelStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FuelStore for LocalFuelStore {
    async fn fuel_used(&self) -> VmResult<Fuel> {
        Ok(self.used.load(Ordering::Acquire))
    }

    async fn set_fuel_used(&self, used: Fuel) -> VmResult<()> {
        self.used.store(used, Ordering::Release);
        Ok(())
    }

    async fn last_refuel(&self) -> VmResult<(Fuel, Option<u64>)> {
        let at = self.last_refuel_at.load(Ordering::Acquire);
        Ok((
            self.last_refuel_amount.load(Ordering::Acquire),
            (at != 0).then_some(at),
        ))
    }

    async fn set_last_refuel(&self, amount: Fuel, at: u64) -> VmResult<()> {
        self.last_refuel_amount.store(amount, Ordering::Release);
        self.last_refuel_at.store(at, Ordering::Release);
        Ok(())
    }
}

/// Minimal interface of a remote key-value store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Reads a key, `None` if missing.
    async fn get(&self, key: &str) -> VmResult<Option<String>>;

    /// Writes a key.
    async fn set(&self, key: &str, value: String) -> VmResult<()>;
}

/// Fuel counters kept in a key-value store as decimal strings, shared by
/// every runtime pointing at the same store.
pub struct KvFuelStore<S> {
    kv: S,
}

impl<S: KeyValueStore> KvFuelStore<S> {
    /// Wraps a key-value store.
    pub fn new(kv: S) -> Self {
        Self { kv }
    }

    async fn read_u64(&self, key: &str) -> VmResult<Option<u64>> {
        match self.kv.get(key).await? {
            None => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|err| VmError::Storage(format!("failed to parse {key}: {err}"))),
        }
    }
}

#[async_trait]
impl<S: KeyValueStore> FuelStore for KvFuelStore<S> {
    async fn fuel_used(&self) -> VmResult<Fuel> {
        Ok(self.read_u64(FUEL_USED_KEY).await?.unwrap_or(0))
    }

    async fn set_fuel_used(&self, used: Fuel) -> VmResult<()> {
        self.kv.set(FUEL_USED_KEY, used.to_string()).await
    }

    async fn last_refuel(&self) -> VmResult<(Fuel, Option<u64>)> {
        let amount = self.read_u64(FUEL_LAST_REFILL_AMOUNT_KEY).await?.unwrap_or(0);
        let at = self.read_u64(FUEL_LAST_REFILL_TIME_KEY).await?;
        Ok((amount, at))
    }

    async fn set_last_refuel(&self, amount: Fuel, at: u64) -> VmResult<()> {
        self.kv
            .set(FUEL_LAST_REFILL_AMOUNT_KEY, amount.to_string())
            .await?;
        self.kv.set(FUEL_LAST_REFILL_TIME_KEY, at.to_string()).await
    }
}
