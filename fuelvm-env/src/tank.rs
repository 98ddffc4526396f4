//! The fuel tank: a bounded counter of used fuel.
//!
//! Every read-modify-write cycle runs under a named lock, so tanks sharing
//! the same store and lock across processes observe a single counter. The
//! lock is held through a [`LockGuard`], which still lets it go when a store
//! call panics or the caller abandons the future.

use async_trait::async_trait;
use fuelvm_common::{fuel::FuelStat, fuel::DEFAULT_FUEL_TANK_CAPACITY, Fuel};
use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{VmError, VmResult},
    store::{DistributedLock, FuelStore, LocalFuelStore, LocalLock, LockGuard},
    VmMock,
};

/// Name of the lock guarding the tank.
pub const FUEL_TANK_LOCK_NAME: &str = "fuel-tank-lock";

/// Operations on a fuel tank.
#[async_trait]
pub trait FuelTankService: Send + Sync {
    /// Maximum amount of fuel that can be in use.
    fn capacity(&self) -> Fuel;

    /// Fuel currently in use.
    async fn fuel(&self, ctx: &CancellationToken) -> VmResult<Fuel>;

    /// Consumes `fuel`. Fails with [`VmError::NotEnoughFuel`] when the tank
    /// would go over capacity, leaving it untouched.
    async fn burn(&self, ctx: &CancellationToken, fuel: Fuel) -> VmResult<()>;

    /// Gives back up to `fuel`, never below zero usage.
    async fn refuel(&self, ctx: &CancellationToken, fuel: Fuel) -> VmResult<()>;

    /// Snapshot of the tank.
    async fn stats(&self, ctx: &CancellationToken) -> VmResult<FuelStat>;
}

/// Fuel tank over an injected store and lock.
pub struct FuelTank {
    capacity: Fuel,
    store: Arc<dyn FuelStore>,
    lock: Arc<dyn DistributedLock>,
}

impl FuelTank {
    /// Creates a tank.
    pub fn new(capacity: Fuel, store: Arc<dyn FuelStore>, lock: Arc<dyn DistributedLock>) -> Self {
        Self {
            capacity,
            store,
            lock,
        }
    }

    /// Creates a tank backed by process-local counters.
    pub fn local(capacity: Fuel) -> Self {
        Self::new(
            capacity,
            Arc::new(LocalFuelStore::new()),
            Arc::new(LocalLock::new(FUEL_TANK_LOCK_NAME)),
        )
    }

    async fn burn_locked(&self, fuel: Fuel) -> VmResult<()> {
        let used = self.store.fuel_used().await?;
        match used.checked_add(fuel) {
            Some(total) if total <= self.capacity => self.store.set_fuel_used(total).await,
            _ => Err(VmError::NotEnoughFuel),
        }
    }

    async fn refuel_locked(&self, fuel: Fuel) -> VmResult<()> {
        let used = self.store.fuel_used().await?;
        let refill = fuel.min(used);

        self.store.set_fuel_used(used - refill).await?;
        self.store.set_last_refuel(refill, unix_now()).await
    }

    async fn stats_locked(&self) -> VmResult<FuelStat> {
        let fuel_used = self.store.fuel_used().await?;
        let (last_refuel_amount, last_refuel_at) = self.store.last_refuel().await?;

        Ok(FuelStat {
            fuel_capacity: self.capacity,
            fuel_used,
            last_refuel_amount,
            last_refuel_at,
        })
    }
}

impl VmMock for FuelTank {
    fn mocked() -> anyhow::Result<Self> {
        Ok(Self::local(DEFAULT_FUEL_TANK_CAPACITY))
    }
}

#[async_trait]
impl FuelTankService for FuelTank {
    fn capacity(&self) -> Fuel {
        self.capacity
    }

    async fn fuel(&self, ctx: &CancellationToken) -> VmResult<Fuel> {
        let guard = LockGuard::acquire(&self.lock, ctx).await?;
        let result = self.store.fuel_used().await;
        guard.release().await;
        result
    }

    async fn burn(&self, ctx: &CancellationToken, fuel: Fuel) -> VmResult<()> {
        if fuel == 0 {
            return Err(VmError::InvalidFuel(fuel));
        }

        let guard = LockGuard::acquire(&self.lock, ctx).await?;
        let result = self.burn_locked(fuel).await;
        guard.release().await;
        result
    }

    async fn refuel(&self, ctx: &CancellationToken, fuel: Fuel) -> VmResult<()> {
        let guard = LockGuard::acquire(&self.lock, ctx).await?;
        let result = self.refuel_locked(fuel).await;
        guard.release().await;
        result
    }

    async fn stats(&self, ctx: &CancellationToken) -> VmResult<FuelStat> {
        let guard = LockGuard::acquire(&self.lock, ctx).await?;
        let result = self.stats_locked().await;
        guard.release().await;
        result
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{station::FuelStation, store::KvFuelStore, testutils::InMemoryKv};
    use futures::FutureExt;
    use std::{
        panic::AssertUnwindSafe,
        sync::atomic::{AtomicBool, Ordering},
        time::Duration,
    };
    use tokio::time::timeout;

    /// Store whose first read panics or stalls, depending on `stall`.
    struct FaultyStore {
        inner: LocalFuelStore,
        faulted: AtomicBool,
        stall: bool,
    }

    impl FaultyStore {
        fn panicking() -> Self {
            Self {
                inner: LocalFuelStore::new(),
                faulted: AtomicBool::new(false),
                stall: false,
            }
        }

        fn stalling() -> Self {
            Self {
                stall: true,
                ..Self::panicking()
            }
        }
    }

    #[async_trait]
    impl FuelStore for FaultyStore {
        async fn fuel_used(&self) -> VmResult<Fuel> {
            if !self.faulted.swap(true, Ordering::SeqCst) {
                if self.stall {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                } else {
                    panic!("store read failed");
                }
            }
            self.inner.fuel_used().await
        }

        async fn set_fuel_used(&self, used: Fuel) -> VmResult<()> {
            self.inner.set_fuel_used(used).await
        }

        async fn last_refuel(&self) -> VmResult<(Fuel, Option<u64>)> {
            self.inner.last_refuel().await
        }

        async fn set_last_refuel(&self, amount: Fuel, at: u64) -> VmResult<()> {
            self.inner.set_last_refuel(amount, at).await
        }
    }

    struct BrokenLock;

    #[async_trait]
    impl DistributedLock for BrokenLock {
        fn name(&self) -> &str {
            "broken"
        }

        async fn lock(&self, _ctx: &CancellationToken) -> VmResult<()> {
            Err(VmError::Lock {
                name: "broken".into(),
                reason: "unreachable".into(),
            })
        }

        async fn unlock(&self) -> VmResult<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn burn_and_refuel_within_capacity() {
        let ctx = CancellationToken::new();
        let tank = FuelTank::local(1024);

        tank.burn(&ctx, 1000).await.unwrap();
        assert_eq!(tank.fuel(&ctx).await.unwrap(), 1000);

        assert_eq!(tank.burn(&ctx, 100).await, Err(VmError::NotEnoughFuel));
        assert_eq!(tank.fuel(&ctx).await.unwrap(), 1000);

        tank.refuel(&ctx, 2000).await.unwrap();
        assert_eq!(tank.fuel(&ctx).await.unwrap(), 0);

        let stats = tank.stats(&ctx).await.unwrap();
        assert_eq!(stats.fuel_capacity, 1024);
        assert_eq!(stats.last_refuel_amount, 1000);
        assert!(stats.last_refuel_at.is_some());
    }

    #[tokio::test]
    async fn zero_burn_is_invalid() {
        let ctx = CancellationToken::new();
        let tank = FuelTank::mocked().unwrap();
        assert_eq!(tank.burn(&ctx, 0).await, Err(VmError::InvalidFuel(0)));
        assert_eq!(tank.burn(&ctx, u64::MAX).await, Err(VmError::NotEnoughFuel));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_burns_never_overflow() {
        let ctx = CancellationToken::new();
        let tank = Arc::new(FuelTank::local(500));

        let handles: Vec<_> = (0..100)
            .map(|_| {
                let tank = Arc::clone(&tank);
                let ctx = ctx.clone();
                tokio::spawn(async move { tank.burn(&ctx, 10).await })
            })
            .collect();

        let mut burned = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => burned += 1,
                Err(err) => assert_eq!(err, VmError::NotEnoughFuel),
            }
        }

        assert_eq!(burned, 50);
        assert_eq!(tank.fuel(&ctx).await.unwrap(), 500);
    }

    #[tokio::test]
    async fn shared_kv_store_sees_one_counter() {
        let ctx = CancellationToken::new();
        let kv = InMemoryKv::default();
        let lock: Arc<dyn DistributedLock> = Arc::new(LocalLock::new(FUEL_TANK_LOCK_NAME));

        let first = FuelTank::new(100, Arc::new(KvFuelStore::new(kv.clone())), Arc::clone(&lock));
        let second = FuelTank::new(100, Arc::new(KvFuelStore::new(kv)), lock);

        first.burn(&ctx, 60).await.unwrap();
        assert_eq!(second.burn(&ctx, 60).await, Err(VmError::NotEnoughFuel));
        second.refuel(&ctx, 10).await.unwrap();
        assert_eq!(first.fuel(&ctx).await.unwrap(), 50);
    }

    #[tokio::test]
    async fn lock_failure_leaves_tank_untouched() {
        let ctx = CancellationToken::new();
        let store = Arc::new(LocalFuelStore::new());
        let tank = FuelTank::new(100, store.clone(), Arc::new(BrokenLock));

        assert!(matches!(tank.burn(&ctx, 10).await, Err(VmError::Lock { .. })));
        assert_eq!(store.fuel_used().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn panicking_store_releases_lock() {
        let ctx = CancellationToken::new();
        let tank = FuelTank::new(
            100,
            Arc::new(FaultyStore::panicking()),
            Arc::new(LocalLock::new(FUEL_TANK_LOCK_NAME)),
        );

        let panicked = AssertUnwindSafe(tank.fuel(&ctx)).catch_unwind().await;
        assert!(panicked.is_err());

        let fuel = timeout(Duration::from_secs(1), tank.fuel(&ctx)).await;
        assert_eq!(fuel, Ok(Ok(0)));
        tank.burn(&ctx, 10).await.unwrap();
    }

    #[tokio::test]
    async fn abandoned_burn_releases_lock() {
        let ctx = CancellationToken::new();
        let tank = FuelTank::new(
            100,
            Arc::new(FaultyStore::stalling()),
            Arc::new(LocalLock::new(FUEL_TANK_LOCK_NAME)),
        );

        assert!(timeout(Duration::from_millis(20), tank.burn(&ctx, 10)).await.is_err());

        let burn = timeout(Duration::from_secs(1), tank.burn(&ctx, 10)).await;
        assert_eq!(burn, Ok(Ok(())));
        assert_eq!(tank.fuel(&ctx).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn station_survives_store_panic_and_keeps_tank_usable() {
        let ctx = CancellationToken::new();
        let tank = Arc::new(FuelTank::new(
            100,
            Arc::new(FaultyStore::panicking()),
            Arc::new(LocalLock::new(FUEL_TANK_LOCK_NAME)),
        ));

        let station = FuelStation::new(tank.clone(), 5, Duration::from_millis(10));
        station.resume_refueling(&ctx).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let burn = timeout(Duration::from_secs(1), tank.burn(&ctx, 20)).await;
        assert_eq!(burn, Ok(Ok(())));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(tank.fuel(&ctx).await.unwrap() < 20);
        station.stop_refueling().unwrap();
    }
}
