//! Admission control: bounded pools of core tokens.
//!
//! A [`CorePool`] is a channel pre-filled with as many [`Core`] tokens as
//! its capacity; holding a token is the right to run. Pools are grouped in
//! fuel tiers per operation, so cheap and expensive calls of the same kind
//! do not compete for the same slots.

use fuelvm_common::{Fuel, VmOperation};
use log::error;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex as SyncMutex, PoisonError},
};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::{
    call::VmCall,
    config::PoolsConfig,
    error::{VmError, VmResult},
    VmStandard,
};

/// Opaque right to run one operation.
#[derive(Debug)]
pub struct Core(());

struct CorePoolInner {
    sender: mpsc::Sender<Core>,
    receiver: Mutex<mpsc::Receiver<Core>>,
}

/// A bounded pool of cores. Waiters are served in arrival order.
#[derive(Clone)]
pub struct CorePool {
    inner: Arc<CorePoolInner>,
}

impl CorePool {
    /// Creates a pool holding `capacity` cores.
    pub fn new(capacity: usize) -> VmResult<Self> {
        if capacity == 0 {
            return Err(VmError::InvalidPoolConfig(
                "a core pool needs at least one core".into(),
            ));
        }

        let (sender, receiver) = mpsc::channel(capacity);
        for _ in 0..capacity {
            sender
                .try_send(Core(()))
                .map_err(|err| VmError::InvalidPoolConfig(err.to_string()))?;
        }

        Ok(Self {
            inner: Arc::new(CorePoolInner {
                sender,
                receiver: Mutex::new(receiver),
            }),
        })
    }

    /// Total number of cores.
    pub fn capacity(&self) -> usize {
        self.inner.sender.max_capacity()
    }

    /// Cores currently free.
    pub fn available(&self) -> usize {
        self.inner.sender.max_capacity() - self.inner.sender.capacity()
    }

    /// Takes a core, waiting until one is free or `ctx` is cancelled.
    pub async fn acquire(&self, ctx: &CancellationToken) -> VmResult<Core> {
        let mut receiver = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(VmError::CorePoolTimeout),
            receiver = self.inner.receiver.lock() => receiver,
        };

        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(VmError::CorePoolTimeout),
            core = receiver.recv() => core.ok_or(VmError::CorePoolTimeout),
        }
    }

    fn put(&self, core: Core) {
        if let Err(err) = self.inner.sender.try_send(core) {
            error!("core returned to a full pool: {err}");
        }
    }
}

/// A core held by an operation. The core goes back to its pool on the
/// first [`CoreLease::release`] or when the lease is dropped.
pub struct CoreLease {
    pool: CorePool,
    core: SyncMutex<Option<Core>>,
}

impl CoreLease {
    fn new(pool: CorePool, core: Core) -> Self {
        Self {
            pool,
            core: SyncMutex::new(Some(core)),
        }
    }

    /// Returns the core. Later calls do nothing.
    pub fn release(&self) {
        let core = self
            .core
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(core) = core {
            self.pool.put(core);
        }
    }
}

impl Drop for CoreLease {
    fn drop(&mut self) {
        self.release();
    }
}

/// Fuel tiers of one operation.
pub struct FuelCorePool {
    tiers: Vec<(Fuel, CorePool)>,
    fallback: Option<CorePool>,
}

impl FuelCorePool {
    /// Creates the tiers. They are kept sorted by ascending ceiling.
    pub fn new(mut tiers: Vec<(Fuel, CorePool)>, fallback: Option<CorePool>) -> Self {
        tiers.sort_by_key(|(ceiling, _)| *ceiling);
        Self { tiers, fallback }
    }

    /// First tier whose ceiling covers `fuel`, else the fallback.
    pub fn select(&self, fuel: Fuel) -> Option<&CorePool> {
        self.tiers
            .iter()
            .find(|(ceiling, _)| fuel <= *ceiling)
            .map(|(_, pool)| pool)
            .or(self.fallback.as_ref())
    }
}

/// Every core pool of the runtime, by operation.
pub struct CpusPool {
    pools: HashMap<VmOperation, FuelCorePool>,
}

impl CpusPool {
    /// Builds and fills the pools described by `config`.
    pub fn new(config: &PoolsConfig) -> VmResult<Self> {
        let mut pools = HashMap::new();

        for entry in &config.operations {
            let tiers = entry
                .tiers
                .iter()
                .map(|tier| Ok((tier.max_fuel, CorePool::new(tier.cores)?)))
                .collect::<VmResult<Vec<_>>>()?;
            let fallback = entry.fallback.map(CorePool::new).transpose()?;

            if pools
                .insert(entry.operation, FuelCorePool::new(tiers, fallback))
                .is_some()
            {
                return Err(VmError::InvalidPoolConfig(format!(
                    "operation {} is configured twice",
                    entry.operation
                )));
            }
        }

        Ok(Self { pools })
    }

    /// Pool that serves `operation` at `fuel`.
    pub fn pool_for(&self, operation: VmOperation, fuel: Fuel) -> VmResult<&CorePool> {
        let tiers = self
            .pools
            .get(&operation)
            .ok_or(VmError::OperationPoolNotFound(operation))?;

        tiers
            .select(fuel)
            .ok_or(VmError::FuelPoolNotFound { operation, fuel })
    }

    /// Acquires a core for `call`, waiting until one is free or `ctx` is
    /// cancelled.
    pub async fn acquire_core(&self, ctx: &CancellationToken, call: &VmCall) -> VmResult<CoreLease> {
        let pool = self.pool_for(call.operation(), call.fuel())?;
        let core = pool.acquire(ctx).await?;
        Ok(CoreLease::new(pool.clone(), core))
    }

    /// Free cores of the pool that would serve `operation` at `fuel`.
    pub fn available(&self, operation: VmOperation, fuel: Fuel) -> VmResult<usize> {
        Ok(self.pool_for(operation, fuel)?.available())
    }
}

impl VmStandard for CpusPool {
    fn vm_standard() -> anyhow::Result<Self> {
        Ok(Self::new(&PoolsConfig::vm_standard()?)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        call::VmCallOpt,
        config::{OperationPoolConfig, TierConfig},
    };
    use std::time::Duration;

    fn execute_call(fuel: Fuel) -> VmCall {
        VmCall::new(VmCallOpt {
            operation: VmOperation::ExecuteContract,
            custom_max_fuel: Some(fuel),
            ..Default::default()
        })
    }

    fn tiers(fallback: Option<usize>, tiers: &[(Fuel, usize)]) -> PoolsConfig {
        PoolsConfig {
            operations: vec![OperationPoolConfig {
                operation: VmOperation::ExecuteContract,
                fallback,
                tiers: tiers
                    .iter()
                    .map(|(max_fuel, cores)| TierConfig {
                        max_fuel: *max_fuel,
                        cores: *cores,
                    })
                    .collect(),
            }],
        }
    }

    #[tokio::test]
    async fn ten_acquisitions_then_timeout() {
        let cpus = CpusPool::new(&tiers(None, &[(1000, 10)])).unwrap();
        let call = execute_call(500);
        let ctx = CancellationToken::new();

        let mut leases = Vec::new();
        for _ in 0..10 {
            leases.push(cpus.acquire_core(&ctx, &call).await.unwrap());
        }
        assert_eq!(cpus.available(VmOperation::ExecuteContract, 500).unwrap(), 0);

        let waiting = CancellationToken::new();
        let canceller = waiting.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });
        assert!(matches!(
            cpus.acquire_core(&waiting, &call).await,
            Err(VmError::CorePoolTimeout)
        ));

        for lease in &leases {
            lease.release();
            lease.release();
        }
        assert_eq!(cpus.available(VmOperation::ExecuteContract, 500).unwrap(), 10);

        drop(leases);
        assert_eq!(cpus.available(VmOperation::ExecuteContract, 500).unwrap(), 10);
    }

    #[tokio::test]
    async fn saturated_tier_times_out_without_spilling_over() {
        let cpus = CpusPool::new(&tiers(Some(1), &[(20, 10)])).unwrap();
        let call = execute_call(20);
        let ctx = CancellationToken::new();

        let mut leases = Vec::new();
        for _ in 0..10 {
            leases.push(cpus.acquire_core(&ctx, &call).await.unwrap());
        }

        let deadline = CancellationToken::new();
        let canceller = deadline.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });
        assert!(matches!(
            cpus.acquire_core(&deadline, &call).await,
            Err(VmError::CorePoolTimeout)
        ));
        assert_eq!(cpus.available(VmOperation::ExecuteContract, 20).unwrap(), 0);
        assert_eq!(cpus.available(VmOperation::ExecuteContract, 21).unwrap(), 1);

        leases.pop();
        let lease = cpus.acquire_core(&ctx, &call).await.unwrap();
        assert_eq!(cpus.available(VmOperation::ExecuteContract, 20).unwrap(), 0);
        drop(lease);
        assert_eq!(cpus.available(VmOperation::ExecuteContract, 20).unwrap(), 1);
    }

    #[tokio::test]
    async fn waiter_gets_released_core() {
        let cpus = Arc::new(CpusPool::new(&tiers(None, &[(100, 1)])).unwrap());
        let ctx = CancellationToken::new();
        let call = execute_call(10);

        let lease = cpus.acquire_core(&ctx, &call).await.unwrap();
        let waiter = {
            let cpus = Arc::clone(&cpus);
            let ctx = ctx.clone();
            let call = call.clone();
            tokio::spawn(async move { cpus.acquire_core(&ctx, &call).await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(lease);
        waiter.await.unwrap().unwrap();
    }

    #[test]
    fn tier_selection() {
        let cpus = CpusPool::new(&tiers(Some(2), &[(800, 4), (50, 1)])).unwrap();

        assert_eq!(cpus.pool_for(VmOperation::ExecuteContract, 10).unwrap().capacity(), 1);
        assert_eq!(cpus.pool_for(VmOperation::ExecuteContract, 50).unwrap().capacity(), 1);
        assert_eq!(cpus.pool_for(VmOperation::ExecuteContract, 51).unwrap().capacity(), 4);
        assert_eq!(cpus.pool_for(VmOperation::ExecuteContract, 9000).unwrap().capacity(), 2);
    }

    #[test]
    fn missing_pools() {
        let cpus = CpusPool::new(&tiers(None, &[(50, 1)])).unwrap();

        assert!(matches!(
            cpus.pool_for(VmOperation::ExecuteContract, 51),
            Err(VmError::FuelPoolNotFound { fuel: 51, .. })
        ));
        assert!(matches!(
            cpus.pool_for(VmOperation::CreateUser, 15),
            Err(VmError::OperationPoolNotFound(VmOperation::CreateUser))
        ));

        let empty = CpusPool::new(&PoolsConfig::default()).unwrap();
        assert!(empty.pool_for(VmOperation::ExecuteContract, 1).is_err());
    }

    #[test]
    fn invalid_layouts() {
        assert!(CpusPool::new(&tiers(None, &[(50, 0)])).is_err());

        let mut twice = tiers(None, &[(50, 1)]);
        twice.operations.push(twice.operations[0].clone());
        assert!(matches!(
            CpusPool::new(&twice),
            Err(VmError::InvalidPoolConfig(_))
        ));
    }

    #[test]
    fn standard_layout() {
        let cpus = CpusPool::vm_standard().unwrap();
        assert_eq!(cpus.pool_for(VmOperation::ExecuteContract, 50).unwrap().capacity(), 1);
        assert_eq!(cpus.pool_for(VmOperation::ExecuteContract, 3000).unwrap().capacity(), 15);
        assert_eq!(cpus.pool_for(VmOperation::ExecuteContract, 20000).unwrap().capacity(), 10);
        assert_eq!(cpus.pool_for(VmOperation::Authenticate, 20).unwrap().capacity(), 20);
    }
}
