//! Lightweight collaborators for tests and local runs.

use async_trait::async_trait;
use fuelvm_common::{
    entity::{Contract, Revision},
    fuel::FuelStat,
    Fuel,
};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};
use tokio_util::sync::CancellationToken;

use crate::{
    engine::{ContractCall, ContractExecutor, ExecutionOutput},
    error::{VmError, VmResult},
    store::KeyValueStore,
    tank::FuelTankService,
};

mod backend;
pub mod contracts;

pub use backend::{InMemoryBackend, LOCAL_AUTH_SOURCE};

/// Contract owned by user 1, with a single revision of `code`.
pub fn contract_with_code(code: &str, max_fuel: Fuel, stateful: bool) -> Contract {
    Contract {
        id: 1,
        user_id: 1,
        name: "contract".into(),
        description: String::new(),
        max_fuel,
        stateful,
        last_revision: Some(Revision {
            id: 1,
            contract_id: 1,
            rev: 1,
            code: code.as_bytes().to_vec(),
            max_fuel,
            notes: String::new(),
        }),
    }
}

/// Key-value store over a shared map. Clones see the same keys.
#[derive(Clone, Default)]
pub struct InMemoryKv {
    inner: Arc<Mutex<HashMap<String, String>>>,
}

#[async_trait]
impl KeyValueStore for InMemoryKv {
    async fn get(&self, key: &str) -> VmResult<Option<String>> {
        let inner = self
            .inner
            .lock()
            .map_err(|err| VmError::Storage(err.to_string()))?;
        Ok(inner.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> VmResult<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|err| VmError::Storage(err.to_string()))?;
        inner.insert(key.to_string(), value);
        Ok(())
    }
}

/// Executor answering every call with the same result.
pub struct StaticExecutor {
    result: String,
    calls: AtomicUsize,
}

impl StaticExecutor {
    /// Executor answering `result`.
    pub fn new(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of executions so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContractExecutor for StaticExecutor {
    async fn exec_contract(
        &self,
        _ctx: &CancellationToken,
        call: ContractCall,
    ) -> VmResult<ExecutionOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ExecutionOutput {
            result: self.result.clone(),
            state: call.state,
        })
    }
}

/// Executor panicking with a fixed message.
pub struct PanickingExecutor {
    message: &'static str,
}

impl PanickingExecutor {
    /// Executor panicking with `message`.
    pub fn new(message: &'static str) -> Self {
        Self { message }
    }
}

#[async_trait]
impl ContractExecutor for PanickingExecutor {
    async fn exec_contract(
        &self,
        _ctx: &CancellationToken,
        _call: ContractCall,
    ) -> VmResult<ExecutionOutput> {
        std::panic::panic_any(self.message)
    }
}

/// Tank of capacity 100 that panics on every async call.
#[derive(Default)]
pub struct PanickingTank {
    calls: AtomicUsize,
}

impl PanickingTank {
    /// Number of calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn explode(&self) -> ! {
        self.calls.fetch_add(1, Ordering::SeqCst);
        panic!("fuel tank exploded")
    }
}

#[async_trait]
impl FuelTankService for PanickingTank {
    fn capacity(&self) -> Fuel {
        100
    }

    async fn fuel(&self, _ctx: &CancellationToken) -> VmResult<Fuel> {
        self.explode()
    }

    async fn burn(&self, _ctx: &CancellationToken, _fuel: Fuel) -> VmResult<()> {
        self.explode()
    }

    async fn refuel(&self, _ctx: &CancellationToken, _fuel: Fuel) -> VmResult<()> {
        self.explode()
    }

    async fn stats(&self, _ctx: &CancellationToken) -> VmResult<FuelStat> {
        self.explode()
    }
}
