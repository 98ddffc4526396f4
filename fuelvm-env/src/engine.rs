//! The engine: a pausable gate in front of the contract executor.

use async_trait::async_trait;
use fuelvm_common::{
    entity::{Contract, Revision, StateValue},
    VmState,
};
use std::sync::{
    atomic::{AtomicI32, Ordering},
    Arc,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{VmError, VmResult};

/// Everything the executor needs to run a contract.
#[derive(Clone, Debug)]
pub struct ContractCall {
    /// Contract being executed.
    pub contract: Contract,
    /// Revision whose code runs.
    pub revision: Revision,
    /// Current state, for stateful contracts.
    pub state: Option<StateValue>,
}

/// Result of a contract execution.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionOutput {
    /// Value produced by the contract.
    pub result: String,
    /// State after the execution, for stateful contracts.
    pub state: Option<StateValue>,
}

/// Runs contract code.
#[async_trait]
pub trait ContractExecutor: Send + Sync {
    /// Executes `call`. Implementations bound the execution in time.
    async fn exec_contract(
        &self,
        ctx: &CancellationToken,
        call: ContractCall,
    ) -> VmResult<ExecutionOutput>;
}

/// Lifecycle of an engine.
#[async_trait]
pub trait EngineService: ContractExecutor {
    /// Current state.
    fn state(&self) -> VmState;

    /// Whether contracts can run.
    fn is_running(&self) -> bool {
        self.state() == VmState::Running
    }

    /// Running -> Paused.
    fn pause(&self) -> VmResult<()>;

    /// Initializing or Paused -> Running.
    fn resume(&self) -> VmResult<()>;

    /// Any live state -> Stopped. Stopped is terminal.
    fn stop(&self) -> VmResult<()>;

    /// Waits until the engine runs. Fails if `ctx` is cancelled or the
    /// engine stops.
    async fn wait_until_running(&self, _ctx: &CancellationToken) -> VmResult<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(VmError::EngineNotRunning)
        }
    }
}

/// The engine.
pub struct Engine {
    state: AtomicI32,
    changes: watch::Sender<VmState>,
    executor: Arc<dyn ContractExecutor>,
}

impl Engine {
    /// Creates an engine in the initializing state.
    pub fn new(executor: Arc<dyn ContractExecutor>) -> Self {
        let (changes, _) = watch::channel(VmState::Initializing);
        Self {
            state: AtomicI32::new(VmState::Initializing as i32),
            changes,
            executor,
        }
    }

    fn transition(&self, to: VmState, allowed: impl Fn(VmState) -> VmResult<()>) -> VmResult<()> {
        let mut current = self.state();
        loop {
            allowed(current)?;
            match self.state.compare_exchange(
                current as i32,
                to as i32,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = VmState::from_i32(actual).unwrap_or(VmState::Stopped),
            }
        }

        self.changes.send_replace(to);
        Ok(())
    }
}

#[async_trait]
impl ContractExecutor for Engine {
    async fn exec_contract(
        &self,
        ctx: &CancellationToken,
        call: ContractCall,
    ) -> VmResult<ExecutionOutput> {
        if !self.is_running() {
            return Err(VmError::EngineNotRunning);
        }
        self.executor.exec_contract(ctx, call).await
    }
}

#[async_trait]
impl EngineService for Engine {
    fn state(&self) -> VmState {
        VmState::from_i32(self.state.load(Ordering::Acquire)).unwrap_or(VmState::Stopped)
    }

    fn pause(&self) -> VmResult<()> {
        self.transition(VmState::Paused, |current| match current {
            VmState::Running => Ok(()),
            VmState::Paused => Err(VmError::EngineAlreadyPaused),
            VmState::Stopped => Err(VmError::EngineAlreadyStopped),
            VmState::Initializing => Err(VmError::EngineNotRunning),
        })
    }

    fn resume(&self) -> VmResult<()> {
        self.transition(VmState::Running, |current| match current {
            VmState::Initializing | VmState::Paused => Ok(()),
            VmState::Running => Err(VmError::EngineAlreadyRunning),
            VmState::Stopped => Err(VmError::EngineAlreadyStopped),
        })
    }

    fn stop(&self) -> VmResult<()> {
        self.transition(VmState::Stopped, |current| match current {
            VmState::Stopped => Err(VmError::EngineAlreadyStopped),
            _ => Ok(()),
        })
    }

    async fn wait_until_running(&self, ctx: &CancellationToken) -> VmResult<()> {
        let mut changes = self.changes.subscribe();
        loop {
            match self.state() {
                VmState::Running => return Ok(()),
                VmState::Stopped => return Err(VmError::EngineNotRunning),
                VmState::Initializing | VmState::Paused => {}
            }

            tokio::select! {
                _ = ctx.cancelled() => return Err(VmError::Cancelled),
                changed = changes.changed() => {
                    if changed.is_err() {
                        return Err(VmError::EngineNotRunning);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutils::StaticExecutor;
    use std::time::Duration;

    fn engine() -> Engine {
        Engine::new(Arc::new(StaticExecutor::new("ok")))
    }

    fn call() -> ContractCall {
        ContractCall {
            contract: Contract::default(),
            revision: Revision::default(),
            state: None,
        }
    }

    #[test]
    fn legal_transitions() {
        let engine = engine();
        assert_eq!(engine.state(), VmState::Initializing);
        assert_eq!(engine.pause(), Err(VmError::EngineNotRunning));

        engine.resume().unwrap();
        assert_eq!(engine.resume(), Err(VmError::EngineAlreadyRunning));

        engine.pause().unwrap();
        assert_eq!(engine.pause(), Err(VmError::EngineAlreadyPaused));
        assert_eq!(engine.state(), VmState::Paused);

        engine.resume().unwrap();
        engine.stop().unwrap();
        assert_eq!(engine.stop(), Err(VmError::EngineAlreadyStopped));
        assert_eq!(engine.pause(), Err(VmError::EngineAlreadyStopped));
        assert_eq!(engine.resume(), Err(VmError::EngineAlreadyStopped));
        assert_eq!(engine.state(), VmState::Stopped);
    }

    #[tokio::test]
    async fn exec_only_while_running() {
        let engine = engine();
        let ctx = CancellationToken::new();
        assert_eq!(
            engine.exec_contract(&ctx, call()).await,
            Err(VmError::EngineNotRunning)
        );

        engine.resume().unwrap();
        assert_eq!(engine.exec_contract(&ctx, call()).await.unwrap().result, "ok");

        engine.pause().unwrap();
        assert_eq!(
            engine.exec_contract(&ctx, call()).await,
            Err(VmError::EngineNotRunning)
        );
    }

    #[tokio::test]
    async fn waiter_wakes_on_resume() {
        let engine = Arc::new(engine());
        let ctx = CancellationToken::new();

        let waiter = {
            let engine = Arc::clone(&engine);
            let ctx = ctx.clone();
            tokio::spawn(async move { engine.wait_until_running(&ctx).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        engine.resume().unwrap();
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn waiter_gives_up() {
        let engine = engine();
        let ctx = CancellationToken::new();
        ctx.cancel();
        assert_eq!(engine.wait_until_running(&ctx).await, Err(VmError::Cancelled));

        engine.stop().unwrap();
        let ctx = CancellationToken::new();
        assert_eq!(
            engine.wait_until_running(&ctx).await,
            Err(VmError::EngineNotRunning)
        );
    }
}
