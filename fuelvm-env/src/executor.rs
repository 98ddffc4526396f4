//! The sandboxed contract executor.
//!
//! Each execution gets its own wasmtime engine, so bumping its epoch only
//! interrupts that execution. Compilation, instantiation and the call run on
//! a blocking thread while a timer task watches the deadline and the request
//! token.

use async_trait::async_trait;
use fuelvm_common::fuel::{max_execution_time_from_fuel, DEFAULT_MAX_EXECUTION_TIME};
use log::{debug, warn};
use std::{
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use wasmtime::{Engine, Trap};

use crate::{
    engine::{ContractCall, ContractExecutor, ExecutionOutput},
    error::{VmError, VmResult},
    host::Host,
    vm::{
        interruptible_engine, Vm, INTERRUPTED_BY_CANCELLATION, INTERRUPTED_BY_TIMEOUT,
        NOT_INTERRUPTED,
    },
    VmStandard,
};

/// Runs WebAssembly contracts with a wall clock limit derived from the
/// revision's declared fuel.
#[derive(Clone, Debug)]
pub struct SandboxExecutor {
    max_execution_time: Duration,
}

impl SandboxExecutor {
    /// `max_execution_time` applies to revisions declaring more fuel than
    /// the largest execution bucket.
    pub fn new(max_execution_time: Duration) -> Self {
        Self { max_execution_time }
    }

    /// Wall clock limit of a revision declaring `max_fuel`.
    pub fn timeout_for(&self, max_fuel: fuelvm_common::Fuel) -> Duration {
        max_execution_time_from_fuel(max_fuel, self.max_execution_time)
    }
}

impl VmStandard for SandboxExecutor {
    fn vm_standard() -> anyhow::Result<Self> {
        Ok(Self::new(DEFAULT_MAX_EXECUTION_TIME))
    }
}

#[async_trait]
impl ContractExecutor for SandboxExecutor {
    async fn exec_contract(
        &self,
        ctx: &CancellationToken,
        call: ContractCall,
    ) -> VmResult<ExecutionOutput> {
        if ctx.is_cancelled() {
            return Err(VmError::Sandbox("execution cancelled before start".into()));
        }

        let timeout = self.timeout_for(call.revision.max_fuel);
        let engine = interruptible_engine().map_err(|err| VmError::Sandbox(format!("{err:#}")))?;
        let interrupt = Arc::new(AtomicU8::new(NOT_INTERRUPTED));

        let timer = tokio::spawn(interrupt_after(
            engine.clone(),
            Arc::clone(&interrupt),
            ctx.clone(),
            timeout,
        ));

        let host = Host::new(
            call.contract
                .stateful
                .then(|| call.state.unwrap_or_default()),
        );
        let code = call.revision.code;
        let run = {
            let interrupt = Arc::clone(&interrupt);
            tokio::task::spawn_blocking(move || {
                Vm::new(&engine, host, &code, &interrupt)?.metered_call()
            })
        };

        let outcome = run.await;
        timer.abort();

        match outcome {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(err)) => Err(classify(err, interrupt.load(Ordering::SeqCst), timeout)),
            Err(join) if join.is_panic() => std::panic::resume_unwind(join.into_panic()),
            Err(join) => Err(VmError::Sandbox(join.to_string())),
        }
    }
}

async fn interrupt_after(
    engine: Engine,
    interrupt: Arc<AtomicU8>,
    ctx: CancellationToken,
    timeout: Duration,
) {
    let reason = tokio::select! {
        _ = tokio::time::sleep(timeout) => INTERRUPTED_BY_TIMEOUT,
        _ = ctx.cancelled() => INTERRUPTED_BY_CANCELLATION,
    };

    interrupt.store(reason, Ordering::SeqCst);
    engine.increment_epoch();
}

fn classify(err: anyhow::Error, interrupt: u8, timeout: Duration) -> VmError {
    if !matches!(err.downcast_ref::<Trap>(), Some(Trap::Interrupt)) {
        debug!("contract failed: {err:#}");
        return VmError::Sandbox(format!("{err:#}"));
    }

    match interrupt {
        INTERRUPTED_BY_CANCELLATION => VmError::Sandbox("contract execution cancelled".into()),
        _ => {
            warn!("contract interrupted after {timeout:?}");
            VmError::ExecutionTimeout
        }
    }
}
