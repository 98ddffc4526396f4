//! The orchestrator: the single entry point of the runtime.
//!
//! Every operation goes through [`FuelVm::make_operation`], which admits the
//! call through the core pools, waits for the engine, charges the fuel and
//! gives it back when the operation is not meant to keep it.

use fuelvm_common::{
    entity::{
        Auth, AuthUserOptions, Contract, ContractState, ContractUpdate, Revision, StateValue,
        User, UserUpdate,
    },
    fuel::FuelStat,
    AppError, ErrorCode, Fuel, VmOperation, VmState,
};
use futures::FutureExt;
use log::{debug, error, info, warn};
use std::{future::Future, panic::AssertUnwindSafe, sync::Arc};
use tokio_util::sync::CancellationToken;

use crate::{
    call::{RequestContext, VmCall, VmCallOpt},
    config::VmConfig,
    engine::{ContractCall, ContractExecutor, Engine, EngineService},
    error::{VmError, VmResult, EXECUTION_TIMEOUT_PANIC},
    event::{Event, EventBus, EventType},
    executor::SandboxExecutor,
    monitor::FuelMonitor,
    pool::CpusPool,
    running::panic_message,
    service::{
        AuthManagementService, ContractManagementService, StateService, UserManagementService,
    },
    station::FuelStation,
    tank::{FuelTank, FuelTankService},
};

/// External collaborators of the runtime.
#[derive(Clone)]
pub struct VmServices {
    /// Contracts and revisions.
    pub contracts: Arc<dyn ContractManagementService>,
    /// Users.
    pub users: Arc<dyn UserManagementService>,
    /// Authentication.
    pub auths: Arc<dyn AuthManagementService>,
    /// State of stateful contracts.
    pub states: Arc<dyn StateService>,
}

/// Options of a contract execution.
#[derive(Clone, Debug, Default)]
pub struct ContractCallOpt {
    /// Contract to execute.
    pub contract: Contract,
    /// Revision to execute; defaults to the contract's last revision.
    pub revision: Option<Revision>,
    /// Fuel charged instead of the revision's declared fuel.
    pub custom_max_fuel: Option<Fuel>,
}

/// The fuel-metered runtime.
pub struct FuelVm {
    engine: Arc<dyn EngineService>,
    tank: Arc<dyn FuelTankService>,
    station: FuelStation,
    monitor: FuelMonitor,
    pools: CpusPool,
    bus: EventBus,
    services: VmServices,
    ctx: CancellationToken,
}

impl FuelVm {
    /// Wires a runtime around `engine` and `tank`.
    pub fn new(
        config: &VmConfig,
        engine: Arc<dyn EngineService>,
        tank: Arc<dyn FuelTankService>,
        services: VmServices,
    ) -> VmResult<Self> {
        config.validate()?;

        let bus = EventBus::new();
        let station = FuelStation::new(
            Arc::clone(&tank),
            config.refill_amount()?,
            config.refill_rate(),
        );
        let monitor = FuelMonitor::new(
            bus.clone(),
            Arc::clone(&engine),
            Arc::clone(&tank),
            config.monitor_interval(),
        );
        let pools = CpusPool::new(&config.pools)?;

        Ok(Self {
            engine,
            tank,
            station,
            monitor,
            pools,
            bus,
            services,
            ctx: CancellationToken::new(),
        })
    }

    /// Runtime with a process-local tank and the WebAssembly sandbox.
    pub fn local(config: &VmConfig, services: VmServices) -> VmResult<Self> {
        let executor = Arc::new(SandboxExecutor::new(config.max_execution_time()));
        let engine = Arc::new(Engine::new(executor));
        let tank = Arc::new(FuelTank::local(config.tank_capacity()?));
        Self::new(config, engine, tank, services)
    }

    /// Event bus of the runtime.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn station(&self) -> &FuelStation {
        &self.station
    }

    pub fn monitor(&self) -> &FuelMonitor {
        &self.monitor
    }

    /// Starts the station, the monitor, the engine and the pause/resume
    /// coordination. Loops started before a failing step are stopped again.
    pub fn run(&self) -> VmResult<()> {
        self.station.resume_refueling(&self.ctx)?;

        if let Err(err) = self.monitor.start_monitoring(&self.ctx) {
            self.rollback_run();
            return Err(err);
        }

        if let Err(err) = self.engine.resume() {
            self.rollback_run();
            return Err(err);
        }
        self.spawn_coordinator();

        info!("fuel vm is running");
        Ok(())
    }

    fn rollback_run(&self) {
        if self.station.is_running() {
            if let Err(err) = self.station.stop_refueling() {
                debug!("rolling back run: {err}");
            }
        }
        if self.monitor.is_running() {
            if let Err(err) = self.monitor.stop_monitoring() {
                debug!("rolling back run: {err}");
            }
        }
    }

    /// Stops every background loop and the engine. The runtime cannot be
    /// run again afterwards.
    pub fn close(&self) -> VmResult<()> {
        if self.engine.state() == VmState::Initializing {
            return Err(VmError::EngineNotRunning);
        }
        self.engine.stop()?;

        if let Err(err) = self.station.stop_refueling() {
            debug!("closing fuel vm: {err}");
        }
        if let Err(err) = self.monitor.stop_monitoring() {
            debug!("closing fuel vm: {err}");
        }
        self.ctx.cancel();

        info!("fuel vm closed");
        Ok(())
    }

    /// Pauses the engine.
    pub fn pause(&self) -> VmResult<()> {
        self.engine.pause()
    }

    /// Resumes the engine.
    pub fn resume(&self) -> VmResult<()> {
        self.engine.resume()
    }

    /// State of the engine.
    pub fn state(&self) -> VmState {
        self.engine.state()
    }

    /// Whether the engine is running.
    pub fn is_running(&self) -> bool {
        self.engine.is_running()
    }

    fn spawn_coordinator(&self) {
        let mut pauses = self.bus.subscribe(&self.ctx, EventType::EngineShouldPause);
        let mut resumes = self.bus.subscribe(&self.ctx, EventType::EngineShouldResume);
        let engine = Arc::clone(&self.engine);
        let bus = self.bus.clone();
        let ctx = self.ctx.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = ctx.cancelled() => break,
                    event = pauses.recv() => match event {
                        Some(event) => apply_event(engine.as_ref(), event),
                        None => pauses = bus.subscribe(&ctx, EventType::EngineShouldPause),
                    },
                    event = resumes.recv() => match event {
                        Some(event) => apply_event(engine.as_ref(), event),
                        None => resumes = bus.subscribe(&ctx, EventType::EngineShouldResume),
                    },
                }
            }
            debug!("engine coordinator exited");
        });
    }

    /// Runs `delegate` as the operation described by `call`.
    ///
    /// The call first takes a core from the pool matching its operation and
    /// fuel, then waits for the engine to run (unless the call ignores the
    /// engine state) and burns its fuel. Unless the call keeps its charge,
    /// the fuel is given back once the delegate finished. The core is always
    /// released, and a panic anywhere past admission is turned into an error.
    pub async fn make_operation<T, F, Fut>(
        &self,
        ctx: &CancellationToken,
        call: &VmCall,
        delegate: F,
    ) -> VmResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = VmResult<T>>,
    {
        let lease = self.pools.acquire_core(ctx, call).await?;

        let outcome = AssertUnwindSafe(self.metered(ctx, call, delegate))
            .catch_unwind()
            .await;
        lease.release();

        match outcome {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                if message == EXECUTION_TIMEOUT_PANIC {
                    warn!("{} hit the execution deadline", call.operation());
                    Err(VmError::ExecutionTimeout)
                } else {
                    error!(
                        target: "fuelvm::critical",
                        "panic during {}: {message}",
                        call.operation()
                    );
                    Err(VmError::OperationPanic(message))
                }
            }
        }
    }

    async fn metered<T, F, Fut>(
        &self,
        ctx: &CancellationToken,
        call: &VmCall,
        delegate: F,
    ) -> VmResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = VmResult<T>>,
    {
        if !call.ignore_engine_state() {
            self.engine.wait_until_running(ctx).await?;
        }

        let fuel = call.fuel();
        self.tank.burn(ctx, fuel).await.map_err(|err| match err {
            VmError::NotEnoughFuel => err,
            other => VmError::BurnFailed(Box::new(other)),
        })?;

        let result = delegate().await;
        if call.ignore_refuel() {
            return result;
        }

        // Burned fuel goes back even when the request or the runtime was
        // cancelled meanwhile, so the refuel runs under a token nobody cancels.
        let refuel_ctx = CancellationToken::new();
        match (result, self.tank.refuel(&refuel_ctx, fuel).await) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(err)) => Err(VmError::RefuelFailed(Box::new(err))),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(refuel)) => {
                warn!("unable to refuel after failed {}: {refuel}", call.operation());
                Err(err)
            }
        }
    }

    fn operation_call(rctx: &RequestContext, operation: VmOperation) -> VmCall {
        VmCall::new(VmCallOpt {
            operation,
            caller: rctx.user().cloned(),
            custom_max_fuel: Some(operation.cost()),
            ignore_refuel: true,
            ..Default::default()
        })
    }

    /// Executes a contract, charging its declared fuel for the duration of
    /// the call. Stateful contracts read and persist their state.
    pub async fn exec_contract(&self, rctx: &RequestContext, opt: ContractCallOpt) -> VmResult<String> {
        let ContractCallOpt {
            contract,
            revision,
            custom_max_fuel,
        } = opt;

        let revision = revision
            .or_else(|| contract.last_revision.clone())
            .ok_or_else(|| AppError::invalid(format!("contract {} has no revision", contract.id)))?;
        let user_id = rctx.user().map_or(contract.user_id, |user| user.id);

        let call = VmCall::new(VmCallOpt {
            operation: VmOperation::ExecuteContract,
            contract: Some(contract.clone()),
            revision: Some(revision.clone()),
            caller: rctx.user().cloned(),
            custom_max_fuel,
            ..Default::default()
        });

        let ctx = rctx.token();
        let engine = &self.engine;
        let states = &self.services.states;

        self.make_operation(ctx, &call, move || async move {
            let revision_id = revision.id;
            let state = if contract.stateful {
                Some(load_state(states.as_ref(), revision_id, user_id).await?)
            } else {
                None
            };

            let output = engine
                .exec_contract(
                    ctx,
                    ContractCall {
                        contract,
                        revision,
                        state,
                    },
                )
                .await?;

            if let Some(value) = output.state {
                states.update_state(revision_id, user_id, value).await?;
            }

            Ok(output.result)
        })
        .await
    }

    /// Creates a contract.
    pub async fn create_contract(&self, rctx: &RequestContext, contract: Contract) -> VmResult<Contract> {
        let call = Self::operation_call(rctx, VmOperation::CreateContract);
        let contracts = &self.services.contracts;

        self.make_operation(rctx.token(), &call, move || async move {
            contract.validate()?;
            Ok(contracts.create_contract(contract).await?)
        })
        .await
    }

    /// Updates a contract.
    pub async fn update_contract(
        &self,
        rctx: &RequestContext,
        id: i64,
        update: ContractUpdate,
    ) -> VmResult<Contract> {
        let call = Self::operation_call(rctx, VmOperation::UpdateContract);
        let contracts = &self.services.contracts;

        self.make_operation(rctx.token(), &call, move || async move {
            Ok(contracts.update_contract(id, update).await?)
        })
        .await
    }

    /// Deletes a contract.
    pub async fn delete_contract(&self, rctx: &RequestContext, id: i64) -> VmResult<()> {
        let call = Self::operation_call(rctx, VmOperation::DeleteContract);
        let contracts = &self.services.contracts;

        self.make_operation(rctx.token(), &call, move || async move {
            Ok(contracts.delete_contract(id).await?)
        })
        .await
    }

    /// Stores a new revision of a contract.
    pub async fn make_revision(&self, rctx: &RequestContext, revision: Revision) -> VmResult<Revision> {
        let call = Self::operation_call(rctx, VmOperation::MakeContractRevision);
        let contracts = &self.services.contracts;

        self.make_operation(rctx.token(), &call, move || async move {
            if revision.max_fuel == 0 {
                return Err(VmError::InvalidFuel(revision.max_fuel));
            }
            Ok(contracts.make_revision(revision).await?)
        })
        .await
    }

    /// Creates a user.
    pub async fn create_user(&self, rctx: &RequestContext, user: User) -> VmResult<User> {
        let call = Self::operation_call(rctx, VmOperation::CreateUser);
        let users = &self.services.users;

        self.make_operation(rctx.token(), &call, move || async move {
            user.validate()?;
            Ok(users.create_user(user).await?)
        })
        .await
    }

    /// Updates a user.
    pub async fn update_user(&self, rctx: &RequestContext, id: i64, update: UserUpdate) -> VmResult<User> {
        let call = Self::operation_call(rctx, VmOperation::UpdateUser);
        let users = &self.services.users;

        self.make_operation(rctx.token(), &call, move || async move {
            Ok(users.update_user(id, update).await?)
        })
        .await
    }

    /// Deletes a user.
    pub async fn delete_user(&self, rctx: &RequestContext, id: i64) -> VmResult<()> {
        let call = Self::operation_call(rctx, VmOperation::DeleteUser);
        let users = &self.services.users;

        self.make_operation(rctx.token(), &call, move || async move {
            Ok(users.delete_user(id).await?)
        })
        .await
    }

    /// Authenticates a user.
    pub async fn authenticate(&self, rctx: &RequestContext, opts: AuthUserOptions) -> VmResult<Auth> {
        let call = Self::operation_call(rctx, VmOperation::Authenticate);
        let auths = &self.services.auths;

        self.make_operation(rctx.token(), &call, move || async move {
            Ok(auths.authenticate(opts).await?)
        })
        .await
    }

    /// Links a user to an authentication source.
    pub async fn create_auth(&self, rctx: &RequestContext, auth: Auth) -> VmResult<Auth> {
        let call = Self::operation_call(rctx, VmOperation::CreateAuth);
        let auths = &self.services.auths;

        self.make_operation(rctx.token(), &call, move || async move {
            auth.validate()?;
            Ok(auths.create_auth(auth).await?)
        })
        .await
    }

    /// Removes an authentication link.
    pub async fn delete_auth(&self, rctx: &RequestContext, id: i64) -> VmResult<()> {
        let call = Self::operation_call(rctx, VmOperation::DeleteAuth);
        let auths = &self.services.auths;

        self.make_operation(rctx.token(), &call, move || async move {
            Ok(auths.delete_auth(id).await?)
        })
        .await
    }

    /// Snapshot of the fuel tank. Served whatever the engine state.
    pub async fn stats(&self, rctx: &RequestContext) -> VmResult<FuelStat> {
        let call = VmCall::new(VmCallOpt {
            operation: VmOperation::VmStats,
            caller: rctx.user().cloned(),
            custom_max_fuel: Some(VmOperation::VmStats.cost()),
            ignore_refuel: true,
            ignore_engine_state: true,
            ..Default::default()
        });
        let tank = &self.tank;
        let ctx = rctx.token();

        self.make_operation(ctx, &call, move || async move { tank.stats(ctx).await })
            .await
    }
}

impl Drop for FuelVm {
    fn drop(&mut self) {
        self.ctx.cancel();
    }
}

fn apply_event(engine: &dyn EngineService, event: Event) {
    let result = match event.event_type {
        EventType::EngineShouldPause => engine.pause(),
        EventType::EngineShouldResume => engine.resume(),
    };

    match result {
        Ok(()) => info!("engine {}: {}", engine.state(), event.message),
        Err(err) => debug!("ignoring {:?}: {err}", event.event_type),
    }
}

async fn load_state(states: &dyn StateService, revision_id: i64, user_id: i64) -> VmResult<StateValue> {
    match states.find_state(revision_id, user_id).await {
        Ok(state) => Ok(state.value),
        Err(err) if err.code == ErrorCode::NotFound => {
            let state = states
                .create_state(ContractState {
                    revision_id,
                    user_id,
                    value: StateValue::new(),
                })
                .await?;
            Ok(state.value)
        }
        Err(err) => Err(err.into()),
    }
}
