use fuelvm_common::{
    entity::{Contract, ContractUpdate, Revision, User},
    fuel::{FUEL_INSTANT_ACTION_AMOUNT, FUEL_SLOW_ACTION_AMOUNT},
    ErrorCode, VmOperation, VmState,
};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

use crate::{
    call::{RequestContext, VmCall, VmCallOpt},
    config::{PoolsConfig, VmConfig},
    engine::{ContractExecutor, Engine},
    error::{VmError, EXECUTION_TIMEOUT_PANIC},
    orchestrator::ContractCallOpt,
    tank::{FuelTank, FuelTankService},
    testutils::{
        contract_with_code, contracts, InMemoryBackend, PanickingExecutor, StaticExecutor,
    },
    FuelVm, VmStandard,
};

struct Harness {
    vm: FuelVm,
    tank: Arc<FuelTank>,
    backend: Arc<InMemoryBackend>,
}

fn config(capacity: &str) -> VmConfig {
    VmConfig {
        fuel_tank_capacity: capacity.into(),
        refuel_amount: Some("1 vFuel".into()),
        refuel_rate_ms: 60_000,
        monitor_interval_ms: 60_000,
        pools: PoolsConfig::vm_standard().unwrap(),
        ..Default::default()
    }
}

fn harness(config: &VmConfig, executor: Arc<dyn ContractExecutor>) -> Harness {
    let tank = Arc::new(FuelTank::local(config.tank_capacity().unwrap()));
    let engine = Arc::new(Engine::new(executor));
    let backend = Arc::new(InMemoryBackend::default());
    let vm = FuelVm::new(config, engine, tank.clone(), backend.services()).unwrap();

    Harness { vm, tank, backend }
}

fn exec(contract: &Contract) -> ContractCallOpt {
    ContractCallOpt {
        contract: contract.clone(),
        ..Default::default()
    }
}

#[tokio::test]
async fn execution_waits_for_the_engine() {
    let h = harness(&config("1000 vFuel"), Arc::new(StaticExecutor::new("ok")));
    let rctx = RequestContext::new();
    let contract = contract_with_code(contracts::ANSWER, FUEL_INSTANT_ACTION_AMOUNT, false);

    let pending =
        tokio::time::timeout(Duration::from_millis(50), h.vm.exec_contract(&rctx, exec(&contract)))
            .await;
    assert!(pending.is_err());
    assert_eq!(h.tank.fuel(rctx.token()).await.unwrap(), 0);

    h.vm.run().unwrap();
    assert_eq!(h.vm.exec_contract(&rctx, exec(&contract)).await.unwrap(), "ok");
    assert_eq!(h.tank.fuel(rctx.token()).await.unwrap(), 0);

    h.vm.close().unwrap();
}

#[tokio::test]
async fn cancelled_request_stops_waiting() {
    let h = harness(&config("1000 vFuel"), Arc::new(StaticExecutor::new("ok")));
    let rctx = RequestContext::new();
    let contract = contract_with_code(contracts::ANSWER, FUEL_INSTANT_ACTION_AMOUNT, false);

    let canceller = rctx.token().clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let err = h.vm.exec_contract(&rctx, exec(&contract)).await.unwrap_err();
    assert_eq!(err, VmError::Cancelled);

    // The single instant core came back.
    h.vm.run().unwrap();
    let rctx = RequestContext::new();
    assert_eq!(h.vm.exec_contract(&rctx, exec(&contract)).await.unwrap(), "ok");
}

#[tokio::test]
async fn low_fuel_is_returned_verbatim() {
    let executor = Arc::new(StaticExecutor::new("ok"));
    let h = harness(&config("40 vFuel"), executor.clone());
    h.vm.run().unwrap();

    let rctx = RequestContext::new();
    let contract = contract_with_code(contracts::ANSWER, FUEL_INSTANT_ACTION_AMOUNT, false);

    let err = h.vm.exec_contract(&rctx, exec(&contract)).await.unwrap_err();
    assert_eq!(err, VmError::NotEnoughFuel);
    assert_eq!(err.code(), ErrorCode::LowFuel);
    assert_eq!(executor.calls(), 0);
    assert_eq!(h.tank.fuel(rctx.token()).await.unwrap(), 0);
}

#[tokio::test]
async fn custom_fuel_overrides_the_revision() {
    let h = harness(&config("1000 vFuel"), Arc::new(StaticExecutor::new("ok")));
    h.vm.run().unwrap();

    let rctx = RequestContext::new();
    let contract = contract_with_code(contracts::ANSWER, FUEL_INSTANT_ACTION_AMOUNT, false);
    let opt = ContractCallOpt {
        custom_max_fuel: Some(2000),
        ..exec(&contract)
    };

    assert_eq!(h.vm.exec_contract(&rctx, opt).await, Err(VmError::NotEnoughFuel));
}

#[tokio::test]
async fn management_operations_keep_their_charge() {
    let h = harness(&config("1000 vFuel"), Arc::new(StaticExecutor::new("ok")));
    h.vm.run().unwrap();
    let rctx = RequestContext::new();

    let user = h
        .vm
        .create_user(
            &rctx,
            User {
                name: "alice".into(),
                email: Some("alice@example.com".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(user.id > 0);

    let contract = h
        .vm
        .create_contract(
            &rctx,
            Contract {
                user_id: user.id,
                name: "answer".into(),
                max_fuel: FUEL_INSTANT_ACTION_AMOUNT,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let revision = h
        .vm
        .make_revision(
            &rctx,
            Revision {
                contract_id: contract.id,
                code: contracts::ANSWER.as_bytes().to_vec(),
                max_fuel: FUEL_INSTANT_ACTION_AMOUNT,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(revision.rev, 1);

    let charged = VmOperation::CreateUser.cost()
        + VmOperation::CreateContract.cost()
        + VmOperation::MakeContractRevision.cost();
    assert_eq!(h.tank.fuel(rctx.token()).await.unwrap(), charged);

    let stored = h.backend.contract(contract.id).unwrap();
    assert_eq!(stored.last_revision, Some(revision));

    let err = h
        .vm
        .update_contract(&rctx, 999, ContractUpdate::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
}

#[tokio::test]
async fn invalid_entities_are_rejected() {
    let h = harness(&config("1000 vFuel"), Arc::new(StaticExecutor::new("ok")));
    h.vm.run().unwrap();
    let rctx = RequestContext::new();

    let err = h
        .vm
        .create_user(
            &rctx,
            User {
                name: "not valid".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Invalid);

    let err = h
        .vm
        .make_revision(&rctx, Revision::default())
        .await
        .unwrap_err();
    assert_eq!(err, VmError::InvalidFuel(0));
}

#[tokio::test]
async fn stats_are_served_while_paused() {
    let h = harness(&config("1000 vFuel"), Arc::new(StaticExecutor::new("ok")));
    h.vm.run().unwrap();
    h.vm.pause().unwrap();

    let rctx = RequestContext::new();
    let stats = h.vm.stats(&rctx).await.unwrap();
    assert_eq!(stats.fuel_capacity, 1000);
    assert_eq!(stats.fuel_used, VmOperation::VmStats.cost());

    let pending = tokio::time::timeout(Duration::from_millis(50), h.vm.delete_user(&rctx, 1)).await;
    assert!(pending.is_err());
}

#[tokio::test]
async fn panics_become_errors() {
    let h = harness(&config("1000 vFuel"), Arc::new(PanickingExecutor::new("boom")));
    h.vm.run().unwrap();

    let rctx = RequestContext::new();
    let contract = contract_with_code(contracts::ANSWER, FUEL_INSTANT_ACTION_AMOUNT, false);

    for _ in 0..2 {
        let err = h.vm.exec_contract(&rctx, exec(&contract)).await.unwrap_err();
        assert_eq!(err, VmError::OperationPanic("boom".into()));
        assert_eq!(err.code(), ErrorCode::Internal);
    }
}

#[tokio::test]
async fn timeout_panic_becomes_execution_timeout() {
    let h = harness(
        &config("1000 vFuel"),
        Arc::new(PanickingExecutor::new(EXECUTION_TIMEOUT_PANIC)),
    );
    h.vm.run().unwrap();

    let rctx = RequestContext::new();
    let contract = contract_with_code(contracts::ANSWER, FUEL_INSTANT_ACTION_AMOUNT, false);

    let err = h.vm.exec_contract(&rctx, exec(&contract)).await.unwrap_err();
    assert_eq!(err, VmError::ExecutionTimeout);
    assert_eq!(err.code(), ErrorCode::Sandbox);
}

#[tokio::test]
async fn lifecycle() {
    let h = harness(&config("1000 vFuel"), Arc::new(StaticExecutor::new("ok")));
    assert_eq!(h.vm.state(), VmState::Initializing);
    assert_eq!(h.vm.close(), Err(VmError::EngineNotRunning));

    h.vm.run().unwrap();
    assert!(h.vm.is_running());
    assert_eq!(h.vm.run(), Err(VmError::AlreadyRunning("fuel station")));

    h.vm.close().unwrap();
    assert_eq!(h.vm.state(), VmState::Stopped);
    assert_eq!(h.vm.close(), Err(VmError::EngineAlreadyStopped));
    assert!(h.vm.resume().is_err());
}

#[tokio::test]
async fn monitor_pauses_and_resumes_the_engine() {
    let mut config = config("100 vFuel");
    config.monitor_interval_ms = 10;
    let h = harness(&config, Arc::new(StaticExecutor::new("ok")));
    h.vm.run().unwrap();

    let ctx = CancellationToken::new();
    h.tank.burn(&ctx, 96).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.vm.state(), VmState::Paused);

    h.tank.refuel(&ctx, 96).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.vm.state(), VmState::Running);

    h.vm.close().unwrap();
}

#[tokio::test]
async fn stateful_contract_persists_its_state() {
    let backend = Arc::new(InMemoryBackend::default());
    let vm = FuelVm::local(&VmConfig::vm_standard().unwrap(), backend.services()).unwrap();
    vm.run().unwrap();

    let user = User {
        id: 7,
        name: "bob".into(),
        ..Default::default()
    };
    let rctx = RequestContext::new().with_user(user);
    let contract = contract_with_code(contracts::COUNTER, FUEL_SLOW_ACTION_AMOUNT, true);

    assert_eq!(vm.exec_contract(&rctx, exec(&contract)).await.unwrap(), "1");
    assert_eq!(vm.exec_contract(&rctx, exec(&contract)).await.unwrap(), "2");
    assert_eq!(backend.state(1, 7).unwrap().get("count"), Some(&2));

    vm.close().unwrap();
}

#[tokio::test]
async fn endless_contract_surfaces_as_sandbox_error() {
    let backend = Arc::new(InMemoryBackend::default());
    let vm = FuelVm::local(&VmConfig::vm_standard().unwrap(), backend.services()).unwrap();
    vm.run().unwrap();

    let rctx = RequestContext::new();
    let contract = contract_with_code(contracts::ENDLESS, FUEL_INSTANT_ACTION_AMOUNT, false);

    let err = vm.exec_contract(&rctx, exec(&contract)).await.unwrap_err();
    assert_eq!(err, VmError::ExecutionTimeout);
    assert_eq!(err.code(), ErrorCode::Sandbox);

    let stats = vm.stats(&rctx).await.unwrap();
    assert_eq!(stats.fuel_used, VmOperation::VmStats.cost());

    vm.close().unwrap();
}

#[tokio::test]
async fn close_during_operation_still_refuels() {
    for _ in 0..20 {
        let h = harness(&config("1000 vFuel"), Arc::new(StaticExecutor::new("ok")));
        h.vm.run().unwrap();

        let ctx = CancellationToken::new();
        let call = VmCall::new(VmCallOpt {
            operation: VmOperation::ExecuteContract,
            custom_max_fuel: Some(50),
            ..Default::default()
        });

        let (result, closed) = tokio::join!(
            h.vm.make_operation(&ctx, &call, || async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(())
            }),
            async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                h.vm.close()
            }
        );

        assert_eq!(result, Ok(()));
        assert_eq!(closed, Ok(()));
        assert_eq!(h.tank.fuel(&ctx).await.unwrap(), 0);
    }
}

#[tokio::test]
async fn failed_run_stops_started_loops() {
    let h = harness(&config("1000 vFuel"), Arc::new(StaticExecutor::new("ok")));
    h.vm.resume().unwrap();

    assert_eq!(h.vm.run(), Err(VmError::EngineAlreadyRunning));
    assert!(!h.vm.station().is_running());
    assert!(!h.vm.monitor().is_running());

    h.vm.pause().unwrap();
    h.vm.run().unwrap();
    assert!(h.vm.station().is_running());
    assert!(h.vm.monitor().is_running());
    assert!(h.vm.is_running());

    h.vm.close().unwrap();
    assert_eq!(h.vm.run(), Err(VmError::EngineAlreadyStopped));
    assert!(!h.vm.station().is_running());
    assert!(!h.vm.monitor().is_running());
}
