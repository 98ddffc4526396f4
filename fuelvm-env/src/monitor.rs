//! The fuel monitor samples the tank and asks the engine to pause when fuel
//! runs low and to resume once enough fuel came back.

use fuelvm_common::{Fuel, VmState};
use futures::FutureExt;
use log::{error, warn};
use serde_json::json;
use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

use crate::{
    engine::EngineService,
    error::VmResult,
    event::{Event, EventBus, EventType},
    running::{panic_message, PeriodicTask},
    tank::FuelTankService,
};

/// Usage, in percent of capacity, at or above which a running engine is
/// asked to pause.
pub const PAUSE_THRESHOLD_PERCENT: u64 = 95;

/// Usage, in percent of capacity, at or below which a paused engine is
/// asked to resume.
pub const RESUME_THRESHOLD_PERCENT: u64 = 65;

#[derive(Clone)]
struct Sampler {
    bus: EventBus,
    engine: Arc<dyn EngineService>,
    tank: Arc<dyn FuelTankService>,
}

impl Sampler {
    async fn sample(&self, ctx: &CancellationToken) -> VmResult<Option<EventType>> {
        let event_type = match self.engine.state() {
            VmState::Running => EventType::EngineShouldPause,
            VmState::Paused => EventType::EngineShouldResume,
            VmState::Initializing | VmState::Stopped => return Ok(None),
        };

        let used = self.tank.fuel(ctx).await?;
        let capacity = self.tank.capacity();

        let publish = match event_type {
            EventType::EngineShouldPause => above(used, capacity, PAUSE_THRESHOLD_PERCENT),
            EventType::EngineShouldResume => below(used, capacity, RESUME_THRESHOLD_PERCENT),
        };
        if !publish {
            return Ok(None);
        }

        let message = match event_type {
            EventType::EngineShouldPause => "fuel tank is almost empty",
            EventType::EngineShouldResume => "fuel tank has been refilled",
        };
        self.bus.publish_event(
            Event::new(event_type, message)
                .with_payload(json!({ "fuel_used": used, "fuel_capacity": capacity })),
        );

        Ok(Some(event_type))
    }

    async fn tick(self, ctx: CancellationToken) {
        match AssertUnwindSafe(self.sample(&ctx)).catch_unwind().await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => warn!("fuel monitor sample failed: {err}"),
            Err(panic) => error!(
                target: "fuelvm::critical",
                "panic while measuring fuel consumption: {}",
                panic_message(panic.as_ref())
            ),
        }
    }
}

/// `used >= percent% of capacity`, without overflow.
fn above(used: Fuel, capacity: Fuel, percent: u64) -> bool {
    u128::from(used) * 100 >= u128::from(capacity) * u128::from(percent)
}

/// `used <= percent% of capacity`, without overflow.
fn below(used: Fuel, capacity: Fuel, percent: u64) -> bool {
    u128::from(used) * 100 <= u128::from(capacity) * u128::from(percent)
}

/// Periodic sampler of the fuel tank.
pub struct FuelMonitor {
    sampler: Sampler,
    interval: Duration,
    task: PeriodicTask,
}

impl FuelMonitor {
    /// Samples `tank` every `interval` once started, publishing on `bus`.
    pub fn new(
        bus: EventBus,
        engine: Arc<dyn EngineService>,
        tank: Arc<dyn FuelTankService>,
        interval: Duration,
    ) -> Self {
        Self {
            sampler: Sampler { bus, engine, tank },
            interval,
            task: PeriodicTask::new("fuel monitor"),
        }
    }

    /// Takes one sample, returning the event published, if any.
    pub async fn sample(&self, ctx: &CancellationToken) -> VmResult<Option<EventType>> {
        self.sampler.sample(ctx).await
    }

    /// Starts sampling until stopped or until `ctx` is cancelled.
    pub fn start_monitoring(&self, ctx: &CancellationToken) -> VmResult<()> {
        let sampler = self.sampler.clone();
        let tick_ctx = ctx.clone();
        self.task.start(ctx, self.interval, move || {
            sampler.clone().tick(tick_ctx.clone())
        })
    }

    /// Stops sampling.
    pub fn stop_monitoring(&self) -> VmResult<()> {
        self.task.stop()
    }

    /// Whether the monitor is sampling.
    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }
}
