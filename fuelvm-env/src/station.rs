//! The fuel station gives fuel back to the tank at a fixed rate.

use fuelvm_common::Fuel;
use futures::FutureExt;
use log::error;
use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

use crate::{
    error::VmResult,
    running::{panic_message, PeriodicTask},
    tank::FuelTankService,
};

/// Periodic refueler of a fuel tank.
pub struct FuelStation {
    tank: Arc<dyn FuelTankService>,
    refill_amount: Fuel,
    refill_rate: Duration,
    task: PeriodicTask,
}

impl FuelStation {
    /// Refuels `tank` by `refill_amount` every `refill_rate` once started.
    pub fn new(tank: Arc<dyn FuelTankService>, refill_amount: Fuel, refill_rate: Duration) -> Self {
        Self {
            tank,
            refill_amount,
            refill_rate,
            task: PeriodicTask::new("fuel station"),
        }
    }

    /// Starts refueling until stopped or until `ctx` is cancelled.
    pub fn resume_refueling(&self, ctx: &CancellationToken) -> VmResult<()> {
        let tank = Arc::clone(&self.tank);
        let amount = self.refill_amount;
        let tick_ctx = ctx.clone();

        self.task.start(ctx, self.refill_rate, move || {
            refuel_once(Arc::clone(&tank), tick_ctx.clone(), amount)
        })
    }

    /// Stops refueling.
    pub fn stop_refueling(&self) -> VmResult<()> {
        self.task.stop()
    }

    /// Whether the station is refueling.
    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }
}

async fn refuel_once(tank: Arc<dyn FuelTankService>, ctx: CancellationToken, amount: Fuel) {
    let refuel = AssertUnwindSafe(async { tank.refuel(&ctx, amount).await });
    match refuel.catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!("fuel station failed to refuel: {err}"),
        Err(panic) => error!("panic while refueling: {}", panic_message(panic.as_ref())),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        error::VmError,
        tank::FuelTank,
        testutils::PanickingTank,
    };

    #[tokio::test]
    async fn refuels_periodically() {
        let ctx = CancellationToken::new();
        let tank = Arc::new(FuelTank::local(1000));
        tank.burn(&ctx, 900).await.unwrap();

        let station = FuelStation::new(tank.clone(), 100, Duration::from_millis(10));
        station.resume_refueling(&ctx).unwrap();
        assert_eq!(
            station.resume_refueling(&ctx),
            Err(VmError::AlreadyRunning("fuel station"))
        );

        tokio::time::sleep(Duration::from_millis(150)).await;
        station.stop_refueling().unwrap();
        assert!(!station.is_running());
        assert_eq!(tank.fuel(&ctx).await.unwrap(), 0);
        assert_eq!(
            station.stop_refueling(),
            Err(VmError::NotRunning("fuel station"))
        );
    }

    #[tokio::test]
    async fn survives_panicking_tank() {
        let ctx = CancellationToken::new();
        let tank = Arc::new(PanickingTank::default());

        let station = FuelStation::new(tank.clone(), 10, Duration::from_millis(10));
        station.resume_refueling(&ctx).unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(station.is_running());
        assert!(tank.calls() >= 2);

        ctx.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!station.is_running());
    }
}
