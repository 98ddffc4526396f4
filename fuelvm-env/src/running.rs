//! Periodic background loops guarded by a running flag.

use log::debug;
use std::{
    any::Any,
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::{VmError, VmResult};

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Best effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// A named loop that runs `tick` every period until stopped or until the
/// token it was started with is cancelled. At most one loop per task runs
/// at any time.
pub(crate) struct PeriodicTask {
    name: &'static str,
    running: Arc<AtomicBool>,
    slot: Arc<Mutex<LoopSlot>>,
}

/// The loop currently owning the running flag.
#[derive(Default)]
struct LoopSlot {
    generation: u64,
    stop: Option<CancellationToken>,
}

impl PeriodicTask {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            running: Arc::new(AtomicBool::new(false)),
            slot: Arc::new(Mutex::new(LoopSlot::default())),
        }
    }

    fn slot(&self) -> MutexGuard<'_, LoopSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn start<F, Fut>(
        &self,
        ctx: &CancellationToken,
        period: Duration,
        mut tick: F,
    ) -> VmResult<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.slot();
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(VmError::AlreadyRunning(self.name));
        }

        let token = ctx.child_token();
        slot.generation += 1;
        slot.stop = Some(token.clone());
        let generation = slot.generation;
        drop(slot);

        let parent = ctx.clone();
        let running = Arc::clone(&self.running);
        let owner = Arc::clone(&self.slot);
        let name = self.name;
        let period = period.max(MIN_PERIOD);

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => tick().await,
                }
            }

            // Only the latest loop owns the flag. An explicit stop has
            // already cleared it.
            let mut slot = owner.lock().unwrap_or_else(PoisonError::into_inner);
            if parent.is_cancelled() && slot.generation == generation {
                running.store(false, Ordering::Release);
                slot.stop = None;
            }
            drop(slot);
            debug!("{name} loop exited");
        });

        Ok(())
    }

    pub(crate) fn stop(&self) -> VmResult<()> {
        let mut slot = self.slot();
        if self
            .running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(VmError::NotRunning(self.name));
        }

        if let Some(token) = slot.stop.take() {
            token.cancel();
        }

        Ok(())
    }
}
