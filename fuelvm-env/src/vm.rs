//! Structures and implementations for the sandboxed WebAssembly VM.
//!

use anyhow::Result;
use std::sync::atomic::{AtomicU8, Ordering};
use wasmtime::{Engine, Instance, Linker, Module, Store, Trap, Val};

use crate::{
    engine::ExecutionOutput,
    host::{Host, HostError},
};

/// Name of the function every contract exports.
pub const ENTRY_POINT: &str = "run";

/// The execution has not been interrupted.
pub const NOT_INTERRUPTED: u8 = 0;
/// The execution outlived its deadline.
pub const INTERRUPTED_BY_TIMEOUT: u8 = 1;
/// The request that started the execution was cancelled.
pub const INTERRUPTED_BY_CANCELLATION: u8 = 2;

/// Builds an engine whose stores can be interrupted by bumping its epoch.
pub fn interruptible_engine() -> Result<Engine> {
    let mut config = wasmtime::Config::default();
    config.epoch_interruption(true);
    Engine::new(&config)
}

/// A single contract execution.
pub struct Vm {
    store: Store<Host>,
    instance: Instance,
}

impl Vm {
    /// Compiles and instantiates the contract. The store traps as soon as
    /// the engine epoch is incremented; `interrupt` reports whether that
    /// already happened before the deadline was armed.
    pub fn new(engine: &Engine, host: Host, code: &[u8], interrupt: &AtomicU8) -> Result<Self> {
        let module = Module::new(engine, code)?;

        let mut store = Store::new(engine, host);
        store.set_epoch_deadline(1);

        // The timer flags before it increments, so a flag missed here means
        // the increment lands after the deadline was armed.
        if interrupt.load(Ordering::SeqCst) != NOT_INTERRUPTED {
            return Err(Trap::Interrupt.into());
        }

        let mut linker = <Linker<Host>>::new(engine);
        for func_info in Host::host_functions(&mut store) {
            linker.define(
                &mut store,
                func_info.module,
                func_info.func,
                func_info.wrapped,
            )?;
        }

        let instance = linker.instantiate(&mut store, &module)?;

        Ok(Self { store, instance })
    }

    /// Calls the entry point and collects what the contract produced: the
    /// concluded string, else the integer returned by the entry point.
    pub fn metered_call(mut self) -> Result<ExecutionOutput> {
        let func = self
            .instance
            .get_export(&mut self.store, ENTRY_POINT)
            .ok_or(HostError::NoEntryPointExport)?
            .into_func()
            .ok_or(HostError::ExternNotAFunction)?;

        let ty = func.ty(&self.store);
        if ty.params().len() != 0 {
            return Err(HostError::InvalidEntryPoint.into());
        }

        let mut retrn: Vec<Val> = ty.results().map(|_| Val::I64(0)).collect();
        func.call(&mut self.store, &[], &mut retrn)?;

        let returned = retrn
            .first()
            .and_then(|val| val.i64().or_else(|| val.i32().map(i64::from)));

        let (concluded, state) = self.store.into_data().into_parts();
        let result = concluded
            .or_else(|| returned.map(|value| value.to_string()))
            .ok_or(HostError::NoResult)?;

        Ok(ExecutionOutput { result, state })
    }
}
