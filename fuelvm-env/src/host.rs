//! Structures and implementations for the host environment. This module
//! defines every interaction between the contract code executed within the
//! VM and the runtime.

use anyhow::Result;
use fuelvm_common::entity::StateValue;
use log::debug;
use thiserror::Error;
use wasmtime::{Caller, Extern, Func, Store};

/// Largest result a contract can conclude with.
pub const MAX_RESULT_SIZE: usize = 64_000;

/// Largest state key a contract can address.
pub const MAX_STATE_KEY_SIZE: usize = 256;

#[allow(missing_docs)]
#[derive(Error, Debug)]
pub enum HostError {
    #[error("Binary does not export the entry function")]
    NoEntryPointExport,

    #[error("Extern is not a function")]
    ExternNotAFunction,

    #[error("Entry function must not take parameters")]
    InvalidEntryPoint,

    #[error("Contract cannot access memory without a memory export")]
    NoMemoryExport,

    #[error("Invalid offset or size passed to the host")]
    InvalidPointer,

    #[error("Tried reading outside of the contract memory")]
    MemoryOutOfBounds,

    #[error("Buffer of {0} bytes exceeds the host limit")]
    BufferTooLarge(usize),

    #[error("Buffer is not valid UTF-8")]
    InvalidUtf8,

    #[error("State is not available to stateless contracts")]
    NoState,

    #[error("Contract produced no result")]
    NoResult,
}

/// Information about a host function linked into the VM.
pub struct FunctionInfo {
    /// Import module name.
    pub module: &'static str,

    /// Import function name.
    pub func: &'static str,

    /// The function itself.
    pub wrapped: Func,
}

/// Data owned by the store of a single execution.
#[derive(Debug, Default)]
pub struct Host {
    result: Option<String>,
    state: Option<StateValue>,
}

impl Host {
    /// Host for a contract; `state` is `Some` for stateful contracts.
    pub fn new(state: Option<StateValue>) -> Self {
        Self {
            result: None,
            state,
        }
    }

    /// Consumes the host, returning the concluded result and the state.
    pub fn into_parts(self) -> (Option<String>, Option<StateValue>) {
        (self.result, self.state)
    }

    /// Returns all the host functions that must be defined in the linker.
    pub fn host_functions(store: &mut Store<Host>) -> [FunctionInfo; 4] {
        let conclude = {
            let wrapped = Func::wrap(
                &mut *store,
                |mut caller: Caller<'_, Host>, offset: i64, size: i64| -> Result<()> {
                    let bytes = read_bytes(&mut caller, offset, size, MAX_RESULT_SIZE)?;
                    let result = String::from_utf8(bytes).map_err(|_| HostError::InvalidUtf8)?;
                    caller.data_mut().result = Some(result);
                    Ok(())
                },
            );

            FunctionInfo {
                module: "env",
                func: "conclude",
                wrapped,
            }
        };

        let state_get = {
            let wrapped = Func::wrap(
                &mut *store,
                |mut caller: Caller<'_, Host>, offset: i64, size: i64| -> Result<i64> {
                    let key = read_key(&mut caller, offset, size)?;
                    let state = caller.data().state.as_ref().ok_or(HostError::NoState)?;
                    Ok(state.get(&key).copied().unwrap_or_default())
                },
            );

            FunctionInfo {
                module: "env",
                func: "state_get",
                wrapped,
            }
        };

        let state_set = {
            let wrapped = Func::wrap(
                &mut *store,
                |mut caller: Caller<'_, Host>, offset: i64, size: i64, value: i64| -> Result<()> {
                    let key = read_key(&mut caller, offset, size)?;
                    let state = caller.data_mut().state.as_mut().ok_or(HostError::NoState)?;
                    state.insert(key, value);
                    Ok(())
                },
            );

            FunctionInfo {
                module: "env",
                func: "state_set",
                wrapped,
            }
        };

        let log = {
            let wrapped = Func::wrap(&mut *store, |value: i64| {
                debug!(target: "fuelvm::contract", "contract log: {value}");
            });

            FunctionInfo {
                module: "env",
                func: "log",
                wrapped,
            }
        };

        [conclude, state_get, state_set, log]
    }
}

fn read_bytes(caller: &mut Caller<'_, Host>, offset: i64, size: i64, limit: usize) -> Result<Vec<u8>> {
    let offset = usize::try_from(offset).map_err(|_| HostError::InvalidPointer)?;
    let size = usize::try_from(size).map_err(|_| HostError::InvalidPointer)?;
    if size > limit {
        return Err(HostError::BufferTooLarge(size).into());
    }

    let memory = caller
        .get_export("memory")
        .and_then(Extern::into_memory)
        .ok_or(HostError::NoMemoryExport)?;

    let mut buffer = vec![0; size];
    memory
        .read(&*caller, offset, &mut buffer)
        .map_err(|_| HostError::MemoryOutOfBounds)?;

    Ok(buffer)
}

fn read_key(caller: &mut Caller<'_, Host>, offset: i64, size: i64) -> Result<String> {
    let bytes = read_bytes(caller, offset, size, MAX_STATE_KEY_SIZE)?;
    Ok(String::from_utf8(bytes).map_err(|_| HostError::InvalidUtf8)?)
}
