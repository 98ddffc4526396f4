#![warn(missing_docs)]

//! ## The fuelvm runtime.
//!
//! A fuel-metered execution environment. Every operation requested to the
//! runtime is charged in fuel, admitted through bounded core pools and run
//! only while the engine is running. A closed loop made of the fuel station
//! and the fuel monitor keeps the fuel tank under control, pausing and
//! resuming the engine through the event bus. Contracts are WebAssembly
//! modules executed in a sandbox with a hard wall clock limit.

pub mod call;
pub mod config;
pub mod engine;
pub mod event;
pub mod executor;
pub mod host;
pub mod monitor;
pub mod orchestrator;
pub mod pool;
pub mod service;
pub mod station;
pub mod store;
pub mod tank;
pub mod vm;

mod running;

#[allow(missing_docs)]
pub mod error;

use anyhow::Result;

pub use error::{VmError, VmResult};
pub use orchestrator::FuelVm;

/// In-memory collaborators, for tests and local runs.
#[cfg(any(test, feature = "testutils"))]
pub mod testutils;

#[cfg(test)]
mod test;

/// Standard object for the runtime. Implemented by the components that have
/// a production default, such as the configuration and the pool layout.
pub trait VmStandard {
    /// Returns the standard object.
    fn vm_standard() -> Result<Self>
    where
        Self: Sized;
}

/// Standard mocked object. Implemented by the components that need a
/// lightweight instance for testing.
pub trait VmMock {
    /// Returns the mocked object.
    fn mocked() -> Result<Self>
    where
        Self: Sized;
}
