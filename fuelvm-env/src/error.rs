use fuelvm_common::{AppError, ErrorCode, Fuel, VmOperation};
use thiserror::Error;

/// Panic message raised when a sandboxed execution outlives its deadline
/// and the interrupt could not be surfaced as a typed error.
pub const EXECUTION_TIMEOUT_PANIC: &str = "engine-execution-panic-timeout";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    #[error("Fuel tank does not hold enough fuel")]
    NotEnoughFuel,

    #[error("Invalid fuel amount: {0}")]
    InvalidFuel(Fuel),

    #[error("Unable to burn fuel: {0}")]
    BurnFailed(Box<VmError>),

    #[error("Unable to refuel: {0}")]
    RefuelFailed(Box<VmError>),

    #[error("No core pool configured for operation {0}")]
    OperationPoolNotFound(VmOperation),

    #[error("No core pool found for operation {operation} with fuel {fuel}")]
    FuelPoolNotFound { operation: VmOperation, fuel: Fuel },

    #[error("Timed out while waiting for a core")]
    CorePoolTimeout,

    #[error("Invalid core pool configuration: {0}")]
    InvalidPoolConfig(String),

    #[error("Engine is not running")]
    EngineNotRunning,

    #[error("Engine is already running")]
    EngineAlreadyRunning,

    #[error("Engine is already paused")]
    EngineAlreadyPaused,

    #[error("Engine is already stopped")]
    EngineAlreadyStopped,

    #[error("{0} is already running")]
    AlreadyRunning(&'static str),

    #[error("{0} is not running")]
    NotRunning(&'static str),

    #[error("Contract execution exceeded its time limit")]
    ExecutionTimeout,

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Panic during vm operation: {0}")]
    OperationPanic(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Lock {name} failed: {reason}")]
    Lock { name: String, reason: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    App(#[from] AppError),
}

impl VmError {
    /// Error kind reported to callers.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotEnoughFuel => ErrorCode::LowFuel,
            Self::InvalidFuel(_) | Self::Config(_) | Self::InvalidPoolConfig(_) => {
                ErrorCode::Invalid
            }
            Self::OperationPoolNotFound(_) | Self::FuelPoolNotFound { .. } => {
                ErrorCode::CorePoolNotFound
            }
            Self::CorePoolTimeout => ErrorCode::CorePoolTimeout,
            Self::EngineNotRunning
            | Self::EngineAlreadyRunning
            | Self::EngineAlreadyPaused
            | Self::EngineAlreadyStopped
            | Self::AlreadyRunning(_)
            | Self::NotRunning(_)
            | Self::Cancelled => ErrorCode::Vm,
            Self::ExecutionTimeout | Self::Sandbox(_) => ErrorCode::Sandbox,
            Self::BurnFailed(_)
            | Self::RefuelFailed(_)
            | Self::OperationPanic(_)
            | Self::Storage(_)
            | Self::Lock { .. } => ErrorCode::Internal,
            Self::App(err) => err.code,
        }
    }
}

pub type VmResult<T> = Result<T, VmError>;
