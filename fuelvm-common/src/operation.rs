//! Operation kinds and the engine state.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::{error::AppError, fuel::Fuel};

/// Cost of an operation that has no entry in the cost table.
pub const NOT_DEFINED_OPERATION_COST: Fuel = 25;

/// Every kind of request the runtime accepts.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum VmOperation {
    #[default]
    Generic,
    ExecuteContract,
    CreateContract,
    UpdateContract,
    DeleteContract,
    MakeContractRevision,
    CreateUser,
    UpdateUser,
    DeleteUser,
    Authenticate,
    CreateAuth,
    DeleteAuth,
    VmStats,
}

impl VmOperation {
    /// All operations, in declaration order.
    pub const ALL: [VmOperation; 13] = [
        Self::Generic,
        Self::ExecuteContract,
        Self::CreateContract,
        Self::UpdateContract,
        Self::DeleteContract,
        Self::MakeContractRevision,
        Self::CreateUser,
        Self::UpdateUser,
        Self::DeleteUser,
        Self::Authenticate,
        Self::CreateAuth,
        Self::DeleteAuth,
        Self::VmStats,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::ExecuteContract => "execute-contract",
            Self::CreateContract => "create-contract",
            Self::UpdateContract => "update-contract",
            Self::DeleteContract => "delete-contract",
            Self::MakeContractRevision => "make-contract-revision",
            Self::CreateUser => "create-user",
            Self::UpdateUser => "update-user",
            Self::DeleteUser => "delete-user",
            Self::Authenticate => "authenticate",
            Self::CreateAuth => "create-auth",
            Self::DeleteAuth => "delete-auth",
            Self::VmStats => "vm-stats",
        }
    }

    /// Fixed cost of the operation. Contract execution is priced per call
    /// from the contract, so its table entry is zero.
    pub fn cost(&self) -> Fuel {
        match self {
            Self::ExecuteContract => 0,
            Self::CreateContract => 10,
            Self::UpdateContract => 5,
            Self::DeleteContract => 15,
            Self::MakeContractRevision => 5,
            Self::CreateUser => 15,
            Self::UpdateUser => 5,
            Self::DeleteUser => 10,
            Self::Authenticate => 20,
            Self::CreateAuth => 5,
            Self::DeleteAuth => 5,
            Self::Generic | Self::VmStats => NOT_DEFINED_OPERATION_COST,
        }
    }
}

impl fmt::Display for VmOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VmOperation {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| AppError::invalid(format!("unknown vm operation: {s}")))
    }
}

/// Lifecycle state of the engine.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmState {
    Initializing = 0,
    Running = 1,
    Paused = 2,
    Stopped = 3,
}

impl VmState {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Initializing),
            1 => Some(Self::Running),
            2 => Some(Self::Paused),
            3 => Some(Self::Stopped),
            _ => None,
        }
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}
