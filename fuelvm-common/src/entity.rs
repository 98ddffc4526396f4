//! Entities the runtime passes to its collaborators. Persistence of these
//! objects happens outside of the runtime.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{error::AppError, fuel::Fuel};

/// Characters that cannot appear in a user name.
pub const USER_NAME_INVALID_CHARACTERS: &str = "!@#$%^&*()+=[]{}|\\;:'\"<>,/?`~";

/// A user of the system.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
}

impl User {
    /// Basic validation of user fields.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.name.is_empty() {
            return Err(AppError::invalid("name is required"));
        }

        if self.name.chars().any(char::is_whitespace) {
            return Err(AppError::invalid("name cannot contain whitespaces"));
        }

        if self
            .name
            .chars()
            .any(|c| USER_NAME_INVALID_CHARACTERS.contains(c))
        {
            return Err(AppError::invalid("name cannot contain invalid characters"));
        }

        if matches!(self.email.as_deref(), Some("")) {
            return Err(AppError::invalid("email cannot be empty if provided"));
        }

        Ok(())
    }
}

/// Fields of a user that can be updated.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Link between a user and an authentication source.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auth {
    pub id: i64,
    pub user_id: i64,
    pub source: String,
    pub source_id: String,
    pub access_token: Option<String>,
}

impl Auth {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.user_id == 0 {
            return Err(AppError::invalid("user is required"));
        }
        if self.source.is_empty() {
            return Err(AppError::invalid("source is required"));
        }
        if self.source_id.is_empty() {
            return Err(AppError::invalid("source id is required"));
        }
        if matches!(self.access_token.as_deref(), Some("")) {
            return Err(AppError::invalid("access token cannot be empty if provided"));
        }
        Ok(())
    }
}

/// Credentials presented to the authentication collaborator.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUserOptions {
    pub source: String,
    pub email: Option<String>,
    pub password: Option<String>,
    pub code: Option<String>,
}

/// Immutable snapshot of a contract's code.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub id: i64,
    pub contract_id: i64,
    pub rev: u32,
    /// WebAssembly module, binary or text format.
    pub code: Vec<u8>,
    /// Maximum fuel the revision may consume. Also drives its wall clock limit.
    pub max_fuel: Fuel,
    pub notes: String,
}

/// A user-defined program.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub description: String,
    pub max_fuel: Fuel,
    /// Stateful contracts persist a key/value state per revision.
    pub stateful: bool,
    pub last_revision: Option<Revision>,
}

impl Contract {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.name.is_empty() {
            return Err(AppError::invalid("contract name is required"));
        }
        if self.user_id == 0 {
            return Err(AppError::invalid("contract owner is required"));
        }
        if self.max_fuel == 0 {
            return Err(AppError::invalid("contract max fuel must be positive"));
        }
        Ok(())
    }
}

/// Fields of a contract that can be updated.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub max_fuel: Option<Fuel>,
}

/// Persistent key/value state of a stateful contract.
pub type StateValue = BTreeMap<String, i64>;

/// State of a contract revision.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractState {
    pub revision_id: i64,
    pub user_id: i64,
    pub value: StateValue,
}

impl ContractState {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.revision_id == 0 {
            return Err(AppError::invalid("revision id is required"));
        }
        if self.user_id == 0 {
            return Err(AppError::invalid("user id is required"));
        }
        Ok(())
    }
}
