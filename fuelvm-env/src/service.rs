//! Interfaces of the collaborators the runtime delegates persistence and
//! authentication to. They report failures as [`AppError`].

use async_trait::async_trait;
use fuelvm_common::{
    entity::{
        Auth, AuthUserOptions, Contract, ContractState, ContractUpdate, Revision, StateValue,
        User, UserUpdate,
    },
    AppError,
};

/// Result type of the collaborators.
pub type ServiceResult<T> = Result<T, AppError>;

/// Persistence of contracts and their revisions.
#[async_trait]
pub trait ContractManagementService: Send + Sync {
    /// Stores a new contract, returning it with its id.
    async fn create_contract(&self, contract: Contract) -> ServiceResult<Contract>;

    /// Applies `update` to the contract `id`.
    async fn update_contract(&self, id: i64, update: ContractUpdate) -> ServiceResult<Contract>;

    /// Removes the contract `id`.
    async fn delete_contract(&self, id: i64) -> ServiceResult<()>;

    /// Stores a new revision and makes it the contract's last one.
    async fn make_revision(&self, revision: Revision) -> ServiceResult<Revision>;
}

/// Persistence of users.
#[async_trait]
pub trait UserManagementService: Send + Sync {
    /// Stores a new user, returning it with its id.
    async fn create_user(&self, user: User) -> ServiceResult<User>;

    /// Applies `update` to the user `id`.
    async fn update_user(&self, id: i64, update: UserUpdate) -> ServiceResult<User>;

    /// Removes the user `id`.
    async fn delete_user(&self, id: i64) -> ServiceResult<()>;
}

/// Authentication.
#[async_trait]
pub trait AuthManagementService: Send + Sync {
    /// Checks credentials, returning the matching auth.
    async fn authenticate(&self, opts: AuthUserOptions) -> ServiceResult<Auth>;

    /// Links a user to an authentication source.
    async fn create_auth(&self, auth: Auth) -> ServiceResult<Auth>;

    /// Removes the auth `id`.
    async fn delete_auth(&self, id: i64) -> ServiceResult<()>;
}

/// Persistence of the state of stateful contracts.
#[async_trait]
pub trait StateService: Send + Sync {
    /// State of `revision_id` for `user_id`; a not-found error if missing.
    async fn find_state(&self, revision_id: i64, user_id: i64) -> ServiceResult<ContractState>;

    /// Stores a new state.
    async fn create_state(&self, state: ContractState) -> ServiceResult<ContractState>;

    /// Overwrites the value of an existing state.
    async fn update_state(
        &self,
        revision_id: i64,
        user_id: i64,
        value: StateValue,
    ) -> ServiceResult<ContractState>;
}
