use async_trait::async_trait;
use fuelvm_common::{
    entity::{
        Auth, AuthUserOptions, Contract, ContractState, ContractUpdate, Revision, StateValue,
        User, UserUpdate,
    },
    AppError, ErrorCode,
};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use crate::{
    orchestrator::VmServices,
    service::{
        AuthManagementService, ContractManagementService, ServiceResult, StateService,
        UserManagementService,
    },
    VmMock,
};

/// Auth source checked against user email and password.
pub const LOCAL_AUTH_SOURCE: &str = "local";

#[derive(Default)]
struct Tables {
    next_id: i64,
    contracts: BTreeMap<i64, Contract>,
    users: BTreeMap<i64, User>,
    auths: BTreeMap<i64, Auth>,
    states: BTreeMap<(i64, i64), ContractState>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Every collaborator of the runtime backed by in-memory maps.
#[derive(Default)]
pub struct InMemoryBackend {
    tables: Mutex<Tables>,
}

impl InMemoryBackend {
    fn tables(&self) -> ServiceResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| AppError::internal("in-memory backend is poisoned"))
    }

    /// Collaborators sharing this backend.
    pub fn services(self: &Arc<Self>) -> VmServices {
        VmServices {
            contracts: self.clone(),
            users: self.clone(),
            auths: self.clone(),
            states: self.clone(),
        }
    }

    /// Stored contract `id`, with its last revision.
    pub fn contract(&self, id: i64) -> Option<Contract> {
        self.tables().ok()?.contracts.get(&id).cloned()
    }

    /// Stored state of `revision_id` for `user_id`.
    pub fn state(&self, revision_id: i64, user_id: i64) -> Option<StateValue> {
        self.tables()
            .ok()?
            .states
            .get(&(revision_id, user_id))
            .map(|state| state.value.clone())
    }
}

impl VmMock for VmServices {
    fn mocked() -> anyhow::Result<Self> {
        Ok(Arc::new(InMemoryBackend::default()).services())
    }
}

fn not_found(what: &str, id: i64) -> AppError {
    AppError::not_found(format!("{what} {id} not found"))
}

#[async_trait]
impl ContractManagementService for InMemoryBackend {
    async fn create_contract(&self, mut contract: Contract) -> ServiceResult<Contract> {
        contract.validate()?;

        let mut tables = self.tables()?;
        contract.id = tables.next_id();
        tables.contracts.insert(contract.id, contract.clone());
        Ok(contract)
    }

    async fn update_contract(&self, id: i64, update: ContractUpdate) -> ServiceResult<Contract> {
        let mut tables = self.tables()?;
        let contract = tables
            .contracts
            .get_mut(&id)
            .ok_or_else(|| not_found("contract", id))?;

        let mut updated = contract.clone();
        if let Some(name) = update.name {
            updated.name = name;
        }
        if let Some(description) = update.description {
            updated.description = description;
        }
        if let Some(max_fuel) = update.max_fuel {
            updated.max_fuel = max_fuel;
        }
        updated.validate()?;

        *contract = updated.clone();
        Ok(updated)
    }

    async fn delete_contract(&self, id: i64) -> ServiceResult<()> {
        self.tables()?
            .contracts
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| not_found("contract", id))
    }

    async fn make_revision(&self, mut revision: Revision) -> ServiceResult<Revision> {
        if revision.code.is_empty() {
            return Err(AppError::invalid("revision code is required"));
        }

        let mut tables = self.tables()?;
        revision.id = tables.next_id();

        let contract = tables
            .contracts
            .get_mut(&revision.contract_id)
            .ok_or_else(|| not_found("contract", revision.contract_id))?;
        revision.rev = contract
            .last_revision
            .as_ref()
            .map_or(1, |last| last.rev + 1);
        contract.last_revision = Some(revision.clone());

        Ok(revision)
    }
}

#[async_trait]
impl UserManagementService for InMemoryBackend {
    async fn create_user(&self, mut user: User) -> ServiceResult<User> {
        user.validate()?;

        let mut tables = self.tables()?;
        if user.email.is_some() && tables.users.values().any(|other| other.email == user.email) {
            return Err(AppError::new(ErrorCode::Exists, "email already in use"));
        }

        user.id = tables.next_id();
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update_user(&self, id: i64, update: UserUpdate) -> ServiceResult<User> {
        let mut tables = self.tables()?;
        let user = tables.users.get_mut(&id).ok_or_else(|| not_found("user", id))?;

        let mut updated = user.clone();
        if let Some(name) = update.name {
            updated.name = name;
        }
        if update.email.is_some() {
            updated.email = update.email;
        }
        updated.validate()?;

        *user = updated.clone();
        Ok(updated)
    }

    async fn delete_user(&self, id: i64) -> ServiceResult<()> {
        let mut tables = self.tables()?;
        tables.users.remove(&id).ok_or_else(|| not_found("user", id))?;
        tables.auths.retain(|_, auth| auth.user_id != id);
        Ok(())
    }
}

#[async_trait]
impl AuthManagementService for InMemoryBackend {
    async fn authenticate(&self, opts: AuthUserOptions) -> ServiceResult<Auth> {
        let tables = self.tables()?;
        let unauthorized = || AppError::new(ErrorCode::Unauthorized, "invalid credentials");

        if opts.source == LOCAL_AUTH_SOURCE {
            let user = tables
                .users
                .values()
                .find(|user| {
                    opts.email.is_some() && user.email == opts.email && user.password == opts.password
                })
                .ok_or_else(unauthorized)?;

            return Ok(Auth {
                user_id: user.id,
                source: LOCAL_AUTH_SOURCE.into(),
                source_id: user.email.clone().unwrap_or_default(),
                ..Default::default()
            });
        }

        let code = opts.code.as_deref().ok_or_else(unauthorized)?;
        tables
            .auths
            .values()
            .find(|auth| auth.source == opts.source && auth.source_id == code)
            .cloned()
            .ok_or_else(unauthorized)
    }

    async fn create_auth(&self, mut auth: Auth) -> ServiceResult<Auth> {
        auth.validate()?;

        let mut tables = self.tables()?;
        if !tables.users.contains_key(&auth.user_id) {
            return Err(not_found("user", auth.user_id));
        }

        auth.id = tables.next_id();
        tables.auths.insert(auth.id, auth.clone());
        Ok(auth)
    }

    async fn delete_auth(&self, id: i64) -> ServiceResult<()> {
        self.tables()?
            .auths
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| not_found("auth", id))
    }
}

#[async_trait]
impl StateService for InMemoryBackend {
    async fn find_state(&self, revision_id: i64, user_id: i64) -> ServiceResult<ContractState> {
        self.tables()?
            .states
            .get(&(revision_id, user_id))
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("no state for revision {revision_id}")))
    }

    async fn create_state(&self, state: ContractState) -> ServiceResult<ContractState> {
        state.validate()?;

        let mut tables = self.tables()?;
        let key = (state.revision_id, state.user_id);
        if tables.states.contains_key(&key) {
            return Err(AppError::new(ErrorCode::Exists, "state already exists"));
        }

        tables.states.insert(key, state.clone());
        Ok(state)
    }

    async fn update_state(
        &self,
        revision_id: i64,
        user_id: i64,
        value: StateValue,
    ) -> ServiceResult<ContractState> {
        let mut tables = self.tables()?;
        let state = tables
            .states
            .get_mut(&(revision_id, user_id))
            .ok_or_else(|| AppError::not_found(format!("no state for revision {revision_id}")))?;

        state.value = value;
        Ok(state.clone())
    }
}
