//! Descriptors of a single request to the runtime.

use fuelvm_common::{
    entity::{Contract, Revision, User},
    Fuel, VmOperation,
};
use tokio_util::sync::CancellationToken;

/// Cancellation and identity of the request being served.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    token: CancellationToken,
    user: Option<User>,
}

impl RequestContext {
    /// Anonymous request with a fresh token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request bound to an existing token.
    pub fn with_token(token: CancellationToken) -> Self {
        Self { token, user: None }
    }

    /// Attaches the authenticated caller.
    pub fn with_user(mut self, user: User) -> Self {
        self.user = Some(user);
        self
    }

    /// Token cancelled when the request is abandoned.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Authenticated caller, if any.
    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    /// Abandons the request.
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

/// Options used to build a [`VmCall`].
#[derive(Clone, Debug, Default)]
pub struct VmCallOpt {
    /// Kind of the operation.
    pub operation: VmOperation,
    /// Contract involved, if any.
    pub contract: Option<Contract>,
    /// Explicit revision; defaults to the contract's last revision.
    pub revision: Option<Revision>,
    /// Caller of the operation.
    pub caller: Option<User>,
    /// Overrides every other fuel source.
    pub custom_max_fuel: Option<Fuel>,
    /// Keep the burned fuel charged after the operation.
    pub ignore_refuel: bool,
    /// Run even while the engine is not running.
    pub ignore_engine_state: bool,
}

/// An immutable request. Its fuel is resolved once, at construction.
#[derive(Clone, Debug)]
pub struct VmCall {
    opt: VmCallOpt,
    fuel: Fuel,
}

impl VmCall {
    /// Builds the call. Fuel comes from the custom override, else the
    /// revision, else the contract, else the operation cost table.
    pub fn new(opt: VmCallOpt) -> Self {
        let revision_fuel = opt
            .revision
            .as_ref()
            .or_else(|| opt.contract.as_ref().and_then(|c| c.last_revision.as_ref()))
            .map(|revision| revision.max_fuel);

        let fuel = opt
            .custom_max_fuel
            .or(revision_fuel)
            .or_else(|| opt.contract.as_ref().map(|contract| contract.max_fuel))
            .unwrap_or_else(|| opt.operation.cost());

        Self { opt, fuel }
    }

    /// Shorthand for a call charged at the operation's table cost.
    pub fn for_operation(operation: VmOperation) -> Self {
        Self::new(VmCallOpt {
            operation,
            custom_max_fuel: Some(operation.cost()),
            ignore_refuel: true,
            ..Default::default()
        })
    }

    /// Kind of the operation.
    pub fn operation(&self) -> VmOperation {
        self.opt.operation
    }

    /// Fuel charged for the call.
    pub fn fuel(&self) -> Fuel {
        self.fuel
    }

    /// Contract involved in the call.
    pub fn contract(&self) -> Option<&Contract> {
        self.opt.contract.as_ref()
    }

    /// Explicit revision, else the contract's last revision.
    pub fn revision(&self) -> Option<&Revision> {
        self.opt.revision.as_ref().or_else(|| {
            self.opt
                .contract
                .as_ref()
                .and_then(|contract| contract.last_revision.as_ref())
        })
    }

    /// Caller of the operation.
    pub fn caller(&self) -> Option<&User> {
        self.opt.caller.as_ref()
    }

    /// Whether the burned fuel stays charged.
    pub fn ignore_refuel(&self) -> bool {
        self.opt.ignore_refuel
    }

    /// Whether the call runs regardless of the engine state.
    pub fn ignore_engine_state(&self) -> bool {
        self.opt.ignore_engine_state
    }
}
