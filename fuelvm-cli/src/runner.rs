use fuelvm_common::{
    entity::{Contract, Revision, User},
    fuel::FuelStat,
    Fuel,
};
use fuelvm_env::{
    call::RequestContext, config::VmConfig, orchestrator::ContractCallOpt,
    testutils::InMemoryBackend, FuelVm,
};
use std::{path::Path, sync::Arc};

use crate::error::CliError;

const LOCAL_USER: &str = "local";

/// A running in-process runtime with in-memory collaborators.
pub struct LocalRunner {
    vm: FuelVm,
    rctx: RequestContext,
}

impl LocalRunner {
    /// Starts a runtime from `config` and registers the local user.
    pub async fn start(config: &VmConfig) -> Result<Self, CliError> {
        let backend = Arc::new(InMemoryBackend::default());
        let vm = FuelVm::local(config, backend.services())?;
        vm.run()?;

        let user = vm
            .create_user(
                &RequestContext::new(),
                User {
                    name: LOCAL_USER.into(),
                    ..Default::default()
                },
            )
            .await?;

        Ok(Self {
            vm,
            rctx: RequestContext::new().with_user(user),
        })
    }

    /// Stores the module at `path` as a new contract with a single revision.
    pub async fn deploy(
        &self,
        path: impl AsRef<Path>,
        max_fuel: Fuel,
        stateful: bool,
    ) -> Result<Contract, CliError> {
        let path = path.as_ref();
        let code = std::fs::read(path).map_err(|err| {
            CliError::UnreadableContract(path.display().to_string(), err.to_string())
        })?;

        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().replace(|c: char| !c.is_alphanumeric(), "-"))
            .unwrap_or_else(|| "contract".into());
        let owner = self.rctx.user().map_or(0, |user| user.id);

        let mut contract = self
            .vm
            .create_contract(
                &self.rctx,
                Contract {
                    user_id: owner,
                    name,
                    max_fuel,
                    stateful,
                    ..Default::default()
                },
            )
            .await?;

        let revision = self
            .vm
            .make_revision(
                &self.rctx,
                Revision {
                    contract_id: contract.id,
                    code,
                    max_fuel,
                    ..Default::default()
                },
            )
            .await?;
        contract.last_revision = Some(revision);

        Ok(contract)
    }

    /// Executes the last revision of `contract`.
    pub async fn execute(&self, contract: &Contract) -> Result<String, CliError> {
        let opt = ContractCallOpt {
            contract: contract.clone(),
            ..Default::default()
        };
        Ok(self.vm.exec_contract(&self.rctx, opt).await?)
    }

    pub async fn stats(&self) -> Result<FuelStat, CliError> {
        Ok(self.vm.stats(&self.rctx).await?)
    }

    pub fn close(&self) -> Result<(), CliError> {
        Ok(self.vm.close()?)
    }
}
