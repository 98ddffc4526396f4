use fuelvm_env::VmError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Error when reading contract {0}: {1}.")]
    UnreadableContract(String, String),

    #[error("Error when loading configuration: {0}.")]
    Config(String),

    #[error("Runtime error: {0}.")]
    Vm(#[from] VmError),
}
