use solana_client::client_error::ClientError;
use solana_sdk::native_token::lamports_to_sol;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CloserError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("rpc error: {0}")]
    Network(String),

    #[error("transaction {signature} failed: {reason}")]
    TransactionFailed { signature: String, reason: String },

    #[error(
        "insufficient funds: need {:.6} SOL, have {:.6} SOL",
        sol(.needed),
        sol(.available)
    )]
    InsufficientFunds { needed: u64, available: u64 },

    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<ClientError> for CloserError {
    fn from(err: ClientError) -> Self {
        CloserError::Network(format!("{err:#}"))
    }
}

impl CloserError {
    pub fn config(msg: impl Into<String>) -> Self {
        CloserError::Configuration(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        CloserError::Validation(msg.into())
    }
}

fn sol(lamports: &u64) -> f64 {
    lamports_to_sol(*lamports)
}

pub type Result<T, E = CloserError> = std::result::Result<T, E>;
