use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use solana_sdk::native_token::sol_to_lamports;

use crate::error::{CloserError, Result};

/// Run configuration, loaded once at startup and shared read-only by every mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub rpc_endpoint: String,
    pub wallets_file: PathBuf,
    pub fund_file: PathBuf,
    /// Where the check stage writes the eligible wallet files.
    pub output_dir: PathBuf,
    /// Fan-out of the read-only check stage.
    pub parallel_wallets: usize,
    pub batch_size: usize,
    pub delay_between_wallets_ms: u64,
    pub delay_between_batches_ms: u64,
    pub min_claimable_sol: f64,
    pub transaction_fee_sol: f64,
    pub min_balance_to_collect_sol: f64,
    /// Rebroadcast attempts requested from the RPC node per transaction.
    pub confirm_retries: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            rpc_endpoint: "https://api.mainnet-beta.solana.com".to_string(),
            wallets_file: PathBuf::from("wallets.txt"),
            fund_file: PathBuf::from("fund.txt"),
            output_dir: PathBuf::from("."),
            parallel_wallets: 3,
            batch_size: 3,
            delay_between_wallets_ms: 1000,
            delay_between_batches_ms: 2000,
            min_claimable_sol: 0.001,
            transaction_fee_sol: 0.000005,
            min_balance_to_collect_sol: 0.00001,
            confirm_retries: 3,
        }
    }
}

impl Settings {
    /// Reads a JSON settings file; keys it leaves out keep their defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let settings = match path {
            None => Self::default(),
            Some(path) => {
                let content = fs::read_to_string(path).map_err(|err| {
                    CloserError::config(format!("failed to read settings {}: {err}", path.display()))
                })?;

                serde_json::from_str(&content).map_err(|err| {
                    CloserError::config(format!("failed to parse settings {}: {err}", path.display()))
                })?
            }
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(CloserError::config("batch_size must be at least 1"));
        }

        if self.parallel_wallets == 0 {
            return Err(CloserError::config("parallel_wallets must be at least 1"));
        }

        for (name, value) in [
            ("min_claimable_sol", self.min_claimable_sol),
            ("transaction_fee_sol", self.transaction_fee_sol),
            ("min_balance_to_collect_sol", self.min_balance_to_collect_sol),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(CloserError::config(format!("{name} must be a non-negative number")));
            }
        }

        Ok(())
    }

    pub fn min_claimable(&self) -> u64 {
        sol_to_lamports(self.min_claimable_sol)
    }

    pub fn transaction_fee(&self) -> u64 {
        sol_to_lamports(self.transaction_fee_sol)
    }

    pub fn min_balance_to_collect(&self) -> u64 {
        sol_to_lamports(self.min_balance_to_collect_sol)
    }

    pub fn eligible_keys_path(&self) -> PathBuf {
        self.output_dir.join(crate::constant::ELIGIBLE_KEYS_FILE)
    }

    pub fn eligible_address_path(&self) -> PathBuf {
        self.output_dir.join(crate::constant::ELIGIBLE_ADDRESS_FILE)
    }
}
