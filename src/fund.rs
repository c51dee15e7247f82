use std::str::FromStr;

use clap::Parser;
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
    system_instruction,
};
use tracing::{error, info, warn};

use crate::{
    chain::ChainClient,
    error::{CloserError, Result},
    format_sol,
    prompt::{self, Prompt},
    settings::Settings,
    stats::{RunKind, RunStats},
    utils, wallet, Closer,
};

#[derive(Parser, Debug, Clone)]
pub struct FundArgs {
    #[arg(long, help = "SOL to send to each eligible wallet; asked interactively when omitted")]
    pub amount: Option<f64>,

    #[arg(long, requires = "amount", help = "Skip the confirmation prompt")]
    pub yes: bool,
}

/// Sends the same amount from one signer to every destination.
pub struct Disburser<'a, C: ChainClient> {
    chain: &'a C,
    fee_per_tx: u64,
    delay_ms: u64,
}

impl<'a, C: ChainClient> Disburser<'a, C> {
    pub fn new(chain: &'a C, settings: &Settings) -> Self {
        Self {
            chain,
            fee_per_tx: settings.transaction_fee(),
            delay_ms: settings.delay_between_wallets_ms,
        }
    }

    /// Lamports the signer must hold to fund every destination.
    pub fn required(&self, lamports: u64, count: usize) -> u64 {
        lamports.saturating_mul(count as u64).saturating_add(self.fees(count))
    }

    fn fees(&self, count: usize) -> u64 {
        self.fee_per_tx.saturating_mul(count as u64)
    }

    /// Returns `Ok(None)` when the operator declines.
    ///
    /// Fails with [`CloserError::InsufficientFunds`] before any transfer when the
    /// signer cannot cover every send plus its fee.
    pub async fn disburse(
        &self,
        destinations: &[String],
        lamports: u64,
        signer: &Keypair,
        prompt: &mut dyn Prompt,
    ) -> Result<Option<RunStats>> {
        let needed = self.required(lamports, destinations.len());
        let balance = self.chain.get_balance(&signer.pubkey()).await?;
        info!(fund_wallet = %signer.pubkey(), "balance: {}", format_sol!(balance));

        println!(
            "{} x {} wallets + ~{} fees = ~{}",
            format_sol!(lamports),
            destinations.len(),
            format_sol!(self.fees(destinations.len())),
            format_sol!(needed)
        );

        if needed > balance {
            return Err(CloserError::InsufficientFunds {
                needed,
                available: balance,
            });
        }

        if !prompt.confirm("Continue? (y/n): ")? {
            info!("fund cancelled");
            return Ok(None);
        }

        let mut stats = RunStats::new(RunKind::Fund, destinations.len());

        for (i, destination) in destinations.iter().enumerate() {
            let progress = format!("{}/{}", i + 1, destinations.len());

            match self.send(destination, lamports, signer).await {
                Ok(sig) => {
                    info!(%progress, tx = %sig, "{} -> {}", format_sol!(lamports), utils::short(destination));
                    stats.record_success();
                    stats.sent += lamports;
                }
                Err(err) => {
                    error!(%progress, destination = %destination, "{err}");
                    stats.record_failure();
                }
            }

            utils::pace(self.delay_ms, i, destinations.len()).await;
        }

        Ok(Some(stats))
    }

    async fn send(&self, destination: &str, lamports: u64, signer: &Keypair) -> Result<Signature> {
        let recipient = Pubkey::from_str(destination)
            .map_err(|err| CloserError::validation(format!("invalid address {destination}: {err}")))?;

        let ix = system_instruction::transfer(&signer.pubkey(), &recipient, lamports);
        self.chain.submit(&[ix], signer).await
    }
}

impl Closer {
    pub async fn fund(&self, chain: &impl ChainClient, args: &FundArgs, prompt: &mut dyn Prompt) -> Result<()> {
        let signer = wallet::load_fund_wallet(&self.settings.fund_file)?;
        info!(fund_wallet = %signer.pubkey(), "loaded fund wallet");

        let addresses = wallet::read_addresses(&self.settings.eligible_address_path())?;
        info!("wallets to fund: {}", addresses.len());

        if addresses.is_empty() {
            warn!("no wallets to fund");
            return Ok(());
        }

        let lamports = match args.amount {
            Some(amount) => prompt::amount_to_lamports(amount)?,
            None => prompt::ask_amount(prompt, "SOL to send to each wallet (recommended 0.001): ")?,
        };

        let disburser = Disburser::new(chain, &self.settings);
        let Some(stats) = disburser.disburse(&addresses, lamports, &signer, prompt).await?
        else {
            return Ok(());
        };

        println!("{stats}");

        match chain.get_balance(&signer.pubkey()).await {
            Ok(remaining) => println!("remaining on fund wallet: {}", format_sol!(remaining)),
            Err(err) => warn!("failed to read remaining balance: {err}"),
        }

        Ok(())
    }
}
