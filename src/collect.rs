use clap::Parser;
use solana_sdk::{pubkey::Pubkey, signature::Signature, signer::Signer, system_instruction};
use tracing::{error, info};

use crate::{
    chain::ChainClient,
    constant,
    error::Result,
    format_sol,
    prompt::Prompt,
    settings::Settings,
    stats::{RunKind, RunStats},
    utils,
    wallet::{self, WalletRecord},
    Closer,
};

#[derive(Parser, Debug, Clone)]
pub struct CollectArgs {
    #[arg(long, help = "Skip the confirmation prompt")]
    pub yes: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectOutcome {
    BelowMinimum { balance: u64 },
    /// Balance does not cover the fee reserve.
    NothingAfterFee { balance: u64 },
    IsDestination,
    Sent { signature: Signature, amount: u64 },
}

/// Sweeps wallet balances into one destination.
pub struct Collector<'a, C: ChainClient> {
    chain: &'a C,
    min_balance: u64,
    fee_reserve: u64,
    fee_estimate: u64,
    delay_ms: u64,
}

impl<'a, C: ChainClient> Collector<'a, C> {
    pub fn new(chain: &'a C, settings: &Settings) -> Self {
        Self {
            chain,
            min_balance: settings.min_balance_to_collect(),
            fee_reserve: constant::COLLECT_FEE_RESERVE,
            fee_estimate: settings.transaction_fee(),
            delay_ms: settings.delay_between_wallets_ms,
        }
    }

    /// Returns `Ok(None)` when the operator declines.
    pub async fn collect_all(
        &self,
        wallets: &[WalletRecord],
        destination: &Pubkey,
        prompt: &mut dyn Prompt,
    ) -> Result<Option<RunStats>> {
        if !prompt.confirm(&format!("Collect all SOL into {destination}? (y/n): "))? {
            info!("collect cancelled");
            return Ok(None);
        }

        let mut stats = RunStats::new(RunKind::Collect, wallets.len());

        for (i, wallet) in wallets.iter().enumerate() {
            let progress = format!("{}/{}", i + 1, wallets.len());

            match self.collect_one(wallet, destination).await {
                Ok(CollectOutcome::Sent { signature, amount }) => {
                    info!(wallet = %wallet.address, %progress, tx = %signature, "sent {}", format_sol!(amount));
                    stats.record_success();
                    stats.collected += amount;
                    stats.fees += self.fee_estimate;
                }
                Ok(CollectOutcome::BelowMinimum { balance }) => {
                    info!(wallet = %wallet.address, %progress, "skipped, balance {}", format_sol!(balance));
                    stats.record_skip();
                }
                Ok(CollectOutcome::NothingAfterFee { balance }) => {
                    info!(wallet = %wallet.address, %progress, "skipped, {} does not cover the fee", format_sol!(balance));
                    stats.record_skip();
                }
                Ok(CollectOutcome::IsDestination) => {
                    info!(wallet = %wallet.address, %progress, "skipped, wallet is the destination");
                    stats.record_skip();
                }
                Err(err) => {
                    error!(wallet = %wallet.address, %progress, "{err}");
                    stats.record_skip();
                }
            }

            utils::pace(self.delay_ms, i, wallets.len()).await;
        }

        Ok(Some(stats))
    }

    /// Sends `balance - fee_reserve` so the wallet ends at zero once the fee is paid.
    pub async fn collect_one(&self, wallet: &WalletRecord, destination: &Pubkey) -> Result<CollectOutcome> {
        if wallet.address == *destination {
            return Ok(CollectOutcome::IsDestination);
        }

        let balance = self.chain.get_balance(&wallet.address).await?;

        if balance < self.min_balance {
            return Ok(CollectOutcome::BelowMinimum { balance });
        }

        let amount = match balance.checked_sub(self.fee_reserve) {
            Some(amount) if amount > 0 => amount,
            _ => return Ok(CollectOutcome::NothingAfterFee { balance }),
        };

        let ix = system_instruction::transfer(&wallet.address, destination, amount);
        let signature = self.chain.submit(&[ix], &wallet.keypair).await?;

        Ok(CollectOutcome::Sent { signature, amount })
    }
}

impl Closer {
    pub async fn collect(&self, chain: &impl ChainClient, prompt: &mut dyn Prompt) -> Result<()> {
        let destination = wallet::load_fund_wallet(&self.settings.fund_file)?.pubkey();
        println!("destination (fund wallet): {destination}");

        let wallets = self.load_wallets();
        info!("loaded {} wallets", wallets.len());

        let collector = Collector::new(chain, &self.settings);

        if let Some(stats) = collector.collect_all(&wallets, &destination, prompt).await? {
            println!("{stats}");
            println!("destination:       {destination}");
        }

        Ok(())
    }
}
