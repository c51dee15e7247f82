use std::{path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::commitment_config::CommitmentConfig;
use tracing::{error, log};

use crate::{
    chain::{ChainClient, RpcChain},
    error::CloserError,
    prompt::{AssumeYes, Console, Prompt},
    settings::Settings,
    wallet::WalletRecord,
};

mod chain;
mod check;
mod claim;
mod collect;
mod constant;
mod error;
mod fund;
mod prompt;
mod settings;
mod stats;
mod utils;
mod wallet;


#[tokio::main(flavor = "multi_thread")]
async fn main() -> eyre::Result<()> {
    Closer::init_pretty_env_logger();
    let cli = Cli::parse();

    let closer = Closer::new(cli.settings()?);
    let chain = closer.chain();

    match &cli.command {
        Some(command) => closer.run(&chain, command).await?,
        None => closer.menu(&chain, &mut Console).await?,
    }

    Ok(())
}

const MENU_CHOICE: &str = "Your choice (1-5): ";

#[derive(Parser, Debug, Clone)]
#[command(about = "Close empty SPL token accounts across many wallets and reclaim their rent")]
pub struct Cli {
    #[arg(long, help = "JSON settings file; missing keys keep their defaults")]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub rpc: Option<String>,

    #[arg(long, help = "File with one private key per line")]
    pub wallets: Option<PathBuf>,

    #[arg(long, help = "File holding the private key of the funding wallet")]
    pub fund: Option<PathBuf>,

    #[arg(long)]
    pub batch_size: Option<usize>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    pub fn settings(&self) -> Result<Settings, CloserError> {
        let mut settings = Settings::load(self.config.as_deref())?;

        if let Some(rpc) = &self.rpc {
            settings.rpc_endpoint = rpc.clone();
        }

        if let Some(wallets) = &self.wallets {
            settings.wallets_file = wallets.clone();
        }

        if let Some(fund) = &self.fund {
            settings.fund_file = fund.clone();
        }

        if let Some(batch_size) = self.batch_size {
            settings.batch_size = batch_size;
        }

        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Count empty token accounts and write the eligible wallet files
    Check,
    /// Send SOL for fees to every eligible wallet
    Fund(crate::fund::FundArgs),
    /// Close empty token accounts and reclaim their rent
    Claim,
    /// Sweep every wallet's SOL into the fund wallet
    Collect(crate::collect::CollectArgs),
}

pub struct Closer {
    pub settings: Settings,
}

impl Closer {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    pub fn init_pretty_env_logger() {
        env_logger::Builder::new()
            .filter_level(log::LevelFilter::Info)
            .parse_default_env()
            .init();
    }

    pub fn get_client_confirmed(rpc: &str) -> Arc<RpcClient> {
        Arc::new(RpcClient::new_with_commitment(
            rpc.to_string(),
            CommitmentConfig::confirmed(),
        ))
    }

    pub fn chain(&self) -> RpcChain {
        RpcChain::new(
            Self::get_client_confirmed(&self.settings.rpc_endpoint),
            self.settings.confirm_retries,
        )
    }

    /// A run without its wallet list cannot do anything useful, so a missing file ends the process.
    pub fn load_wallets(&self) -> Vec<WalletRecord> {
        match wallet::load_wallets(&self.settings.wallets_file) {
            Ok(wallets) => wallets,
            Err(err) => {
                error!("{err}");
                std::process::exit(1);
            }
        }
    }

    pub async fn run(&self, chain: &impl ChainClient, command: &Command) -> Result<(), CloserError> {
        match command {
            Command::Check => self.check(chain).await,
            Command::Fund(args) => {
                let mut prompt: Box<dyn Prompt> = if args.yes { Box::new(AssumeYes) } else { Box::new(Console) };
                self.fund(chain, args, prompt.as_mut()).await
            }
            Command::Claim => self.claim(chain).await,
            Command::Collect(args) => {
                let mut prompt: Box<dyn Prompt> = if args.yes { Box::new(AssumeYes) } else { Box::new(Console) };
                self.collect(chain, prompt.as_mut()).await
            }
        }
    }

    /// Loops until the operator exits or input runs out. Mode errors are reported and the menu continues.
    pub async fn menu(&self, chain: &impl ChainClient, prompt: &mut dyn Prompt) -> Result<(), CloserError> {
        loop {
            println!("\n{}", "=".repeat(80));
            println!("SOLANA TOKEN ACCOUNT CLOSER");
            println!("{}", "=".repeat(80));
            println!("1. CHECK   - count reclaimable rent per wallet");
            println!("2. FUND    - send fee SOL to eligible wallets");
            println!("3. CLAIM   - close empty token accounts");
            println!("4. COLLECT - sweep all SOL into the fund wallet");
            println!("5. EXIT\n");

            let Some(choice) = prompt.ask(MENU_CHOICE)? else {
                return Ok(());
            };

            let result = match choice.as_str() {
                "1" => self.check(chain).await,
                "2" => self.fund(chain, &fund::FundArgs { amount: None, yes: false }, prompt).await,
                "3" => self.claim(chain).await,
                "4" => self.collect(chain, prompt).await,
                "5" => {
                    println!("bye");
                    return Ok(());
                }
                other => {
                    println!("invalid choice: {other:?}");
                    continue;
                }
            };

            if let Err(err) = result {
                error!("{err}");
            }
        }
    }
}
