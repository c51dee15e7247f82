use std::{fs, path::Path};

use futures_util::{stream, StreamExt};
use itertools::Itertools;
use solana_sdk::pubkey::Pubkey;
use tracing::{error, info};

use crate::{
    chain::ChainClient,
    constant,
    error::Result,
    format_sol,
    settings::Settings,
    stats::{RunKind, RunStats},
    utils,
    wallet::WalletRecord,
    Closer,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibleWallet {
    pub address: Pubkey,
    pub secret: String,
    pub claimable: u64,
    pub empty_accounts: usize,
}

/// Read-only scan estimating what each wallet could reclaim.
pub struct Checker<'a, C: ChainClient> {
    chain: &'a C,
    min_claimable: u64,
    parallel: usize,
    delay_ms: u64,
}

impl<'a, C: ChainClient> Checker<'a, C> {
    pub fn new(chain: &'a C, settings: &Settings) -> Self {
        Self {
            chain,
            min_claimable: settings.min_claimable(),
            parallel: settings.parallel_wallets.max(1),
            delay_ms: settings.delay_between_wallets_ms,
        }
    }

    /// Empty account count of one wallet.
    pub async fn count_empty(&self, wallet: &WalletRecord) -> Result<usize> {
        Ok(self
            .chain
            .get_token_accounts(&wallet.address)
            .await?
            .iter()
            .filter(|account| account.is_empty())
            .count())
    }

    /// Eligible wallets come back in wallet order whatever the fan-out.
    pub async fn check(&self, wallets: &[WalletRecord]) -> (Vec<EligibleWallet>, RunStats) {
        let total = wallets.len();

        let results = stream::iter(wallets.iter().enumerate())
            .map(|(i, wallet)| async move {
                let result = self.count_empty(wallet).await;
                utils::pace(self.delay_ms, i, total).await;
                result
            })
            .buffered(self.parallel)
            .collect::<Vec<_>>()
            .await;

        let mut stats = RunStats::new(RunKind::Check, total);
        let mut eligible = vec![];

        for (i, (wallet, result)) in wallets.iter().zip(results).enumerate() {
            let progress = format!("{}/{}", i + 1, total);

            let empty_accounts = match result {
                Ok(count) => count,
                Err(err) => {
                    error!(wallet = %wallet.address, %progress, "{err}");
                    stats.record_failure();
                    continue;
                }
            };

            let claimable = empty_accounts as u64 * constant::RENT_EXEMPT_REFUND;
            stats.empty_accounts += empty_accounts;

            if claimable > self.min_claimable {
                info!(
                    wallet = %wallet.address,
                    %progress,
                    "{} claimable ({} empty accounts)",
                    format_sol!(claimable),
                    empty_accounts
                );

                stats.record_success();
                stats.claimable += claimable;
                eligible.push(EligibleWallet {
                    address: wallet.address,
                    secret: wallet.secret.clone(),
                    claimable,
                    empty_accounts,
                });
            } else {
                info!(wallet = %wallet.address, %progress, "nothing worth claiming");
                stats.record_idle();
            }
        }

        (eligible, stats)
    }
}

/// Rewrites both eligible wallet files; line `n` of each describes the same wallet.
pub fn write_eligible(keys_path: &Path, address_path: &Path, eligible: &[EligibleWallet]) -> Result<()> {
    fs::write(keys_path, lines(eligible.iter().map(|w| w.secret.as_str())))?;
    fs::write(address_path, lines(eligible.iter().map(|w| w.address.to_string())))?;
    Ok(())
}

fn lines<I>(mut items: I) -> String
where
    I: Iterator,
    I::Item: std::fmt::Display,
{
    let body = items.join("\n");
    if body.is_empty() {
        body
    } else {
        body + "\n"
    }
}

impl Closer {
    pub async fn check(&self, chain: &impl ChainClient) -> Result<()> {
        let wallets = self.load_wallets();
        info!("loaded {} wallets", wallets.len());

        let (eligible, stats) = Checker::new(chain, &self.settings).check(&wallets).await;

        let keys_path = self.settings.eligible_keys_path();
        let address_path = self.settings.eligible_address_path();
        write_eligible(&keys_path, &address_path, &eligible)?;

        println!("{stats}");

        if eligible.is_empty() {
            println!("no wallets with empty token accounts");
        } else {
            for wallet in &eligible {
                println!(
                    "{}  {} ({} empty accounts)",
                    wallet.address,
                    format_sol!(wallet.claimable),
                    wallet.empty_accounts
                );
            }
            println!("keys:      {}", keys_path.display());
            println!("addresses: {}", address_path.display());
            println!("next: run fund to top up fees, then claim");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use solana_sdk::signature::{Keypair, Signer};

    use super::*;
    use crate::tests::chain_mock::MockChain;

    fn wallet(index: usize) -> WalletRecord {
        let keypair = Keypair::new();
        WalletRecord {
            index,
            address: keypair.pubkey(),
            secret: keypair.to_base58_string(),
            keypair,
            source_line: index + 1,
        }
    }

    fn settings(parallel: usize) -> Settings {
        Settings {
            parallel_wallets: parallel,
            delay_between_wallets_ms: 0,
            ..Settings::default()
        }
    }

    fn scenario() -> (Vec<WalletRecord>, MockChain) {
        let wallets = (0..5).map(wallet).collect::<Vec<_>>();
        let chain = MockChain::new()
            .with_token_accounts(wallets[0].address, 2, 1)
            .with_token_accounts(wallets[1].address, 0, 3)
            .with_token_accounts(wallets[2].address, 5, 0)
            .with_unreachable(wallets[3].address)
            .with_token_accounts(wallets[4].address, 1, 0);
        (wallets, chain)
    }

    #[tokio::test]
    async fn classifies_against_min_claimable() {
        let (wallets, chain) = scenario();

        let (eligible, stats) = Checker::new(&chain, &settings(3)).check(&wallets).await;

        let addresses = eligible.iter().map(|w| w.address).collect::<Vec<_>>();
        assert_eq!(addresses, vec![wallets[0].address, wallets[2].address, wallets[4].address]);
        assert_eq!(eligible[1].claimable, 5 * constant::RENT_EXEMPT_REFUND);
        assert_eq!(eligible[1].secret, wallets[2].secret);

        assert_eq!(stats.processed, 5);
        assert_eq!(stats.successful, 3);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.empty_accounts, 8);
        assert_eq!(stats.claimable, 8 * constant::RENT_EXEMPT_REFUND);
        assert!(chain.submissions().is_empty());
    }

    #[tokio::test]
    async fn threshold_is_strict() {
        let w = wallet(0);
        let chain = MockChain::new().with_token_accounts(w.address, 1, 0);
        let cfg = Settings {
            min_claimable_sol: 0.00203928,
            ..settings(1)
        };

        let (eligible, _) = Checker::new(&chain, &cfg).check(std::slice::from_ref(&w)).await;
        assert!(eligible.is_empty());
    }

    #[tokio::test]
    async fn fan_out_keeps_wallet_order() {
        let (wallets, chain) = scenario();

        let (sequential, _) = Checker::new(&chain, &settings(1)).check(&wallets).await;
        let (parallel, _) = Checker::new(&chain, &settings(4)).check(&wallets).await;

        assert_eq!(sequential, parallel);
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_check_is_paced() {
        let (wallets, chain) = scenario();
        let cfg = Settings {
            delay_between_wallets_ms: 1000,
            ..settings(1)
        };

        let start = tokio::time::Instant::now();
        Checker::new(&chain, &cfg).check(&wallets).await;

        assert_eq!(start.elapsed(), Duration::from_millis(4000));
    }

    #[tokio::test]
    async fn repeated_checks_write_identical_files() {
        let (wallets, chain) = scenario();
        let dir = tempfile::tempdir().unwrap();
        let keys = dir.path().join(constant::ELIGIBLE_KEYS_FILE);
        let addresses = dir.path().join(constant::ELIGIBLE_ADDRESS_FILE);
        let checker = Checker::new(&chain, &settings(2));

        let (eligible, _) = checker.check(&wallets).await;
        write_eligible(&keys, &addresses, &eligible).unwrap();
        let first = (fs::read_to_string(&keys).unwrap(), fs::read_to_string(&addresses).unwrap());

        let (eligible, _) = checker.check(&wallets).await;
        write_eligible(&keys, &addresses, &eligible).unwrap();
        let second = (fs::read_to_string(&keys).unwrap(), fs::read_to_string(&addresses).unwrap());

        assert_eq!(first, second);

        let key_lines = first.0.lines().collect::<Vec<_>>();
        let address_lines = first.1.lines().collect::<Vec<_>>();
        assert_eq!(key_lines.len(), 3);
        assert_eq!(address_lines.len(), 3);
        assert!(first.0.ends_with('\n'));

        for (key, address) in key_lines.iter().zip(address_lines) {
            let wallet = wallets.iter().find(|w| w.secret == *key).unwrap();
            assert_eq!(wallet.address.to_string(), address);
        }
    }

    #[tokio::test]
    async fn empty_result_truncates_previous_files() {
        let dir = tempfile::tempdir().unwrap();
        let keys = dir.path().join("keys.txt");
        let addresses = dir.path().join("addresses.txt");
        fs::write(&keys, "stale\n").unwrap();
        fs::write(&addresses, "stale\n").unwrap();

        write_eligible(&keys, &addresses, &[]).unwrap();

        assert_eq!(fs::read_to_string(&keys).unwrap(), "");
        assert_eq!(fs::read_to_string(&addresses).unwrap(), "");
    }
}
