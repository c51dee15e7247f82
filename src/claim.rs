use solana_sdk::{pubkey::Pubkey, signature::Signature};
use tracing::{debug, error, info, warn};

use crate::{
    chain::{ChainClient, TokenAccountRef},
    constant,
    error::{CloserError, Result},
    format_sol,
    settings::Settings,
    stats::{RunKind, RunStats},
    utils,
    wallet::WalletRecord,
    Closer,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosureStatus {
    /// Balance below the fee reserve; nothing was attempted.
    InsufficientFunds { balance: u64 },
    NothingToClose,
    Attempted,
}

#[derive(Debug)]
pub enum BatchOutcome {
    /// The whole batch landed in one transaction.
    Closed(Signature),
    /// The batch transaction failed and every account was retried alone.
    FellBack {
        batch_error: CloserError,
        closed: Vec<Pubkey>,
        failed: Vec<(Pubkey, CloserError)>,
    },
}

#[derive(Debug)]
pub struct BatchReport {
    pub accounts: Vec<Pubkey>,
    pub outcome: BatchOutcome,
}

impl BatchReport {
    pub fn closed(&self) -> usize {
        match &self.outcome {
            BatchOutcome::Closed(_) => self.accounts.len(),
            BatchOutcome::FellBack { closed, .. } => closed.len(),
        }
    }
}

#[derive(Debug)]
pub struct ClosureResult {
    pub status: ClosureStatus,
    /// Empty accounts selected for closing.
    pub found: usize,
    pub closed: usize,
    /// `closed × RENT_EXEMPT_REFUND`, not the on-chain delta.
    pub estimated_recovered: u64,
    pub batches: Vec<BatchReport>,
}

impl ClosureResult {
    fn without_batches(status: ClosureStatus) -> Self {
        Self {
            status,
            found: 0,
            closed: 0,
            estimated_recovered: 0,
            batches: vec![],
        }
    }
}

enum BatchState {
    BatchAttempt,
    SingleAttempt {
        batch_error: CloserError,
        next: usize,
        closed: Vec<Pubkey>,
        failed: Vec<(Pubkey, CloserError)>,
    },
    Done(BatchOutcome),
}

/// Closes a wallet's empty token accounts in fixed-size batches.
pub struct BatchCloser<'a, C: ChainClient> {
    chain: &'a C,
    batch_size: usize,
    batch_delay_ms: u64,
}

impl<'a, C: ChainClient> BatchCloser<'a, C> {
    pub fn new(chain: &'a C, settings: &Settings) -> Self {
        Self {
            chain,
            batch_size: settings.batch_size.max(1),
            batch_delay_ms: settings.delay_between_batches_ms,
        }
    }

    pub async fn close_empty_accounts(&self, wallet: &WalletRecord) -> Result<ClosureResult> {
        let balance = self.chain.get_balance(&wallet.address).await?;

        if balance < constant::MIN_FEE_RESERVE {
            return Ok(ClosureResult::without_batches(ClosureStatus::InsufficientFunds { balance }));
        }

        let (empty, funded): (Vec<_>, Vec<_>) = self
            .chain
            .get_token_accounts(&wallet.address)
            .await?
            .into_iter()
            .partition(TokenAccountRef::is_empty);

        for account in &funded {
            debug!(
                wallet = %wallet.address,
                account = %account.address,
                mint = %account.mint,
                balance = account.ui_amount,
                "keeping funded token account"
            );
        }

        let empty = empty.into_iter().map(|account| account.address).collect::<Vec<_>>();

        if empty.is_empty() {
            return Ok(ClosureResult::without_batches(ClosureStatus::NothingToClose));
        }

        info!(wallet = %wallet.address, accounts = empty.len(), "closing empty token accounts");

        let batch_count = empty.len().div_ceil(self.batch_size);
        let mut batches = Vec::with_capacity(batch_count);

        for (i, batch) in empty.chunks(self.batch_size).enumerate() {
            let outcome = self.close_batch(wallet, batch).await;

            match &outcome {
                BatchOutcome::Closed(sig) => {
                    info!(wallet = %wallet.address, batch = i + 1, tx = %sig, "batch closed {} accounts", batch.len())
                }
                BatchOutcome::FellBack {
                    batch_error,
                    closed,
                    failed,
                } => warn!(
                    wallet = %wallet.address,
                    batch = i + 1,
                    "batch fell back to single closes ({batch_error}): {} closed, {} failed",
                    closed.len(),
                    failed.len()
                ),
            }

            batches.push(BatchReport {
                accounts: batch.to_vec(),
                outcome,
            });

            utils::pace(self.batch_delay_ms, i, batch_count).await;
        }

        let closed = batches.iter().map(BatchReport::closed).sum::<usize>();

        Ok(ClosureResult {
            status: ClosureStatus::Attempted,
            found: empty.len(),
            closed,
            estimated_recovered: closed as u64 * constant::RENT_EXEMPT_REFUND,
            batches,
        })
    }

    /// Tries the batch as one transaction, then each account on its own.
    /// Every account is submitted at most once in the fallback.
    pub async fn close_batch(&self, wallet: &WalletRecord, batch: &[Pubkey]) -> BatchOutcome {
        let mut state = BatchState::BatchAttempt;

        loop {
            state = match state {
                BatchState::BatchAttempt => match self.submit_close(wallet, batch).await {
                    Ok(sig) => BatchState::Done(BatchOutcome::Closed(sig)),
                    Err(err) => {
                        debug!(wallet = %wallet.address, accounts = batch.len(), "batch failed, closing one by one");
                        BatchState::SingleAttempt {
                            batch_error: err,
                            next: 0,
                            closed: vec![],
                            failed: vec![],
                        }
                    }
                },
                BatchState::SingleAttempt {
                    batch_error,
                    next,
                    mut closed,
                    mut failed,
                } => match batch.get(next) {
                    None => BatchState::Done(BatchOutcome::FellBack {
                        batch_error,
                        closed,
                        failed,
                    }),
                    Some(account) => {
                        match self.submit_close(wallet, std::slice::from_ref(account)).await {
                            Ok(sig) => {
                                info!(wallet = %wallet.address, account = %account, tx = %sig, "account closed");
                                closed.push(*account);
                            }
                            Err(err) => {
                                error!(wallet = %wallet.address, account = %account, "failed to close account: {err}");
                                failed.push((*account, err));
                            }
                        }

                        BatchState::SingleAttempt {
                            batch_error,
                            next: next + 1,
                            closed,
                            failed,
                        }
                    }
                },
                BatchState::Done(outcome) => return outcome,
            };
        }
    }

    async fn submit_close(&self, wallet: &WalletRecord, accounts: &[Pubkey]) -> Result<Signature> {
        let instructions = accounts
            .iter()
            .map(|account| {
                spl_token::instruction::close_account(
                    &spl_token::id(),
                    account,
                    &wallet.address,
                    &wallet.address,
                    &[],
                )
                .map_err(|err| CloserError::validation(format!("failed to build close instruction: {err}")))
            })
            .collect::<Result<Vec<_>>>()?;

        self.chain.submit(&instructions, &wallet.keypair).await
    }
}

/// Runs the closer over every wallet, one at a time, and tallies the results.
pub async fn claim_wallets<C: ChainClient>(chain: &C, settings: &Settings, wallets: &[WalletRecord]) -> RunStats {
    let closer = BatchCloser::new(chain, settings);
    let mut stats = RunStats::new(RunKind::Claim, wallets.len());

    for (i, wallet) in wallets.iter().enumerate() {
        let progress = format!("{}/{}", i + 1, wallets.len());

        match closer.close_empty_accounts(wallet).await {
            Ok(result) => match result.status {
                ClosureStatus::InsufficientFunds { balance } => {
                    warn!(wallet = %wallet.address, %progress, "insufficient SOL for fees ({})", format_sol!(balance));
                    stats.record_failure();
                }
                ClosureStatus::NothingToClose => {
                    info!(wallet = %wallet.address, %progress, "nothing to close");
                    stats.record_idle();
                }
                ClosureStatus::Attempted => {
                    stats.accounts_closed += result.closed;
                    stats.recovered += result.estimated_recovered;

                    if result.closed > 0 {
                        info!(
                            wallet = %wallet.address,
                            %progress,
                            "recovered {} ({}/{})",
                            format_sol!(result.estimated_recovered),
                            result.closed,
                            result.found
                        );
                        stats.record_success();
                    } else {
                        error!(wallet = %wallet.address, %progress, "no account could be closed");
                        stats.record_failure();
                    }
                }
            },
            Err(err) => {
                error!(wallet = %wallet.address, %progress, "{err}");
                stats.record_failure();
            }
        }

        utils::pace(settings.delay_between_wallets_ms, i, wallets.len()).await;
    }

    stats
}

impl Closer {
    pub async fn claim(&self, chain: &impl ChainClient) -> Result<()> {
        println!("every wallet needs more than 0.001 SOL to pay for its close transactions");

        let wallets = self.load_wallets();
        info!("loaded {} wallets", wallets.len());

        let stats = claim_wallets(chain, &self.settings, &wallets).await;

        println!("{stats}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use solana_sdk::signature::{Keypair, Signer};

    use super::*;
    use crate::tests::{chain_mock::MockChain, workspace};

    const FUNDED: u64 = 10_000_000;

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

    fn fast_settings() -> Settings {
        Settings {
            delay_between_wallets_ms: 0,
            delay_between_batches_ms: 0,
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn batches_are_bounded_by_batch_size() {
        for (n, b) in [(1, 3), (3, 3), (7, 3), (10, 4), (5, 1)] {
            let w = wallet(0);
            let chain = MockChain::new().with_balance(w.address, FUNDED).with_token_accounts(w.address, n, 2);
            let settings = Settings { batch_size: b, ..fast_settings() };

            let result = BatchCloser::new(&chain, &settings).close_empty_accounts(&w).await.unwrap();

            let sizes = chain.submissions().iter().map(|s| s.instructions.len()).collect::<Vec<_>>();
            assert_eq!(sizes.len(), n.div_ceil(b), "n={n} b={b}");
            assert!(sizes.iter().all(|size| *size <= b));
            let last = if n % b == 0 { b } else { n % b };
            assert_eq!(*sizes.last().unwrap(), last);

            assert_eq!(result.closed, n);
            assert_eq!(result.estimated_recovered, n as u64 * constant::RENT_EXEMPT_REFUND);
        }
    }

    #[tokio::test]
    async fn funded_accounts_are_never_closed() {
        let w = wallet(0);
        let chain = MockChain::new().with_balance(w.address, FUNDED).with_token_accounts(w.address, 2, 3);
        let empty = chain.empty_accounts_of(&w.address);

        BatchCloser::new(&chain, &fast_settings()).close_empty_accounts(&w).await.unwrap();

        let closed = chain.submissions().iter().flat_map(|s| s.closed_accounts()).collect::<Vec<_>>();
        assert_eq!(closed, empty);
    }

    #[tokio::test]
    async fn low_balance_skips_the_close_path() {
        let w = wallet(0);
        let chain = MockChain::new()
            .with_balance(w.address, constant::MIN_FEE_RESERVE - 1)
            .with_token_accounts(w.address, 4, 0);

        let result = BatchCloser::new(&chain, &fast_settings()).close_empty_accounts(&w).await.unwrap();

        assert_eq!(
            result.status,
            ClosureStatus::InsufficientFunds {
                balance: constant::MIN_FEE_RESERVE - 1
            }
        );
        assert!(chain.submissions().is_empty());
    }

    #[tokio::test]
    async fn failed_batch_retries_each_account_once() {
        let w = wallet(0);
        let chain = MockChain::new().with_balance(w.address, FUNDED).with_token_accounts(w.address, 3, 0);
        let accounts = chain.empty_accounts_of(&w.address);
        let chain = chain.with_poisoned(accounts[1]);

        let result = BatchCloser::new(&chain, &fast_settings()).close_empty_accounts(&w).await.unwrap();

        let submissions = chain.submissions();
        assert_eq!(submissions.len(), 4);
        assert!(!submissions[0].succeeded);
        assert_eq!(submissions[0].closed_accounts(), accounts);

        let singles = submissions[1..].iter().map(|s| s.closed_accounts()).collect::<Vec<_>>();
        assert_eq!(singles, vec![vec![accounts[0]], vec![accounts[1]], vec![accounts[2]]]);

        assert_eq!(result.closed, 2);
        match &result.batches[0].outcome {
            BatchOutcome::FellBack { closed, failed, .. } => {
                assert_eq!(closed, &vec![accounts[0], accounts[2]]);
                assert_eq!(failed.len(), 1);
                assert_eq!(failed[0].0, accounts[1]);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn fallback_counts_are_not_doubled() {
        let w = wallet(0);
        let chain = MockChain::new()
            .with_balance(w.address, FUNDED)
            .with_token_accounts(w.address, 5, 0)
            .with_max_instructions(2);
        let settings = Settings { batch_size: 3, ..fast_settings() };

        let result = BatchCloser::new(&chain, &settings).close_empty_accounts(&w).await.unwrap();

        // batch of 3 fails and falls back to 3 singles, batch of 2 lands
        assert_eq!(chain.submissions().len(), 1 + 3 + 1);
        assert_eq!(result.closed, 5);
        assert_eq!(result.batches.iter().map(BatchReport::closed).collect::<Vec<_>>(), vec![3, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn batches_are_paced_but_not_after_the_last() {
        let w = wallet(0);
        let chain = MockChain::new().with_balance(w.address, FUNDED).with_token_accounts(w.address, 7, 0);
        let settings = Settings {
            delay_between_batches_ms: 2000,
            ..fast_settings()
        };

        let start = tokio::time::Instant::now();
        BatchCloser::new(&chain, &settings).close_empty_accounts(&w).await.unwrap();

        assert_eq!(chain.submissions().len(), 3);
        assert_eq!(start.elapsed(), Duration::from_millis(4000));
    }

    #[tokio::test]
    async fn five_wallet_run_closes_seven_accounts() {
        let wallets = (0..5).map(wallet).collect::<Vec<_>>();
        let mut chain = MockChain::new();
        for w in &wallets {
            chain = chain.with_balance(w.address, FUNDED);
        }
        let chain = chain
            .with_token_accounts(wallets[0].address, 2, 1)
            .with_token_accounts(wallets[1].address, 5, 0)
            .with_token_accounts(wallets[2].address, 0, 2);

        let stats = claim_wallets(&chain, &fast_settings(), &wallets).await;

        let per_wallet = |address: Pubkey| {
            chain
                .submissions()
                .iter()
                .filter(|s| s.signer == address)
                .map(|s| s.instructions.len())
                .collect::<Vec<_>>()
        };

        assert_eq!(per_wallet(wallets[0].address), vec![2]);
        assert_eq!(per_wallet(wallets[1].address), vec![3, 2]);
        assert!(per_wallet(wallets[2].address).is_empty());

        assert_eq!(stats.accounts_closed, 7);
        assert_eq!(stats.recovered, 7 * constant::RENT_EXEMPT_REFUND);
        assert_eq!(stats.processed, 5);
        assert_eq!(stats.successful, 2);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn wallet_errors_do_not_stop_the_run() {
        let wallets = (0..3).map(wallet).collect::<Vec<_>>();
        let chain = MockChain::new()
            .with_balance(wallets[0].address, 0)
            .with_balance(wallets[2].address, FUNDED)
            .with_token_accounts(wallets[2].address, 1, 0)
            .with_unreachable(wallets[1].address);

        let stats = claim_wallets(&chain, &fast_settings(), &wallets).await;

        assert_eq!(stats.processed, 3);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.successful, 1);
        assert_eq!(stats.accounts_closed, 1);
    }

    #[tokio::test]
    async fn wallet_with_every_close_failing_is_a_failure() {
        let w = wallet(0);
        let chain = MockChain::new().with_balance(w.address, FUNDED).with_token_accounts(w.address, 1, 0);
        let account = chain.empty_accounts_of(&w.address)[0];
        let chain = chain.with_poisoned(account);

        let stats = claim_wallets(&chain, &fast_settings(), std::slice::from_ref(&w)).await;

        assert_eq!(stats.failed, 1);
        assert_eq!(stats.accounts_closed, 0);
        assert_eq!(stats.recovered, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn wallets_are_paced_but_not_after_the_last() {
        let wallets = (0..3).map(wallet).collect::<Vec<_>>();
        let mut chain = MockChain::new();
        for w in &wallets {
            chain = chain.with_balance(w.address, FUNDED).with_token_accounts(w.address, 1, 0);
        }
        let settings = Settings {
            delay_between_wallets_ms: 1000,
            delay_between_batches_ms: 2000,
            ..fast_settings()
        };

        let start = tokio::time::Instant::now();
        let stats = claim_wallets(&chain, &settings, &wallets).await;

        // one batch per wallet, so only the wallet delay applies
        assert_eq!(start.elapsed(), Duration::from_millis(2000));
        assert_eq!(stats.accounts_closed, 3);
    }

    #[tokio::test]
    async fn claim_mode_reads_the_wallet_file() {
        let dir = tempfile::tempdir().unwrap();
        let closer = workspace::closer_in(dir.path());
        let keys = [Keypair::new(), Keypair::new()];
        workspace::write_keys(&closer.settings.wallets_file, &[&keys[0], &keys[1]]);

        let chain = MockChain::new()
            .with_balance(keys[0].pubkey(), FUNDED)
            .with_token_accounts(keys[0].pubkey(), 2, 0)
            .with_balance(keys[1].pubkey(), FUNDED)
            .with_token_accounts(keys[1].pubkey(), 1, 1);

        closer.claim(&chain).await.unwrap();

        let closed = chain
            .submissions()
            .iter()
            .map(|s| (s.signer, s.closed_accounts().len()))
            .collect::<Vec<_>>();
        assert_eq!(closed, vec![(keys[0].pubkey(), 2), (keys[1].pubkey(), 1)]);
    }
}
