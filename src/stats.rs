use std::fmt;

use crate::format_sol;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    Check,
    Claim,
    Fund,
    Collect,
}

/// Counters of a single run. Owned by the run that creates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStats {
    pub kind: RunKind,
    /// Wallets or destinations the run was started with.
    pub total: usize,
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Empty token accounts seen by check.
    pub empty_accounts: usize,
    pub accounts_closed: usize,
    /// Estimated lamports claimable by eligible wallets (check).
    pub claimable: u64,
    /// Estimated lamports returned by closed accounts (claim).
    pub recovered: u64,
    pub sent: u64,
    pub collected: u64,
    pub fees: u64,
}

impl RunStats {
    pub fn new(kind: RunKind, total: usize) -> Self {
        Self {
            kind,
            total,
            processed: 0,
            successful: 0,
            failed: 0,
            skipped: 0,
            empty_accounts: 0,
            accounts_closed: 0,
            claimable: 0,
            recovered: 0,
            sent: 0,
            collected: 0,
            fees: 0,
        }
    }

    pub fn record_success(&mut self) {
        self.processed += 1;
        self.successful += 1;
    }

    pub fn record_failure(&mut self) {
        self.processed += 1;
        self.failed += 1;
    }

    pub fn record_skip(&mut self) {
        self.processed += 1;
        self.skipped += 1;
    }

    /// Processed without an outcome worth counting, e.g. nothing to close.
    pub fn record_idle(&mut self) {
        self.processed += 1;
    }
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", "=".repeat(80))?;

        match self.kind {
            RunKind::Check => {
                writeln!(f, "CHECK RESULTS")?;
                writeln!(f, "eligible wallets:  {}/{}", self.successful, self.total)?;
                writeln!(f, "failed:            {}", self.failed)?;
                writeln!(f, "empty accounts:    {}", self.empty_accounts)?;
                write!(f, "claimable:         {}", format_sol!(self.claimable))?;
            }
            RunKind::Claim => {
                writeln!(f, "CLAIM FINISHED")?;
                writeln!(f, "processed:         {}/{}", self.processed, self.total)?;
                writeln!(f, "successful:        {}", self.successful)?;
                writeln!(f, "failed:            {}", self.failed)?;
                writeln!(f, "accounts closed:   {}", self.accounts_closed)?;
                write!(f, "recovered:         {}", format_sol!(self.recovered))?;
            }
            RunKind::Fund => {
                writeln!(f, "FUND FINISHED")?;
                writeln!(f, "successful:        {}/{}", self.successful, self.total)?;
                writeln!(f, "failed:            {}", self.failed)?;
                write!(f, "sent:              {}", format_sol!(self.sent))?;
            }
            RunKind::Collect => {
                writeln!(f, "COLLECT FINISHED")?;
                writeln!(f, "processed:         {}/{}", self.processed, self.total)?;
                writeln!(f, "transfers sent:    {}", self.successful)?;
                writeln!(f, "skipped:           {}", self.skipped)?;
                writeln!(f, "collected:         {}", format_sol!(self.collected))?;
                write!(f, "fees:              ~{}", format_sol!(self.fees))?;
            }
        }

        Ok(())
    }
}
