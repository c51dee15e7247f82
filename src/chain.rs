use std::{
    str::FromStr,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use serde_json::{json, Value};
use solana_account_decoder::UiAccountData;
use solana_client::{
    nonblocking::rpc_client::RpcClient,
    rpc_config::RpcSendTransactionConfig,
    rpc_request::{RpcRequest, TokenAccountsFilter},
    rpc_response::{Response, RpcBlockhash, RpcKeyedAccount},
};
use solana_sdk::{
    clock::Slot,
    commitment_config::{CommitmentConfig, CommitmentLevel},
    hash::Hash,
    instruction::Instruction,
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
    transaction::Transaction,
};
use solana_transaction_status::UiTransactionEncoding;
use tracing::{debug, warn};

use crate::{
    constant,
    error::{CloserError, Result},
};

const CONFIRM_TIMEOUT: Duration = Duration::from_secs(90);

/// An SPL token account held by a wallet.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenAccountRef {
    pub address: Pubkey,
    pub mint: Pubkey,
    /// Raw amount in base units.
    pub amount: u64,
    pub ui_amount: f64,
}

impl TokenAccountRef {
    /// Only empty accounts can be closed without burning tokens.
    pub fn is_empty(&self) -> bool {
        self.amount == 0
    }
}

/// The network operations the modes depend on.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn get_balance(&self, address: &Pubkey) -> Result<u64>;

    async fn get_token_accounts(&self, owner: &Pubkey) -> Result<Vec<TokenAccountRef>>;

    /// Signs `instructions` with `signer` as fee payer, sends them as one transaction
    /// and waits for `confirmed` commitment.
    async fn submit(&self, instructions: &[Instruction], signer: &Keypair) -> Result<Signature>;
}

pub struct RpcChain {
    client: Arc<RpcClient>,
    max_retries: usize,
}

impl RpcChain {
    pub fn new(client: Arc<RpcClient>, max_retries: usize) -> Self {
        Self { client, max_retries }
    }

    async fn get_latest_blockhash_and_slot(&self) -> Result<(Slot, Hash)> {
        let response = self
            .client
            .send::<Response<RpcBlockhash>>(RpcRequest::GetLatestBlockhash, json!([{"commitment": "confirmed"}]))
            .await?;

        let blockhash = Hash::from_str(&response.value.blockhash)
            .map_err(|err| CloserError::Network(format!("fail to parse blockhash: {err:#}")))?;

        Ok((response.context.slot, blockhash))
    }

    async fn wait_for_confirmation(&self, signature: &Signature, sent_at_slot: Slot) -> Result<()> {
        let started = Instant::now();
        let mut latest_slot = sent_at_slot;

        while latest_slot <= sent_at_slot + constant::SLOT_EXPIRATION && started.elapsed() < CONFIRM_TIMEOUT {
            tokio::time::sleep(Duration::from_millis(constant::CONFIRM_POLL_INTERVAL_MS)).await;

            let response = match self.client.get_signature_statuses(&[*signature]).await {
                Ok(r) => r,
                Err(err) => {
                    warn!(tx = %signature, "failed to get signature status: {err:#}");
                    continue;
                }
            };

            latest_slot = response.context.slot;

            let Some(Some(status)) = response.value.into_iter().next() else {
                debug!(tx = %signature, slot = latest_slot, "transaction not seen yet");
                continue;
            };

            if !status.satisfies_commitment(CommitmentConfig::confirmed()) {
                continue;
            }

            return match status.err {
                None => Ok(()),
                Some(err) => Err(CloserError::TransactionFailed {
                    signature: signature.to_string(),
                    reason: err.to_string(),
                }),
            };
        }

        Err(CloserError::TransactionFailed {
            signature: signature.to_string(),
            reason: "not confirmed before blockhash expiry".to_string(),
        })
    }
}

#[async_trait]
impl ChainClient for RpcChain {
    async fn get_balance(&self, address: &Pubkey) -> Result<u64> {
        Ok(self.client.get_balance(address).await?)
    }

    async fn get_token_accounts(&self, owner: &Pubkey) -> Result<Vec<TokenAccountRef>> {
        let accounts = self
            .client
            .get_token_accounts_by_owner(owner, TokenAccountsFilter::ProgramId(spl_token::id()))
            .await?;

        Ok(accounts
            .into_iter()
            .filter_map(parse_token_account)
            .collect())
    }

    async fn submit(&self, instructions: &[Instruction], signer: &Keypair) -> Result<Signature> {
        let (slot, blockhash) = self.get_latest_blockhash_and_slot().await?;

        let tx = Transaction::new_signed_with_payer(instructions, Some(&signer.pubkey()), &[signer], blockhash);

        let send_cfg = RpcSendTransactionConfig {
            skip_preflight: false,
            preflight_commitment: Some(CommitmentLevel::Confirmed),
            encoding: Some(UiTransactionEncoding::Base64),
            max_retries: Some(self.max_retries),
            min_context_slot: Some(slot),
        };

        let signature = self.client.send_transaction_with_config(&tx, send_cfg).await?;
        debug!(tx = %signature, slot, "transaction sent");

        self.wait_for_confirmation(&signature, slot).await?;
        Ok(signature)
    }
}

/// Reads a jsonParsed token account; anything that is not a parsed SPL token account is dropped.
pub fn parse_token_account(keyed: RpcKeyedAccount) -> Option<TokenAccountRef> {
    let address = Pubkey::from_str(&keyed.pubkey).ok()?;

    let UiAccountData::Json(parsed) = keyed.account.data else {
        debug!(account = %address, "token account is not json parsed");
        return None;
    };

    let info = parsed.parsed.get("info")?;
    let token_amount = info.get("tokenAmount")?;
    let amount = token_amount.get("amount")?.as_str()?.parse::<u64>().ok()?;
    let ui_amount = token_amount.get("uiAmount").and_then(Value::as_f64).unwrap_or(0.0);
    let mint = info
        .get("mint")
        .and_then(Value::as_str)
        .and_then(|mint| Pubkey::from_str(mint).ok())
        .unwrap_or_default();

    Some(TokenAccountRef {
        address,
        mint,
        amount,
        ui_amount,
    })
}
