use std::{fs, path::Path};

use solana_sdk::{
    pubkey::Pubkey,
    signature::{keypair_from_seed, Keypair},
    signer::Signer,
};
use tracing::warn;

use crate::error::{CloserError, Result};

/// A wallet parsed from the wallets file.
pub struct WalletRecord {
    /// Position among successfully parsed wallets, starting at 0.
    pub index: usize,
    pub address: Pubkey,
    pub keypair: Keypair,
    /// The key exactly as it was written, re-emitted by the check stage.
    pub secret: String,
    /// 1-based line number in the source file.
    pub source_line: usize,
}

impl std::fmt::Debug for WalletRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletRecord")
            .field("index", &self.index)
            .field("address", &self.address)
            .field("source_line", &self.source_line)
            .finish_non_exhaustive()
    }
}

/// Decodes one line of a key file.
///
/// Blank and `#` lines yield `Ok(None)`. Accepts base58 (the format wallets export)
/// and JSON byte arrays (the format `solana-keygen` writes). The public half must
/// match the key derived from the secret half.
pub fn decode_secret_key(line: &str) -> Result<Option<Keypair>> {
    let line = line.trim();

    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let bytes = if line.starts_with('[') {
        serde_json::from_str::<Vec<u8>>(line)
            .map_err(|err| CloserError::config(format!("invalid json key: {err}")))?
    } else {
        bs58::decode(line)
            .into_vec()
            .map_err(|err| CloserError::config(format!("invalid base58 key: {err}")))?
    };

    if bytes.len() != 64 {
        return Err(CloserError::config(format!(
            "secret key must be 64 bytes, got {}",
            bytes.len()
        )));
    }

    let keypair = keypair_from_seed(&bytes[..32])
        .map_err(|err| CloserError::config(format!("invalid secret key: {err}")))?;

    if keypair.pubkey().as_ref() != &bytes[32..] {
        return Err(CloserError::config("public key does not match secret key"));
    }

    Ok(Some(keypair))
}

/// Parses a wallets file body, dropping lines that do not decode.
pub fn parse_wallets(content: &str) -> Vec<WalletRecord> {
    content
        .lines()
        .enumerate()
        .filter_map(|(i, line)| match decode_secret_key(line) {
            Ok(Some(keypair)) => Some((i + 1, line.trim().to_string(), keypair)),
            Ok(None) => None,
            Err(err) => {
                warn!(line = i + 1, "skipping wallet: {err}");
                None
            }
        })
        .enumerate()
        .map(|(index, (source_line, secret, keypair))| WalletRecord {
            index,
            address: keypair.pubkey(),
            keypair,
            secret,
            source_line,
        })
        .collect()
}

pub fn load_wallets(path: &Path) -> Result<Vec<WalletRecord>> {
    if !path.exists() {
        return Err(CloserError::config(format!(
            "{} not found, add one private key per line",
            path.display()
        )));
    }

    Ok(parse_wallets(&fs::read_to_string(path)?))
}

/// Reads the funding wallet from the first non-blank line of `path`.
pub fn load_fund_wallet(path: &Path) -> Result<Keypair> {
    if !path.exists() {
        return Err(CloserError::config(format!(
            "{} not found, add the private key of the main wallet",
            path.display()
        )));
    }

    let content = fs::read_to_string(path)?;
    let line = content.lines().find(|line| !line.trim().is_empty()).unwrap_or_default();

    match decode_secret_key(line) {
        Ok(Some(keypair)) => Ok(keypair),
        Ok(None) => Err(CloserError::config(format!("{} has no private key", path.display()))),
        Err(err) => Err(CloserError::config(format!("{}: {err}", path.display()))),
    }
}

/// Reads a line-delimited address list, ignoring blank lines.
pub fn read_addresses(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Err(CloserError::config(format!(
            "{} not found, run check first",
            path.display()
        )));
    }

    Ok(fs::read_to_string(path)?
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded() -> (Keypair, String) {
        let keypair = Keypair::new();
        let secret = keypair.to_base58_string();
        (keypair, secret)
    }

    #[test]
    fn blank_comment_and_malformed_lines_are_skipped() {
        let (first, first_secret) = encoded();
        let (second, second_secret) = encoded();

        let content = format!(
            "# main wallets\n\n{first_secret}\nnot-a-key\n   \n{}\n{second_secret}\n",
            &second_secret[..20]
        );

        let wallets = parse_wallets(&content);
        assert_eq!(wallets.len(), 2);

        assert_eq!(wallets[0].index, 0);
        assert_eq!(wallets[0].source_line, 3);
        assert_eq!(wallets[0].address, first.pubkey());
        assert_eq!(wallets[0].secret, first_secret);

        assert_eq!(wallets[1].index, 1);
        assert_eq!(wallets[1].source_line, 7);
        assert_eq!(wallets[1].address, second.pubkey());
    }

    #[test]
    fn json_byte_array_is_accepted() {
        let keypair = Keypair::new();
        let line = serde_json::to_string(&keypair.to_bytes().to_vec()).unwrap();

        let decoded = decode_secret_key(&line).unwrap().unwrap();
        assert_eq!(decoded.pubkey(), keypair.pubkey());
    }

    #[test]
    fn mismatched_public_half_is_rejected() {
        let mut bytes = Keypair::new().to_bytes();
        bytes[32..].copy_from_slice(&Keypair::new().pubkey().to_bytes());

        let line = bs58::encode(bytes).into_string();
        assert!(decode_secret_key(&line).is_err());
    }

    #[test]
    fn missing_wallet_file_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_wallets(&dir.path().join("wallets.txt"));
        assert!(matches!(result, Err(CloserError::Configuration(_))));
    }

    #[test]
    fn fund_wallet_uses_first_non_blank_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fund.txt");
        let (keypair, secret) = encoded();
        let (_, other) = encoded();
        fs::write(&path, format!("\n\n{secret}\n{other}\n")).unwrap();

        assert_eq!(load_fund_wallet(&path).unwrap().pubkey(), keypair.pubkey());

        fs::write(&path, "garbage\n").unwrap();
        assert!(matches!(load_fund_wallet(&path), Err(CloserError::Configuration(_))));
    }

    #[test]
    fn addresses_ignore_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("addresses.txt");
        fs::write(&path, "a\n\n  b  \n").unwrap();

        assert_eq!(read_addresses(&path).unwrap(), vec!["a".to_string(), "b".to_string()]);
    }
}
