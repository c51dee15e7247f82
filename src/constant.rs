/// Base fee charged per signature.
pub const FEE_PER_SIGNER: u64 = 5000;

/// Rent-exempt minimum of a 165 byte SPL token account, returned on close.
pub const RENT_EXEMPT_REFUND: u64 = 2_039_280;

/// A wallet needs at least this much to pay for its close transactions.
pub const MIN_FEE_RESERVE: u64 = 1_000_000;

/// Kept back by collect so the sweep transfer can pay its own fee.
pub const COLLECT_FEE_RESERVE: u64 = FEE_PER_SIGNER;

pub const SLOT_EXPIRATION: u64 = 151 + 5;

pub const CONFIRM_POLL_INTERVAL_MS: u64 = 2000;

pub const ELIGIBLE_KEYS_FILE: &str = "eligible_wallets_keys.txt";
pub const ELIGIBLE_ADDRESS_FILE: &str = "eligible_wallets_address.txt";
