use std::time::Duration;

/// Sleeps between items of a sequential run, never after the last one.
pub async fn pace(delay_ms: u64, index: usize, total: usize) {
    if delay_ms > 0 && index + 1 < total {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }
}

pub fn short(value: &str) -> &str {
    value.get(..12).unwrap_or(value)
}

#[macro_export]
macro_rules! format_sol {
    ($lamports: expr) => {
        format_args!("{:.6} SOL", ::solana_sdk::native_token::lamports_to_sol($lamports))
    };
}
