use std::io::{self, BufRead, Write};

use solana_sdk::native_token::sol_to_lamports;

use crate::error::{CloserError, Result};

/// Line-oriented user input. `ask` yields `None` once input is exhausted.
pub trait Prompt: Send {
    fn ask(&mut self, question: &str) -> Result<Option<String>>;

    fn confirm(&mut self, question: &str) -> Result<bool> {
        Ok(self.ask(question)?.as_deref().is_some_and(is_yes))
    }
}

/// Reads answers from stdin.
pub struct Console;

impl Prompt for Console {
    fn ask(&mut self, question: &str) -> Result<Option<String>> {
        let mut stdout = io::stdout().lock();
        stdout.write_all(question.as_bytes())?;
        stdout.flush()?;

        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line)? == 0 {
            return Ok(None);
        }

        Ok(Some(line.trim().to_string()))
    }
}

/// Answers every confirmation with yes; used for `--yes`.
pub struct AssumeYes;

impl Prompt for AssumeYes {
    fn ask(&mut self, _question: &str) -> Result<Option<String>> {
        Ok(None)
    }

    fn confirm(&mut self, _question: &str) -> Result<bool> {
        Ok(true)
    }
}

pub fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

pub fn parse_amount(input: &str) -> Result<f64> {
    let amount = input
        .trim()
        .parse::<f64>()
        .map_err(|_| CloserError::validation(format!("invalid amount: {:?}", input.trim())))?;

    validate_amount(amount)
}

pub fn validate_amount(amount: f64) -> Result<f64> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(CloserError::validation(format!("amount must be positive, got {amount}")));
    }

    Ok(amount)
}

/// A positive amount that still rounds down to zero lamports would only burn fees.
pub fn amount_to_lamports(amount: f64) -> Result<u64> {
    let lamports = sol_to_lamports(validate_amount(amount)?);
    if lamports == 0 {
        return Err(CloserError::validation(format!("amount {amount} SOL is less than one lamport")));
    }

    Ok(lamports)
}

/// Asks for a SOL amount and returns it in lamports.
pub fn ask_amount(prompt: &mut dyn Prompt, question: &str) -> Result<u64> {
    match prompt.ask(question)? {
        Some(answer) => amount_to_lamports(parse_amount(&answer)?),
        None => Err(CloserError::validation("no amount entered")),
    }
}
