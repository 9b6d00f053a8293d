use std::io::{self, BufRead, Write};

use anyhow::Context;
use tracing::debug;

/// Caller-provided confirmation for destructive commands. The store never asks;
/// the command layer consults this before invoking a delete or clear.
pub trait Confirm {
    fn confirm(&mut self, prompt: &str) -> anyhow::Result<bool>;
}

/// Answers yes without asking (`--yes` or `confirmation=off`).
#[derive(Debug, Default, Clone, Copy)]
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&mut self, prompt: &str) -> anyhow::Result<bool> {
        debug!(prompt, "confirmation skipped");
        Ok(true)
    }
}

/// Prompts on stderr and reads a `y`/`yes` answer from stdin. End of input
/// counts as no.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&mut self, prompt: &str) -> anyhow::Result<bool> {
        let stdin = io::stdin();
        prompt_line(stdin.lock(), io::stderr().lock(), prompt)
    }
}

fn prompt_line<R: BufRead, W: Write>(
    mut input: R,
    mut output: W,
    prompt: &str,
) -> anyhow::Result<bool> {
    write!(output, "{prompt} (yes/no) ")?;
    output.flush()?;

    let mut answer = String::new();
    input
        .read_line(&mut answer)
        .context("failed to read confirmation answer")?;

    let accepted = matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes");
    debug!(accepted, "confirmation answered");
    Ok(accepted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_only_yes_answers() {
        for (input, expected) in [
            ("y\n", true),
            ("YES\n", true),
            ("n\n", false),
            ("sure\n", false),
            ("", false),
        ] {
            let mut out = Vec::new();
            let got = prompt_line(input.as_bytes(), &mut out, "Delete ALL tasks?").unwrap();
            assert_eq!(got, expected, "input {input:?}");
            assert_eq!(String::from_utf8(out).unwrap(), "Delete ALL tasks? (yes/no) ");
        }
    }
}
