use anyhow::{anyhow, Result};
use async_trait::async_trait;
use dialoguer::console::Term;
use dialoguer::Confirm;
use notelock_core::capabilities::ConfirmationPrompt;
use tracing::warn;
use zeroize::Zeroizing;

pub const PASSCODE_ENV: &str = "NOTELOCK_PASSCODE";

/// Yes/no prompt on the controlling terminal. `--yes` skips the prompt.
pub struct TerminalConfirmation {
    assume_yes: bool,
}

impl TerminalConfirmation {
    pub fn new(assume_yes: bool) -> Self {
        Self { assume_yes }
    }
}

#[async_trait]
impl ConfirmationPrompt for TerminalConfirmation {
    async fn confirm(
        &self,
        message: &str,
        title: &str,
        confirm_label: &str,
        _cancel_label: Option<&str>,
    ) -> bool {
        if self.assume_yes {
            return true;
        }
        let prompt = format!("{title}\n{message}\n{confirm_label}?");
        let answer = tokio::task::spawn_blocking(move || {
            Confirm::new()
                .with_prompt(prompt)
                .default(false)
                .interact_on(&Term::stderr())
        })
        .await;
        match answer {
            Ok(Ok(answer)) => answer,
            Ok(Err(err)) => {
                warn!(error = %err, "confirmation prompt failed; treating as declined");
                false
            }
            Err(err) => {
                warn!(error = %err, "confirmation prompt task failed");
                false
            }
        }
    }
}

pub fn prompt_passcode_once(prompt: &str) -> Result<Zeroizing<String>> {
    if let Ok(code) = std::env::var(PASSCODE_ENV) {
        if !code.is_empty() {
            return Ok(Zeroizing::new(code));
        }
    }
    let code = rpassword::prompt_password(prompt).map_err(|e| anyhow!("passcode prompt: {e}"))?;
    Ok(Zeroizing::new(code))
}

pub fn prompt_passcode_twice(prompt: &str) -> Result<Zeroizing<String>> {
    if let Ok(code) = std::env::var(PASSCODE_ENV) {
        if !code.is_empty() {
            return Ok(Zeroizing::new(code));
        }
    }
    let first = prompt_passcode_once(prompt)?;
    let second = Zeroizing::new(
        rpassword::prompt_password("Confirm passcode: ")
            .map_err(|e| anyhow!("passcode prompt: {e}"))?,
    );
    if *first != *second {
        return Err(anyhow!("passcodes do not match"));
    }
    Ok(first)
}
