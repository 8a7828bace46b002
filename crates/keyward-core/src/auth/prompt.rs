use std::io::{self, BufRead, Write};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PromptError {
    #[error("Failed to read input: {0}")]
    Io(#[from] io::Error),

    #[error("Input required for '{0}' but prompting is disabled (non-interactive mode)")]
    NonInteractive(String),

    #[error("Input closed while waiting for '{0}'")]
    Closed(String),
}

/// Source of user input for missing credentials.
pub trait Prompter {
    /// Read a visible line of input.
    fn prompt(&mut self, text: &str) -> Result<String, PromptError>;

    /// Read a masked line of input (passwords).
    fn ask(&mut self, text: &str) -> Result<String, PromptError>;

    /// Show an informational message to the user.
    fn notice(&mut self, text: &str);

    /// Whether a human is on the other end.
    fn is_interactive(&self) -> bool {
        true
    }
}

/// Prompts on the controlling terminal; passwords are read without echo.
#[derive(Debug, Default)]
pub struct TerminalPrompter;

impl TerminalPrompter {
    pub fn new() -> Self {
        Self
    }
}

impl Prompter for TerminalPrompter {
    fn prompt(&mut self, text: &str) -> Result<String, PromptError> {
        let mut stderr = io::stderr();
        write!(stderr, "{}", text)?;
        stderr.flush()?;

        let mut input = String::new();
        let read = io::stdin().lock().read_line(&mut input)?;
        if read == 0 {
            return Err(PromptError::Closed(text.trim_end_matches([':', ' ']).to_string()));
        }
        Ok(input.trim().to_string())
    }

    fn ask(&mut self, text: &str) -> Result<String, PromptError> {
        Ok(rpassword::prompt_password(text)?)
    }

    fn notice(&mut self, text: &str) {
        eprintln!("{}", text);
    }
}

/// Fails on any request for input; for scripts and CI.
#[derive(Debug, Default)]
pub struct NonInteractivePrompter;

impl NonInteractivePrompter {
    pub fn new() -> Self {
        Self
    }
}

impl Prompter for NonInteractivePrompter {
    fn prompt(&mut self, text: &str) -> Result<String, PromptError> {
        Err(PromptError::NonInteractive(field_name(text)))
    }

    fn ask(&mut self, text: &str) -> Result<String, PromptError> {
        Err(PromptError::NonInteractive(field_name(text)))
    }

    fn notice(&mut self, text: &str) {
        tracing::info!("{}", text);
    }

    fn is_interactive(&self) -> bool {
        false
    }
}

/// `"Username [bob]: "` -> `"Username"`
fn field_name(text: &str) -> String {
    text.split(['[', ':'])
        .next()
        .unwrap_or(text)
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_name() {
        assert_eq!(field_name("Username: "), "Username");
        assert_eq!(field_name("Username [bob]: "), "Username");
        assert_eq!(field_name("Yubikey OTP"), "Yubikey OTP");
    }

    #[test]
    fn test_non_interactive_fails_fast() {
        let mut prompter = NonInteractivePrompter::new();
        assert!(!prompter.is_interactive());

        match prompter.ask("Password: ") {
            Err(PromptError::NonInteractive(field)) => assert_eq!(field, "Password"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(prompter.prompt("2FA code: ").is_err());
    }
}
