use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SwitchyardError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Load error: {0}")]
    Load(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Simulation error: {0}")]
    Simulation(String),

    #[error("Command error: {0}")]
    Command(String),

    /// Broken scheduler or arena bookkeeping. Never recoverable.
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SwitchyardError>;

/// A problem with one line of a network file.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub file: String,
    pub line: usize,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{}): {}", self.file, self.line, self.message)
    }
}

/// Collects load diagnostics and enforces the error budget.
///
/// Every reported diagnostic counts against `max_errors`; once the count goes
/// past it, [`Diagnostics::report`] returns a [`SwitchyardError::Load`] and the
/// load is abandoned.
#[derive(Debug)]
pub struct Diagnostics {
    file: String,
    max_errors: usize,
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new(file: impl Into<String>, max_errors: usize) -> Self {
        Self { file: file.into(), max_errors, entries: Vec::new() }
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn report(&mut self, line: usize, message: impl Into<String>) -> Result<()> {
        let diag = Diagnostic { file: self.file.clone(), line, message: message.into() };
        tracing::warn!("{}", diag);
        self.entries.push(diag);
        if self.entries.len() > self.max_errors {
            return Err(SwitchyardError::Load(format!(
                "too many errors in sim file {} ({})",
                self.file,
                self.entries.len()
            )));
        }
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<Diagnostic> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_renders_file_and_line() {
        let d = Diagnostic { file: "inv.sim".into(), line: 7, message: "bad".into() };
        assert_eq!(d.to_string(), "(inv.sim,7): bad");
    }

    #[test]
    fn budget_exceeded_aborts() {
        let mut diags = Diagnostics::new("x.sim", 2);
        assert!(diags.report(1, "a").is_ok());
        assert!(diags.report(2, "b").is_ok());
        let err = diags.report(3, "c").unwrap_err();
        assert!(matches!(err, SwitchyardError::Load(_)));
        assert_eq!(diags.count(), 3);
    }
}
