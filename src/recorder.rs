//! Per-pass diagnostic recorder.
//!
//! Diagnostics accumulate in one recorder per classification pass, framed by
//! pushed context names so every message carries a breadcrumb of its
//! star/table/column context. Ordinary rejection is not an error; errors count
//! against a configured budget and only blowing the budget aborts the pass.

/// Raised when a pass records more errors than its configured budget allows.
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("too many errors recorded: {count} (budget {budget})")]
    BudgetExceeded { count: usize, budget: usize },
}

pub type RecorderResult<T> = Result<T, RecorderError>;

/// Accumulates diagnostics with push/pop context framing.
#[derive(Debug)]
pub struct MsgRecorder {
    contexts: Vec<String>,
    errors: Vec<String>,
    warnings: Vec<String>,
    budget: usize,
}

impl MsgRecorder {
    pub fn new(budget: usize) -> Self {
        MsgRecorder {
            contexts: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            budget,
        }
    }

    /// Push a context name; every message recorded until the matching pop is
    /// prefixed with it.
    pub fn push_context(&mut self, name: impl Into<String>) {
        self.contexts.push(name.into());
    }

    pub fn pop_context(&mut self) {
        self.contexts.pop();
    }

    fn breadcrumb(&self) -> String {
        self.contexts.join(":")
    }

    fn framed(&self, msg: &str) -> String {
        if self.contexts.is_empty() {
            msg.to_string()
        } else {
            format!("{}: {}", self.breadcrumb(), msg)
        }
    }

    /// Record an error. Fails once the accumulated count exceeds the budget.
    pub fn error(&mut self, msg: impl AsRef<str>) -> RecorderResult<()> {
        let framed = self.framed(msg.as_ref());
        tracing::error!(target: "aggmatch", "{}", framed);
        self.errors.push(framed);
        if self.errors.len() > self.budget {
            return Err(RecorderError::BudgetExceeded {
                count: self.errors.len(),
                budget: self.budget,
            });
        }
        Ok(())
    }

    /// Record a non-fatal warning.
    pub fn warn(&mut self, msg: impl AsRef<str>) {
        let framed = self.framed(msg.as_ref());
        tracing::warn!(target: "aggmatch", "{}", framed);
        self.warnings.push(framed);
    }

    /// Log informational progress without recording it.
    pub fn info(&self, msg: impl AsRef<str>) {
        tracing::info!(target: "aggmatch", "{}", self.framed(msg.as_ref()));
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}
