//! Derivation trace
//!
//! Solvers that search a design space (pole selection, foundation sizing)
//! record each check they make, so the adopted result can be audited line
//! by line.
//!
//! ```rust
//! use aea_core::trace::DerivationTrace;
//!
//! let mut trace = DerivationTrace::new();
//! trace.record("SPH", "He = max(0.1·L + 0.6, 1.5) = 2.40 m");
//! assert_eq!(trace.lines().count(), 1);
//! ```

use serde::{Deserialize, Serialize};

/// One recorded derivation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    /// Stage or sub-step that produced the line
    pub context: String,
    pub text: String,
}

/// Ordered list of derivation steps.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DerivationTrace {
    steps: Vec<TraceStep>,
}

impl DerivationTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, context: impl Into<String>, text: impl Into<String>) {
        self.steps.push(TraceStep {
            context: context.into(),
            text: text.into(),
        });
    }

    pub fn steps(&self) -> &[TraceStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// `[context] text` lines
    pub fn lines(&self) -> impl Iterator<Item = String> + '_ {
        self.steps.iter().map(|s| format!("[{}] {}", s.context, s.text))
    }

    /// Steps recorded under `context`
    pub fn in_context<'a>(&'a self, context: &'a str) -> impl Iterator<Item = &'a TraceStep> + 'a {
        self.steps.iter().filter(move |s| s.context == context)
    }

    pub fn merge(&mut self, other: DerivationTrace) {
        self.steps.extend(other.steps);
    }

    pub fn to_text(&self) -> String {
        self.lines().collect::<Vec<_>>().join("\n")
    }
}
