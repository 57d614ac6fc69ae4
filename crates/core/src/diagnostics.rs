//! Structured warnings collected while building a model
//!
//! Inference steps that give up on a quantity record an entry here and
//! emit the same message through `tracing`, so it reaches both the log and
//! the validation report.

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Rule or step that produced the entry, e.g. `target-level`
    pub rule: String,
    /// Node, link or area identifier the entry is about
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, severity: Severity, rule: &str, id: Option<String>, message: impl Into<String>) {
        let message = message.into();
        let subject = id.as_deref().unwrap_or("-");
        match severity {
            Severity::Info => info!(rule, id = subject, "{message}"),
            Severity::Warning => warn!(rule, id = subject, "{message}"),
            Severity::Error => error!(rule, id = subject, "{message}"),
        }
        self.entries.push(Diagnostic {
            severity,
            rule: rule.to_string(),
            id,
            message,
        });
    }

    pub fn info(&mut self, rule: &str, id: impl ToString, message: impl Into<String>) {
        self.push(Severity::Info, rule, Some(id.to_string()), message);
    }

    pub fn warn(&mut self, rule: &str, id: impl ToString, message: impl Into<String>) {
        self.push(Severity::Warning, rule, Some(id.to_string()), message);
    }

    pub fn error(&mut self, rule: &str, id: impl ToString, message: impl Into<String>) {
        self.push(Severity::Error, rule, Some(id.to_string()), message);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    /// Entries produced by one rule
    pub fn by_rule<'a>(&'a self, rule: &'a str) -> impl Iterator<Item = &'a Diagnostic> {
        self.entries.iter().filter(move |d| d.rule == rule)
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.entries.iter().filter(|d| d.severity == severity).count()
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.entries.extend(other.entries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collects_by_rule() {
        let mut diag = Diagnostics::new();
        diag.warn("target-level", 12, "no downstream structure");
        diag.info("flow-rate", 7, "capacity from inventory");
        assert_eq!(diag.len(), 2);
        assert_eq!(diag.by_rule("target-level").count(), 1);
        assert_eq!(diag.count(Severity::Warning), 1);
        let json = serde_json::to_value(&diag).unwrap();
        assert_eq!(json[0]["severity"], "warning");
        assert_eq!(json[0]["id"], "12");
    }
}
