//! One-way notifications to the analyzer/error-reporting collaborator.

use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// A single kernel library's stated reason for rejecting an operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelRejection {
    pub kernel_library: String,
    pub reason: String,
}

/// Aggregated record of a total resolution failure for one operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionDiagnostic {
    pub op_type: String,
    pub op_name: String,
    pub rejections: Vec<KernelRejection>,
}

impl fmt::Display for ResolutionDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "no kernel library accepts op '{}' (type {})",
            self.op_name, self.op_type
        )?;
        for rejection in &self.rejections {
            write!(f, "; {}: {}", rejection.kernel_library, rejection.reason)?;
        }
        Ok(())
    }
}

/// Everything the core reports outward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Diagnostic {
    /// Per-node resolution exhausted every candidate.
    Resolution(ResolutionDiagnostic),
    /// Composite resolution hit the nesting depth bound.
    CompositeDepth { node: String, depth: usize },
}

/// Receiver for diagnostics. Reports are one-way: nothing a sink does can
/// change a resolution outcome.
pub trait DiagnosticSink: Send + Sync {
    fn report(&self, diagnostic: Diagnostic);
}

/// Sink that drops every report.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn report(&self, _diagnostic: Diagnostic) {}
}

/// Sink that retains every report, for tests and tooling.
#[derive(Debug, Default)]
pub struct RecordingSink {
    reports: Mutex<Vec<Diagnostic>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<Diagnostic> {
        self.reports.lock().expect("recording sink poisoned").clone()
    }

    pub fn take(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.reports.lock().expect("recording sink poisoned"))
    }
}

impl DiagnosticSink for RecordingSink {
    fn report(&self, diagnostic: Diagnostic) {
        self.reports
            .lock()
            .expect("recording sink poisoned")
            .push(diagnostic);
    }
}
