use std::fmt;

use super::Scenario;


/// One lifecycle step of a conformance run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Create,
    Verify,
    Update,
    Delete,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::Verify => "verify",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        f.write_str(name)
    }
}


/// Outcome of a single step, carrying the human-readable line that was
/// printed for it.
#[derive(Debug)]
pub struct StepReport {
    pub step: Step,
    pub passed: bool,
    pub line: String,
}

impl StepReport {
    pub fn pass(step: Step, line: impl Into<String>) -> Self {
        Self { step, passed: true, line: line.into() }
    }

    pub fn fail(step: Step, line: impl Into<String>) -> Self {
        Self { step, passed: false, line: line.into() }
    }
}


/// Result of a whole conformance run. The per-step lines are the primary
/// output; this exists so callers can derive a proper exit code and tests
/// can assert on outcomes instead of parsing stdout.
#[derive(Debug)]
pub struct RunReport {
    pub scenario: Scenario,
    pub steps: Vec<StepReport>,
    /// Set when resource creation failed and all later steps were skipped.
    pub aborted: bool,
}

impl RunReport {
    pub(super) fn new(scenario: Scenario) -> Self {
        Self { scenario, steps: Vec::new(), aborted: false }
    }

    /// Whether every executed step passed and none were skipped.
    pub fn passed(&self) -> bool {
        !self.aborted && self.steps.iter().all(|s| s.passed)
    }

    /// One closing line summarizing the run.
    pub fn summary(&self) -> String {
        if self.aborted {
            return format!(
                "scenario '{}': aborted, resource creation failed",
                self.scenario,
            );
        }

        let failed = self.steps.iter().filter(|s| !s.passed).count();
        if failed == 0 {
            format!(
                "scenario '{}': all {} steps passed",
                self.scenario,
                self.steps.len(),
            )
        } else {
            format!(
                "scenario '{}': {failed} of {} steps failed",
                self.scenario,
                self.steps.len(),
            )
        }
    }
}
