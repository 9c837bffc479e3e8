//! Outcome record of a stop sequence.

use std::fmt;

use super::channel::ChannelKind;

/// One independent release performed during stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    Cancel,
    CloseChannel(ChannelKind),
    JoinReceiver(ChannelKind),
    TerminateServer,
    JoinLauncher,
    RemoveForward,
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancel => write!(f, "cancel workers"),
            Self::CloseChannel(kind) => write!(f, "close {kind} channel"),
            Self::JoinReceiver(kind) => write!(f, "join {kind} receiver"),
            Self::TerminateServer => write!(f, "terminate capture server"),
            Self::JoinLauncher => write!(f, "join launcher"),
            Self::RemoveForward => write!(f, "remove forward"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Done,
    /// The resource was never acquired.
    Skipped,
    /// An error that is expected during shutdown (peer already gone).
    Ignored(String),
    Failed(String),
    /// The bounded wait elapsed; teardown moved on.
    TimedOut,
}

/// Ordered outcomes of every teardown step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    steps: Vec<(TeardownStep, StepOutcome)>,
}

impl TeardownReport {
    pub(crate) fn record(&mut self, step: TeardownStep, outcome: StepOutcome) {
        self.steps.push((step, outcome));
    }

    pub fn steps(&self) -> &[(TeardownStep, StepOutcome)] {
        &self.steps
    }

    pub fn outcome(&self, step: TeardownStep) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|(s, _)| *s == step)
            .map(|(_, outcome)| outcome)
    }

    /// `true` when the session was already idle and nothing ran.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// No step failed or timed out.
    pub fn is_clean(&self) -> bool {
        self.steps
            .iter()
            .all(|(_, o)| !matches!(o, StepOutcome::Failed(_) | StepOutcome::TimedOut))
    }
}

impl fmt::Display for TeardownReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (step, outcome) in &self.steps {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            match outcome {
                StepOutcome::Done => write!(f, "{step}: ok")?,
                StepOutcome::Skipped => write!(f, "{step}: skipped")?,
                StepOutcome::Ignored(e) => write!(f, "{step}: ignored ({e})")?,
                StepOutcome::Failed(e) => write!(f, "{step}: FAILED ({e})")?,
                StepOutcome::TimedOut => write!(f, "{step}: TIMED OUT")?,
            }
        }
        Ok(())
    }
}
