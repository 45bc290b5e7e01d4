//! The human side of interactive procedures such as calibration.
//!
//! Robots never read stdin themselves.  They ask an [`Operator`] to confirm
//! a step or to say when range recording is done, so the same procedure runs
//! from a terminal, a GUI or a scripted test.

use std::collections::VecDeque;

use tracing::info;

use armature_types::RobotError;

pub trait Operator: Send {
    /// Show `message` and block until the operator answers.  An empty
    /// answer means "confirm".
    fn prompt(&mut self, message: &str) -> Result<String, RobotError>;

    /// Show `message` without waiting for an answer.
    fn notify(&mut self, message: &str) {
        info!("{message}");
    }

    /// Polled while a procedure samples hardware; `true` ends the sampling.
    fn should_stop(&mut self) -> bool;

    /// Polled alongside [`should_stop`](Operator::should_stop); `true`
    /// abandons the procedure without keeping what was sampled.
    fn cancelled(&mut self) -> bool {
        false
    }
}

/// Operator that replays canned answers and stops sampling after a fixed
/// number of polls.  Used by tests and headless simulation.
#[derive(Debug, Default)]
pub struct ScriptedOperator {
    answers: VecDeque<String>,
    prompts: Vec<String>,
    stop_after: usize,
    polls: usize,
    cancel_after: Option<usize>,
    cancel_polls: usize,
}

impl ScriptedOperator {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            prompts: Vec::new(),
            stop_after: 1,
            polls: 0,
            cancel_after: None,
            cancel_polls: 0,
        }
    }

    /// Stop sampling on the `polls`-th call to [`Operator::should_stop`].
    pub fn stop_after(mut self, polls: usize) -> Self {
        self.stop_after = polls.max(1);
        self
    }

    /// Cancel the procedure on the `polls`-th call to
    /// [`Operator::cancelled`].
    pub fn cancel_after(mut self, polls: usize) -> Self {
        self.cancel_after = Some(polls.max(1));
        self
    }

    /// Every prompt shown so far.
    pub fn prompts(&self) -> &[String] {
        &self.prompts
    }
}

impl Operator for ScriptedOperator {
    fn prompt(&mut self, message: &str) -> Result<String, RobotError> {
        self.prompts.push(message.to_string());
        Ok(self.answers.pop_front().unwrap_or_default())
    }

    fn should_stop(&mut self) -> bool {
        self.polls += 1;
        if self.polls >= self.stop_after {
            self.polls = 0;
            true
        } else {
            false
        }
    }

    fn cancelled(&mut self) -> bool {
        let Some(limit) = self.cancel_after else {
            return false;
        };
        self.cancel_polls += 1;
        self.cancel_polls >= limit
    }
}
