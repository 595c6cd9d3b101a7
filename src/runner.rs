// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Convergence loop.
//!
//! The runner drives a [`Plan`] from start to finish. Each step is attempted
//! exactly once, in order. A failing step is logged and recorded, but never
//! stops the steps after it, so one missing package or unreachable remote
//! cannot keep the rest of the machine from converging. The operator can
//! simply run Strapper again once the listed failures are dealt with, since
//! every step re-checks its state before acting.

use crate::{
    action::ActionRegistry,
    logger::{FailureLog, Logger},
    plan::Plan,
    step::{ExecutionResult, Outcome, Phase},
};

use std::fmt::{Display, Formatter, Result as FmtResult};
use tracing::instrument;

/// Executes plans over an action registry.
pub struct Runner<'r> {
    registry: &'r ActionRegistry,
    logger: Logger,
    results: Vec<ExecutionResult>,
}

impl<'r> Runner<'r> {
    /// Construct new runner.
    ///
    /// The runner takes ownership of the logger for the duration of the run,
    /// and with it the failure log.
    pub fn new(registry: &'r ActionRegistry, logger: Logger) -> Self {
        Self {
            registry,
            logger,
            results: Vec::new(),
        }
    }

    /// Execute every step of plan, and report the outcome.
    #[instrument(skip(self, plan), level = "debug")]
    pub fn run(mut self, plan: Plan) -> RunReport {
        self.logger.info(format!("converging {} steps", plan.len()));

        let mut phase: Option<Phase> = None;
        for step in plan {
            if phase != Some(step.phase()) {
                phase = Some(step.phase());
                self.logger.info(format!("==> {}", step.phase()));
            }

            let result = step.execute(self.registry);
            match &result.outcome {
                Outcome::AlreadySatisfied => {
                    self.logger.info(format!("{}: already satisfied", result.step))
                }
                Outcome::Success(detail) => self.logger.info(format!("{}: {detail}", result.step)),
                Outcome::Failed(reason) => self.logger.fail(result.step.as_str(), reason.as_str()),
            }
            self.results.push(result);
        }

        let summary = render_summary(&self.results, self.logger.failures());
        self.logger.info(summary);

        RunReport {
            results: self.results,
            failures: self.logger.finish(),
        }
    }

    /// Check every step of plan without acting.
    #[instrument(skip(self, plan), level = "debug")]
    pub fn survey(mut self, plan: &Plan) -> Survey {
        let mut entries = Vec::with_capacity(plan.len());
        for step in plan.steps() {
            let satisfied = step.check(self.registry);
            let state = if satisfied { "satisfied" } else { "diverged" };
            self.logger.info(format!("[{}] {}: {state}", step.phase(), step.name()));
            entries.push(SurveyEntry {
                step: step.name().to_string(),
                phase: step.phase(),
                satisfied,
            });
        }

        let survey = Survey { entries };
        self.logger.info(survey.to_string());
        self.logger.finish();

        survey
    }
}

/// Results of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    results: Vec<ExecutionResult>,
    failures: FailureLog,
}

impl RunReport {
    /// Results of every step in execution order.
    pub fn results(&self) -> &[ExecutionResult] {
        self.results.as_slice()
    }

    /// Failures in execution order.
    pub fn failures(&self) -> &FailureLog {
        &self.failures
    }

    /// Check if no step failed.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

impl Display for RunReport {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(render_summary(&self.results, &self.failures).as_str())
    }
}

/// Check-only view of a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Survey {
    pub entries: Vec<SurveyEntry>,
}

impl Survey {
    /// Steps that would act on the next run.
    pub fn diverged(&self) -> impl Iterator<Item = &SurveyEntry> {
        self.entries.iter().filter(|entry| !entry.satisfied)
    }
}

impl Display for Survey {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let diverged = self.diverged().count();
        if diverged == 0 {
            write!(fmt, "all {} steps satisfied", self.entries.len())
        } else {
            write!(
                fmt,
                "{diverged} of {} steps would act on next run",
                self.entries.len()
            )
        }
    }
}

/// Checked state of one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurveyEntry {
    pub step: String,
    pub phase: Phase,
    pub satisfied: bool,
}

fn render_summary(results: &[ExecutionResult], failures: &FailureLog) -> String {
    if failures.is_empty() {
        let changed = results
            .iter()
            .filter(|result| matches!(result.outcome, Outcome::Success(_)))
            .count();
        return format!(
            "all {} steps satisfied ({changed} changed, {} already satisfied)",
            results.len(),
            results.len() - changed
        );
    }

    let mut summary = format!(
        "{} of {} steps failed, listed below:",
        failures.len(),
        results.len()
    );
    for failure in failures.iter() {
        summary.push_str(format!("\n  - {failure}").as_str());
    }

    summary
}
