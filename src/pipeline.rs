//! One processing run, and the continuous loop around it.
//!
//! A run checks authentication first; a signed-out mail source fails the whole
//! run before any message is touched. Everything after that is per-message and
//! degrades instead of failing.

use std::time::Duration;

use serde::Serialize;

use crate::capsules::{CapsuleEngine, ProcessOutcome};
use crate::error::{PipelineError, RunError};
use crate::mail::MailSource;

/// Result of a single run, as printed by the CLI.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReport {
    pub success: bool,
    pub processed_emails: usize,
    pub created_capsules: usize,
    pub email_ids: Vec<String>,
    pub capsule_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,
}

impl PipelineReport {
    fn completed(outcome: ProcessOutcome) -> Self {
        Self {
            success: true,
            processed_emails: outcome.email_ids.len(),
            created_capsules: outcome.capsule_ids.len(),
            email_ids: outcome.email_ids,
            capsule_ids: outcome.capsule_ids,
            error: None,
        }
    }

    fn failed(err: &PipelineError) -> Self {
        Self {
            success: false,
            processed_emails: 0,
            created_capsules: 0,
            email_ids: Vec::new(),
            capsule_ids: Vec::new(),
            error: Some(RunError::from(err)),
        }
    }
}

pub struct EmailPipeline<'a> {
    mail: &'a dyn MailSource,
    engine: CapsuleEngine<'a>,
}

impl<'a> EmailPipeline<'a> {
    pub fn new(mail: &'a dyn MailSource, engine: CapsuleEngine<'a>) -> Self {
        Self { mail, engine }
    }

    pub fn engine(&self) -> &CapsuleEngine<'a> {
        &self.engine
    }

    /// Ingest and place up to `max` unread messages.
    pub fn run(&self, max: usize) -> Result<ProcessOutcome, PipelineError> {
        if !self.mail.is_authenticated() {
            return Err(PipelineError::NotAuthenticated);
        }
        self.engine.process_new(self.mail, max)
    }

    /// `run`, folded into a report. Errors land in `report.error`.
    pub fn process_once(&self, max: usize) -> PipelineReport {
        match self.run(max) {
            Ok(outcome) => {
                log::info!(
                    "Processed {} emails into {} capsules",
                    outcome.email_ids.len(),
                    outcome.capsule_ids.len()
                );
                PipelineReport::completed(outcome)
            }
            Err(e) => {
                log::warn!("Pipeline run failed: {}", e);
                PipelineReport::failed(&e)
            }
        }
    }

    /// Run, hand the report over, sleep, repeat. Never returns; the process is
    /// stopped from outside.
    pub fn run_continuous(
        &self,
        interval: Duration,
        max: usize,
        mut on_report: impl FnMut(&PipelineReport),
    ) -> ! {
        log::info!("Starting continuous processing every {:?}", interval);
        loop {
            let report = self.process_once(max);
            on_report(&report);
            std::thread::sleep(interval);
        }
    }
}
