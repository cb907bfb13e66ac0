//! Recovery sweep for completions interrupted between their steps.

use serde::Serialize;
use tracing::{debug, info, warn};

use super::Coordinator;
use crate::error::Result;
use crate::storage::completions::{self, IntentStage};
use crate::storage::plans;

/// Actor recorded for transitions made by the sweep.
const SWEEP_ACTOR: &str = "recovery";

/// What a sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Intents old enough to be looked at.
    pub examined: usize,
    /// Completions finished because the hours had been applied.
    pub rolled_forward: usize,
    /// Completions undone because the hours had not been applied.
    pub rolled_back: usize,
    /// Logbook entries written for already completed plans.
    pub logbook_written: usize,
    /// Intents left for a later sweep.
    pub deferred: usize,
}

impl Coordinator {
    /// Finish or undo completions that stopped part-way.
    ///
    /// Only intents untouched for longer than the configured grace period
    /// are considered, so a completion still running elsewhere is left
    /// alone. A pending intent is rolled forward if the registry confirms
    /// its hour increment, rolled back if it denies it, and deferred if it
    /// cannot say. Intents past the hour step get their logbook write
    /// retried.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub fn recover_completions(&self) -> Result<SweepReport> {
        let cutoff = self.now() - self.config.workflow.recovery_grace();
        let stale = completions::stale(self.store().connection(), cutoff)?;
        let mut report = SweepReport {
            examined: stale.len(),
            ..SweepReport::default()
        };

        for intent in stale {
            match intent.stage {
                IntentStage::Pending => match self.registry.hours_applied(&intent.op_key) {
                    Ok(true) => match self.finish_completion(&intent, SWEEP_ACTOR) {
                        Ok(_) => {
                            info!(plan_id = %intent.plan_id, "completion rolled forward");
                            report.rolled_forward += 1;
                        }
                        Err(e) => {
                            warn!(plan_id = %intent.plan_id, error = %e, "roll-forward failed");
                            report.deferred += 1;
                        }
                    },
                    Ok(false) => {
                        completions::delete(self.store().connection(), &intent.plan_id)?;
                        info!(plan_id = %intent.plan_id, "completion rolled back, plan stays in progress");
                        report.rolled_back += 1;
                    }
                    Err(e) => {
                        warn!(plan_id = %intent.plan_id, error = %e, "registry unavailable, completion deferred");
                        report.deferred += 1;
                    }
                },
                IntentStage::HoursApplied | IntentStage::LogbookPending => {
                    let plan = plans::require(self.store().connection(), &intent.plan_id)?;
                    if self.write_logbook(&plan, intent.hours)? {
                        info!(plan_id = %intent.plan_id, "logbook entry recovered");
                        report.logbook_written += 1;
                    } else {
                        report.deferred += 1;
                    }
                }
            }
        }

        debug!(?report, "recovery sweep finished");
        Ok(report)
    }
}
