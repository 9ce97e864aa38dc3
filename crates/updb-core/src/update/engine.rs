//! Batch execution engine.
//!
//! Runs an [`ExecutionPlan`] one unit invocation per [`BatchEngine::step`],
//! records every outcome, propagates aborts to dependents, and persists
//! schema versions as units succeed.

use super::error::{UnitFailure, UpdateError};
use super::host::UpdateServices;
use super::resolver::{ExecutionPlan, PlannedUnit};
use super::unit::{Sandbox, StepReport, UnitId, UnitKind};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, error, info, warn};

/// Engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// No plan submitted.
    Idle,
    /// Executing a plan.
    Running,
    /// Every unit was attempted and none failed.
    Finished,
    /// Every unit was attempted and at least one failed.
    Aborted,
}

impl EngineState {
    /// Check if the state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EngineState::Finished | EngineState::Aborted)
    }
}

/// Outcome of one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UnitOutcome {
    /// The unit completed.
    Success,
    /// The unit failed, or was skipped because a dependency failed.
    Aborted {
        /// The aborted dependency, for skipped units.
        propagated_from: Option<UnitId>,
    },
}

impl UnitOutcome {
    /// Check if this is an abort of either kind.
    pub fn is_aborted(&self) -> bool {
        matches!(self, UnitOutcome::Aborted { .. })
    }

    /// Check if this abort was propagated from a dependency.
    pub fn is_propagated(&self) -> bool {
        matches!(
            self,
            UnitOutcome::Aborted {
                propagated_from: Some(_)
            }
        )
    }
}

/// Recorded result of one unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitResult {
    /// Success or abort.
    pub outcome: UnitOutcome,
    /// Outcome text; always set for aborts.
    pub message: Option<String>,
    /// Last reported progress.
    pub finished_fraction: f64,
}

/// What a single engine step did.
#[derive(Debug, Clone, PartialEq)]
pub enum StepEvent {
    /// A unit was skipped because a dependency aborted.
    Skipped {
        /// The skipped unit.
        unit: UnitId,
        /// The aborted dependency.
        cause: UnitId,
    },
    /// A unit reported partial progress and will be invoked again.
    Progress {
        /// The unit.
        unit: UnitId,
        /// Fraction done, 0.0 to 1.0.
        finished: f64,
        /// Progress message.
        message: Option<String>,
    },
    /// A unit completed.
    Completed {
        /// The unit.
        unit: UnitId,
        /// Outcome message.
        message: Option<String>,
    },
    /// A unit failed.
    Aborted {
        /// The unit.
        unit: UnitId,
        /// Failure message.
        message: String,
    },
    /// Every unit has been attempted.
    Finished(EngineState),
}

/// Mutable state of one run. Owned by the engine and never handed out.
#[derive(Debug, Default)]
struct RunState {
    results: BTreeMap<UnitId, UnitResult>,
    aborted: HashSet<UnitId>,
    /// Installed versions captured at submission.
    watermarks: BTreeMap<String, u32>,
    /// Installed versions as advanced during the run.
    versions: BTreeMap<String, u32>,
    sandbox: Sandbox,
    failed: bool,
}

impl RunState {
    fn record(&mut self, id: &UnitId, result: UnitResult) {
        if result.outcome.is_aborted() {
            self.aborted.insert(id.clone());
        }
        self.results.insert(id.clone(), result);
    }
}

/// Sequential, resumable executor for an execution plan.
pub struct BatchEngine {
    services: UpdateServices,
    state: EngineState,
    plan: ExecutionPlan,
    cursor: usize,
    run: RunState,
    phase: Option<UnitKind>,
    executed_in_phase: bool,
}

impl BatchEngine {
    /// Create an idle engine.
    pub fn new(services: UpdateServices) -> Self {
        Self {
            services,
            state: EngineState::Idle,
            plan: ExecutionPlan::default(),
            cursor: 0,
            run: RunState::default(),
            phase: None,
            executed_in_phase: false,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// The submitted plan.
    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    /// Submit a plan and start running it.
    ///
    /// Captures each touched module's installed version as its watermark.
    pub fn submit(&mut self, plan: ExecutionPlan) -> Result<(), UpdateError> {
        if self.state != EngineState::Idle {
            return Err(UpdateError::InvalidState(format!(
                "cannot submit a plan while {:?}",
                self.state
            )));
        }

        let mut watermarks = BTreeMap::new();
        for unit in plan.units() {
            if let UnitId::Schema(id) = &unit.id {
                if !watermarks.contains_key(&id.module) {
                    let installed = self.services.versions.get(&id.module)?;
                    watermarks.insert(id.module.clone(), installed);
                }
            }
        }

        info!(units = plan.len(), "update batch started");
        self.run = RunState {
            versions: watermarks.clone(),
            watermarks,
            ..RunState::default()
        };
        self.plan = plan;
        self.cursor = 0;
        self.phase = None;
        self.executed_in_phase = false;
        self.state = EngineState::Running;
        Ok(())
    }

    /// Perform one unit invocation or one skip.
    ///
    /// Once every unit has been attempted the engine becomes terminal and
    /// further calls keep returning [`StepEvent::Finished`].
    pub fn step(&mut self) -> Result<StepEvent, UpdateError> {
        match self.state {
            EngineState::Idle => {
                return Err(UpdateError::InvalidState(
                    "no plan has been submitted".to_string(),
                ))
            }
            EngineState::Finished | EngineState::Aborted => {
                return Ok(StepEvent::Finished(self.state))
            }
            EngineState::Running => {}
        }

        let Some(unit) = self.plan.units().get(self.cursor).cloned() else {
            return Ok(StepEvent::Finished(self.finish()));
        };

        self.enter_phase(unit.id.kind());

        if let Some(cause) = self.aborted_cause(&unit) {
            warn!(unit = %unit.id, cause = %cause, "update skipped, dependency aborted");
            self.run.record(
                &unit.id,
                UnitResult {
                    outcome: UnitOutcome::Aborted {
                        propagated_from: Some(cause.clone()),
                    },
                    message: Some(format!("skipped because {cause} was aborted")),
                    finished_fraction: 0.0,
                },
            );
            self.cursor += 1;
            return Ok(StepEvent::Skipped {
                unit: unit.id,
                cause,
            });
        }

        self.executed_in_phase = true;
        let report = self
            .invoke(&unit.id)
            .and_then(validate_progress);

        match report {
            Ok(report) if report.is_finished() => self.complete(unit.id, report),
            Ok(report) => {
                debug!(unit = %unit.id, finished = report.finished, "update in progress");
                Ok(StepEvent::Progress {
                    unit: unit.id,
                    finished: report.finished,
                    message: report.message,
                })
            }
            Err(failure) => Ok(self.fail(unit.id, failure)),
        }
    }

    /// Step until every unit has been attempted.
    pub fn run_to_completion(&mut self) -> Result<EngineState, UpdateError> {
        loop {
            if let StepEvent::Finished(state) = self.step()? {
                return Ok(state);
            }
        }
    }

    /// Installed versions captured when the plan was submitted.
    pub fn watermarks(&self) -> &BTreeMap<String, u32> {
        &self.run.watermarks
    }

    /// Result recorded for a unit so far.
    pub fn result(&self, id: &UnitId) -> Option<&UnitResult> {
        self.run.results.get(id)
    }

    /// Consume the engine and produce the run summary.
    pub fn into_summary(self) -> RunSummary {
        let units: Vec<UnitReport> = self
            .plan
            .units()
            .iter()
            .filter_map(|planned| {
                self.run.results.get(&planned.id).map(|result| UnitReport {
                    id: planned.id.clone(),
                    kind: planned.id.kind(),
                    outcome: result.outcome.clone(),
                    message: result.message.clone(),
                })
            })
            .collect();

        let outcome = if self.plan.is_empty() {
            RunOutcome::NothingToDo
        } else if !self.state.is_terminal() {
            RunOutcome::Interrupted
        } else if units.iter().any(|u| u.outcome.is_aborted()) {
            RunOutcome::CompletedWithAborts
        } else {
            RunOutcome::Completed
        };

        RunSummary {
            outcome,
            state: self.state,
            units,
            versions: self.run.versions,
        }
    }

    fn aborted_cause(&self, unit: &PlannedUnit) -> Option<UnitId> {
        if self.run.aborted.contains(&unit.id) {
            return Some(unit.id.clone());
        }
        unit.dependencies
            .iter()
            .find(|dep| self.run.aborted.contains(*dep))
            .cloned()
    }

    /// Refresh host state when moving to a later phase after executing work.
    fn enter_phase(&mut self, kind: UnitKind) {
        if self.phase == Some(kind) {
            return;
        }
        if self.phase.is_some() && self.executed_in_phase {
            info!(phase = %kind, "refreshing caches before next phase");
            if let Err(e) = self.services.host.flush_all_caches() {
                warn!(error = %e, "cache flush failed");
            }
            if let Err(e) = self.services.host.rebuild_service_container() {
                warn!(error = %e, "service container rebuild failed");
            }
        }
        self.phase = Some(kind);
        self.executed_in_phase = false;
    }

    fn invoke(&mut self, id: &UnitId) -> Result<StepReport, UnitFailure> {
        let services = &self.services;
        let sandbox = &mut self.run.sandbox;

        let outcome = catch_unwind(AssertUnwindSafe(|| match id {
            UnitId::Schema(schema_id) => match services.catalog.definition(schema_id) {
                Some(definition) => definition.body().run(sandbox),
                None => Err(UnitFailure::new(format!(
                    "no update body registered for {schema_id}"
                ))),
            },
            UnitId::EntityDefinitions => services
                .entity_schema
                .apply_updates()
                .map(|()| StepReport::done())
                .map_err(|e| UnitFailure::new(e.to_string())),
            UnitId::Post(post_id) => services.post_updates.invoke(post_id, sandbox),
        }));

        match outcome {
            Ok(result) => result,
            Err(payload) => Err(UnitFailure::new(panic_message(payload.as_ref()))),
        }
    }

    fn complete(&mut self, id: UnitId, report: StepReport) -> Result<StepEvent, UpdateError> {
        match &id {
            UnitId::Schema(schema_id) => {
                let current = self
                    .run
                    .versions
                    .get(&schema_id.module)
                    .copied()
                    .unwrap_or(0);
                if schema_id.number > current {
                    self.services
                        .versions
                        .set(&schema_id.module, schema_id.number)?;
                    self.run
                        .versions
                        .insert(schema_id.module.clone(), schema_id.number);
                    info!(
                        module = %schema_id.module,
                        number = schema_id.number,
                        "schema version updated"
                    );
                }
            }
            UnitId::Post(post_id) => self.services.post_updates.mark_executed(post_id)?,
            UnitId::EntityDefinitions => {}
        }

        info!(unit = %id, "update completed");
        self.run.sandbox = Sandbox::new();
        self.run.record(
            &id,
            UnitResult {
                outcome: UnitOutcome::Success,
                message: report.message.clone(),
                finished_fraction: 1.0,
            },
        );
        self.cursor += 1;
        Ok(StepEvent::Completed {
            unit: id,
            message: report.message,
        })
    }

    fn fail(&mut self, id: UnitId, failure: UnitFailure) -> StepEvent {
        error!(unit = %id, error = %failure, "update failed");
        self.run.sandbox = Sandbox::new();
        self.run.failed = true;
        self.run.record(
            &id,
            UnitResult {
                outcome: UnitOutcome::Aborted {
                    propagated_from: None,
                },
                message: Some(failure.message.clone()),
                finished_fraction: 0.0,
            },
        );
        self.cursor += 1;
        StepEvent::Aborted {
            unit: id,
            message: failure.message,
        }
    }

    fn finish(&mut self) -> EngineState {
        self.state = if self.run.failed {
            EngineState::Aborted
        } else {
            EngineState::Finished
        };
        info!(
            state = ?self.state,
            attempted = self.run.results.len(),
            aborted = self.run.aborted.len(),
            "update batch finished"
        );
        self.state
    }
}

/// Clamp progress into [0, 1]; non-finite progress is a failure.
fn validate_progress(mut report: StepReport) -> Result<StepReport, UnitFailure> {
    if !report.finished.is_finite() {
        return Err(UnitFailure::new(format!(
            "update reported invalid progress {}",
            report.finished
        )));
    }
    report.finished = report.finished.clamp(0.0, 1.0);
    Ok(report)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("update panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("update panicked: {message}")
    } else {
        "update panicked".to_string()
    }
}

/// Per-unit line of a run summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitReport {
    /// The unit.
    pub id: UnitId,
    /// Unit kind.
    pub kind: UnitKind,
    /// Outcome.
    pub outcome: UnitOutcome,
    /// Outcome message.
    pub message: Option<String>,
}

/// Overall result of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Nothing was pending.
    NothingToDo,
    /// Every unit succeeded.
    Completed,
    /// At least one unit failed or was skipped.
    CompletedWithAborts,
    /// The host stopped stepping before every unit was attempted.
    Interrupted,
}

impl RunOutcome {
    /// Process exit status for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::NothingToDo | RunOutcome::Completed => 0,
            RunOutcome::CompletedWithAborts | RunOutcome::Interrupted => 1,
        }
    }
}

/// Final report of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Overall outcome.
    pub outcome: RunOutcome,
    /// Engine state when the summary was taken.
    pub state: EngineState,
    /// Every attempted unit in plan order.
    pub units: Vec<UnitReport>,
    /// Schema versions of the modules the run touched.
    pub versions: BTreeMap<String, u32>,
}

impl RunSummary {
    /// Summary of a run that had nothing to do.
    pub fn nothing_to_do() -> Self {
        Self {
            outcome: RunOutcome::NothingToDo,
            state: EngineState::Idle,
            units: Vec::new(),
            versions: BTreeMap::new(),
        }
    }

    /// True iff the engine finished and no unit aborted.
    pub fn success(&self) -> bool {
        match self.outcome {
            RunOutcome::NothingToDo => true,
            RunOutcome::Completed => self.state == EngineState::Finished,
            RunOutcome::CompletedWithAborts | RunOutcome::Interrupted => false,
        }
    }

    /// Process exit status.
    pub fn exit_code(&self) -> i32 {
        self.outcome.exit_code()
    }

    /// Result of a unit, if it was attempted.
    pub fn result(&self, id: &UnitId) -> Option<&UnitReport> {
        self.units.iter().find(|u| &u.id == id)
    }

    /// Number of units whose body actually ran to success.
    pub fn executed_count(&self) -> usize {
        self.units
            .iter()
            .filter(|u| u.outcome == UnitOutcome::Success)
            .count()
    }

    /// Number of units whose body was invoked, whatever the outcome.
    pub fn invoked_count(&self) -> usize {
        self.units
            .iter()
            .filter(|u| !u.outcome.is_propagated())
            .count()
    }

    /// Units that aborted, directly or by propagation.
    pub fn aborted(&self) -> impl Iterator<Item = &UnitReport> {
        self.units.iter().filter(|u| u.outcome.is_aborted())
    }
}
