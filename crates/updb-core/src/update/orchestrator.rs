//! The update orchestrator.
//!
//! [`Updater`] ties the pieces together: requirement checks, then planning,
//! then the batch engine, with maintenance mode and cache handling around
//! execution. Fatal errors stop before anything is executed or persisted.

use super::config::UpdateOptions;
use super::engine::{BatchEngine, RunSummary};
use super::error::UpdateError;
use super::host::UpdateServices;
use super::requirements::{RequirementCheck, RequirementReport, Severity};
use super::resolver::{DependencyResolver, ExecutionPlan, PlanOptions};
use super::status::{PendingItem, StatusReporter};
use tracing::{info, warn};

/// Runs pending updates against a set of services.
pub struct Updater {
    services: UpdateServices,
    options: UpdateOptions,
    checks: Vec<Box<dyn RequirementCheck>>,
}

impl Updater {
    /// Create an updater with default options and no requirement checks.
    pub fn new(services: UpdateServices) -> Self {
        Self {
            services,
            options: UpdateOptions::default(),
            checks: Vec::new(),
        }
    }

    /// Set run options.
    pub fn with_options(mut self, options: UpdateOptions) -> Self {
        self.options = options;
        self
    }

    /// Add a pre-flight requirement check.
    pub fn with_requirement(mut self, check: impl RequirementCheck + 'static) -> Self {
        self.checks.push(Box::new(check));
        self
    }

    /// Run options.
    pub fn options(&self) -> &UpdateOptions {
        &self.options
    }

    /// Services the updater drives.
    pub fn services(&self) -> &UpdateServices {
        &self.services
    }

    /// Pending work under the current options.
    pub fn status(&self) -> Result<Vec<PendingItem>, UpdateError> {
        StatusReporter::new(&self.services).status(&self.options.status_options())
    }

    /// Evaluate every requirement check.
    ///
    /// Fails with [`UpdateError::Requirement`] if any check reports an error.
    pub fn check_requirements(&self) -> Result<RequirementReport, UpdateError> {
        let requirements = self
            .checks
            .iter()
            .flat_map(|check| check.check(&self.services))
            .collect();
        let report = RequirementReport { requirements };

        for requirement in report.with_severity(Severity::Warning) {
            warn!(
                title = %requirement.title,
                description = %requirement.description,
                "requirement warning"
            );
        }
        report.into_result()
    }

    /// Build the execution plan for the current options.
    pub fn plan(&self) -> Result<ExecutionPlan, UpdateError> {
        let versions = self
            .services
            .catalog
            .installed_versions(self.services.versions.as_ref())?;

        let post_updates = if self.options.post_updates {
            self.services.post_updates.pending_update_functions()?
        } else {
            Vec::new()
        };
        let options = PlanOptions {
            entity_updates: self.options.entity_updates && self.services.entity_schema.needs_updates(),
            post_updates,
        };

        DependencyResolver::new(&self.services.catalog).resolve_with(&versions, &options)
    }

    /// Check requirements, plan, and execute every pending unit.
    pub fn run(&self) -> Result<RunSummary, UpdateError> {
        self.check_requirements()?;
        self.run_pending()
    }

    /// Plan and execute every pending unit without evaluating requirement
    /// checks. Callers that already ran [`Updater::check_requirements`] use
    /// this so no check runs twice.
    pub fn run_pending(&self) -> Result<RunSummary, UpdateError> {
        let plan = self.plan()?;
        self.execute(plan)
    }

    /// Apply outstanding entity definition changes only.
    pub fn run_entity_updates(&self) -> Result<RunSummary, UpdateError> {
        self.check_requirements()?;
        if !self.services.entity_schema.needs_updates() {
            info!("no entity definition changes pending");
            return Ok(RunSummary::nothing_to_do());
        }
        self.execute(ExecutionPlan::entity_definitions_only())
    }

    /// Execute a plan inside maintenance mode.
    pub fn execute(&self, plan: ExecutionPlan) -> Result<RunSummary, UpdateError> {
        if plan.is_empty() {
            info!("no pending updates");
            return Ok(RunSummary::nothing_to_do());
        }

        let host = &self.services.host;
        let enable_maintenance = self.options.maintenance_mode && !host.maintenance_mode();
        if enable_maintenance {
            host.set_maintenance_mode(true)?;
            info!("maintenance mode enabled");
        }

        let mut engine = BatchEngine::new(self.services.clone());
        let result = engine
            .submit(plan)
            .and_then(|()| engine.run_to_completion());

        if enable_maintenance {
            match host.set_maintenance_mode(false) {
                Ok(()) => info!("maintenance mode disabled"),
                Err(e) => warn!(error = %e, "failed to disable maintenance mode"),
            }
        }
        result?;

        let summary = engine.into_summary();
        if self.options.cache_clear && summary.invoked_count() > 0 {
            if let Err(e) = host.flush_all_caches() {
                warn!(error = %e, "cache flush failed");
            }
            if let Err(e) = host.rebuild_service_container() {
                warn!(error = %e, "service container rebuild failed");
            }
        }

        info!(
            outcome = ?summary.outcome,
            succeeded = summary.executed_count(),
            aborted = summary.aborted().count(),
            "update run finished"
        );
        Ok(summary)
    }
}
