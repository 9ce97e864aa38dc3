//! Subcommand handlers.
//!
//! Each handler returns the process exit status; fatal errors are returned
//! as [`CliError`] and reported by `main`.

use crate::error::CliError;
use crate::formatter::Formatter;
use crate::prompt;
use updb_core::{RunSummary, Updater};

/// List pending updates. Always exits 0.
pub fn status(updater: &Updater, formatter: &dyn Formatter) -> Result<i32, CliError> {
    let items = updater.status()?;
    println!("{}", formatter.format_status(&items));
    Ok(0)
}

/// Show pending updates, confirm, and run them.
pub fn run(updater: &Updater, formatter: &dyn Formatter, assume_yes: bool) -> Result<i32, CliError> {
    let report = updater.check_requirements()?;
    if let Some(output) = formatter.format_requirements(&report) {
        println!("{output}");
    }

    let items = updater.status()?;
    if items.is_empty() {
        println!("{}", formatter.format_message("No pending updates."));
        return Ok(0);
    }
    println!("{}", formatter.format_status(&items));

    if !assume_yes && !prompt::confirm("Do you wish to run the specified pending updates?")? {
        println!("{}", formatter.format_message("Cancelled."));
        return Ok(0);
    }

    // Requirements were checked above.
    let summary = updater.run_pending()?;
    Ok(report_summary(&summary, formatter))
}

/// Apply pending entity definition changes only.
pub fn entity_updates(
    updater: &Updater,
    formatter: &dyn Formatter,
    assume_yes: bool,
) -> Result<i32, CliError> {
    let entity_schema = &updater.services().entity_schema;
    if !entity_schema.needs_updates() {
        println!("{}", formatter.format_message("No entity schema updates required."));
        return Ok(0);
    }

    let items: Vec<_> = updater
        .status()?
        .into_iter()
        .filter(|item| item.kind == updb_core::UnitKind::EntityDefinitionUpdate)
        .collect();
    println!("{}", formatter.format_status(&items));

    if !assume_yes && !prompt::confirm("Do you wish to run all pending entity schema updates?")? {
        println!("{}", formatter.format_message("Cancelled."));
        return Ok(0);
    }

    let summary = updater.run_entity_updates()?;
    Ok(report_summary(&summary, formatter))
}

fn report_summary(summary: &RunSummary, formatter: &dyn Formatter) -> i32 {
    println!("{}", formatter.format_summary(summary));
    summary.exit_code()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo::DemoApp;
    use crate::formatter::JsonFormatter;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use updb_core::{Requirement, UpdateOptions, UpdateServices};

    #[test]
    fn test_run_then_status_is_clean() {
        let temp_dir = tempfile::tempdir().unwrap();
        let app = DemoApp::open(temp_dir.path()).unwrap();
        let updater = app.updater(UpdateOptions::new());

        assert_eq!(run(&updater, &JsonFormatter, true).unwrap(), 0);
        assert_eq!(status(&updater, &JsonFormatter).unwrap(), 0);
        assert!(updater.status().unwrap().is_empty());
    }

    #[test]
    fn test_run_checks_requirements_once() {
        let temp_dir = tempfile::tempdir().unwrap();
        let app = DemoApp::open(temp_dir.path()).unwrap();
        let evaluated = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&evaluated);
        let updater = app
            .updater(UpdateOptions::new())
            .with_requirement(move |_: &UpdateServices| {
                counter.fetch_add(1, Ordering::SeqCst);
                Vec::<Requirement>::new()
            });

        assert_eq!(run(&updater, &JsonFormatter, true).unwrap(), 0);
        assert_eq!(evaluated.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_entity_updates_applies_definitions() {
        let temp_dir = tempfile::tempdir().unwrap();
        let app = DemoApp::open(temp_dir.path()).unwrap();
        let updater = app.updater(UpdateOptions::new().with_entity_updates(true));

        assert_eq!(entity_updates(&updater, &JsonFormatter, true).unwrap(), 0);
        assert!(!app.services().entity_schema.needs_updates());
        // Schema updates are left pending.
        assert!(!updater.status().unwrap().is_empty());
    }
}
