//! `kiln status`: reports whether `kiln make` would do any work.
//!
//! Runs the orchestrator as a dry run, which never writes outputs or caches.

use crate::pipeline::{load_project, open_orchestrator, resolve_project_root, select_scope};
use crate::{BuildArgs, GlobalArgs, ReportFormat};

/// Runs the status check. Exit code 0 means up-to-date, 1 means out of date.
pub fn run(args: &BuildArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let project_dir = resolve_project_root(global)?;
    let project = load_project(&project_dir)?;
    let name = project.name().to_string();

    let scope = select_scope(&project, args)?;
    let mut orchestrator = open_orchestrator(project);
    let up_to_date = orchestrator.is_up_to_date(&*scope)?;

    match args.format {
        ReportFormat::Text => {
            if !global.quiet {
                let state = if up_to_date { "up-to-date" } else { "out of date" };
                eprintln!("{name} is {state}");
            }
        }
        ReportFormat::Json => {
            let summary = serde_json::json!({
                "project": name,
                "up_to_date": up_to_date,
            });
            println!("{summary}");
        }
    }

    Ok(if up_to_date { 0 } else { 1 })
}
