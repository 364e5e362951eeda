//! `plexus launch`: run a process group in the foreground.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use plexus_orchestrator::{GroupReport, GroupSpec, GroupState, ProcessGroup, ProcessState};

/// Arguments for `plexus launch`.
#[derive(Args, Debug)]
pub struct LaunchArgs {
    /// Group specification (YAML).
    pub group: PathBuf,

    /// Print the final group report as JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

impl LaunchArgs {
    pub fn run(self) -> Result<()> {
        plexus_node::init_tracing();

        let spec = GroupSpec::load(&self.group)
            .with_context(|| format!("failed to load group '{}'", self.group.display()))?;
        let group = ProcessGroup::load(&spec).context("invalid process group")?;

        // Process output owns stdout; the summary goes to stderr.
        let report = plexus_orchestrator::run_blocking(group).context("group controller failed")?;
        if self.json {
            eprintln!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize report")?
            );
        } else {
            print_summary(&report);
        }

        if report.state == GroupState::Failed {
            bail!("process group failed");
        }
        Ok(())
    }
}

#[derive(Tabled)]
struct ProcessRow {
    #[tabled(rename = "process")]
    name: String,
    #[tabled(rename = "required")]
    required: String,
    #[tabled(rename = "state")]
    state: String,
    #[tabled(rename = "pid")]
    pid: String,
    #[tabled(rename = "exit")]
    exit: String,
    #[tabled(rename = "error")]
    error: String,
}

fn print_summary(report: &GroupReport) {
    let rows: Vec<ProcessRow> = report
        .processes
        .iter()
        .map(|p| ProcessRow {
            name: p.name.clone(),
            required: if p.required { "yes" } else { "no" }.to_string(),
            state: colored_state(p.state),
            pid: p.pid.map(|pid| pid.to_string()).unwrap_or_else(|| "-".to_string()),
            exit: p
                .exit_code
                .map(|code| code.to_string())
                .unwrap_or_else(|| "-".to_string()),
            error: p.error.clone().unwrap_or_default(),
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    eprintln!("{table}");

    let state = match report.state {
        GroupState::Failed => "failed".red().bold(),
        GroupState::Terminated => "terminated".green(),
        other => format!("{other:?}").to_lowercase().yellow(),
    };
    eprintln!(
        "group {state}: {} processes, {} log lines",
        report.processes.len(),
        report.log_lines
    );
}

fn colored_state(state: ProcessState) -> String {
    let label = format!("{state:?}").to_lowercase();
    match state {
        ProcessState::Crashed => label.red().to_string(),
        ProcessState::Stopped => label.green().to_string(),
        ProcessState::Pending => label.dimmed().to_string(),
        _ => label.yellow().to_string(),
    }
}
