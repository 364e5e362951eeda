//! `plexus env`: dry run of launch-time materialization.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;

use plexus_orchestrator::{GroupSpec, ResolvedProcess};

/// Arguments for `plexus env`.
#[derive(Args, Debug)]
pub struct EnvArgs {
    /// Group specification (YAML).
    pub group: PathBuf,

    /// Only show this process.
    #[arg(long)]
    pub process: Option<String>,
}

impl EnvArgs {
    pub fn run(self) -> Result<()> {
        let spec = GroupSpec::load(&self.group)
            .with_context(|| format!("failed to load group '{}'", self.group.display()))?;
        let mut processes = spec.resolve().context("invalid process group")?;

        if let Some(wanted) = self.process.as_deref() {
            processes.retain(|p| p.name == wanted);
            if processes.is_empty() {
                bail!(
                    "no process named '{wanted}' in '{}'",
                    self.group.display()
                );
            }
        }

        for (i, process) in processes.iter().enumerate() {
            if i > 0 {
                println!();
            }
            print!("{}", render(process));
        }
        Ok(())
    }
}

fn render(process: &ResolvedProcess) -> String {
    let mut out = format!(
        "# {} ({}): {}\n",
        process.name,
        if process.required { "required" } else { "best-effort" },
        process.command.join(" ")
    );
    for (key, value) in process.configuration() {
        out.push_str(&format!("{key}={value}\n"));
    }
    out
}
