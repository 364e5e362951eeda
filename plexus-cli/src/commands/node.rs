//! `plexus node`: serve a register store over the node socket.

use anyhow::{Context, Result};
use clap::Args;

use plexus_core::assign::parse_environment;
use plexus_node::{CoercionPolicy, Node};

/// Arguments for `plexus node`.
#[derive(Args, Debug)]
pub struct NodeArgs {
    /// Reject writes whose value kind differs from the stored kind instead of
    /// converting them.
    #[arg(long)]
    pub strict: bool,
}

impl NodeArgs {
    pub fn run(self) -> Result<()> {
        plexus_node::init_tracing();
        let home = dirs::home_dir().context("could not determine home directory")?;

        // Variables that are not valid unicode cannot carry assignments.
        let vars = std::env::vars_os()
            .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)));
        let overrides = parse_environment(vars).context("invalid register assignment in environment")?;

        let policy = if self.strict {
            CoercionPolicy::Strict
        } else {
            CoercionPolicy::Implicit
        };
        let node = Node::bootstrap(&home, overrides, |builder| builder.policy(policy))
            .context("failed to bootstrap node")?;
        tracing::info!(
            node = %node.name(),
            socket = %node.socket().display(),
            strict = self.strict,
            "starting node"
        );
        node.run_blocking().context("node exited with an error")
    }
}
