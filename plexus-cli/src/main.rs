//! plexus: register nodes and process groups from the command line.
//!
//! # Usage
//!
//! ```text
//! plexus launch <group.yaml> [--json]
//! plexus env <group.yaml> [--process <name>]
//! plexus node [--strict]
//! plexus register list [--node <name> | --socket <path>] [--json]
//! plexus register get <name> [--node <name> | --socket <path>] [--json]
//! plexus register set <name> <value> [--node <name> | --socket <path>] [--json]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{env::EnvArgs, launch::LaunchArgs, node::NodeArgs, register::RegisterCommand};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "plexus",
    version,
    about = "Typed register nodes and supervised process groups",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Launch a process group and supervise it until it ends or is interrupted.
    Launch(LaunchArgs),

    /// Print the environment each process of a group would be started with.
    Env(EnvArgs),

    /// Run a register node configured from the environment.
    Node(NodeArgs),

    /// Inspect or modify the registers of a running node.
    Register {
        #[command(subcommand)]
        command: RegisterCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Launch(args) => args.run(),
        Commands::Env(args) => args.run(),
        Commands::Node(args) => args.run(),
        Commands::Register { command } => commands::register::run(command),
    }
}
