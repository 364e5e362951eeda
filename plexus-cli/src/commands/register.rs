//! `plexus register`: remote register access against a running node.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use plexus_core::{assign::infer_literal, Kind, Register, RegisterError, Value};
use plexus_node::{access_register, list_registers, paths::default_socket_path, NodeError};

/// Which node to talk to.
#[derive(Args, Debug, Clone)]
pub struct NodeTarget {
    /// Node name; the socket is looked up under `~/.plexus/run/`.
    #[arg(long, default_value = "node")]
    pub node: String,

    /// Explicit socket path. Takes precedence over `--node`.
    #[arg(long)]
    pub socket: Option<PathBuf>,
}

impl NodeTarget {
    fn socket_path(&self) -> Result<PathBuf> {
        if let Some(socket) = &self.socket {
            return Ok(socket.clone());
        }
        let home = dirs::home_dir().context("could not determine home directory")?;
        Ok(default_socket_path(&home, &self.node))
    }
}

#[derive(Subcommand, Debug)]
pub enum RegisterCommand {
    /// List every register of the node with its current value.
    List {
        #[command(flatten)]
        target: NodeTarget,

        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Read one register.
    Get {
        name: String,

        #[command(flatten)]
        target: NodeTarget,

        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Write one register. The value is a YAML literal: `42`, `[0.1, 0, 0]`,
    /// `hello`, or an explicit kind such as `{natural16: 42}`. A bare number
    /// or boolean written to a string register is stored as its text; quote
    /// it (`"'42'"`) to force a string anywhere.
    Set {
        name: String,
        value: String,

        #[command(flatten)]
        target: NodeTarget,

        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
}

pub fn run(command: RegisterCommand) -> Result<()> {
    match command {
        RegisterCommand::List { target, json } => list(&target, json),
        RegisterCommand::Get { name, target, json } => get(&target, &name, json),
        RegisterCommand::Set {
            name,
            value,
            target,
            json,
        } => set(&target, &name, &value, json),
    }
}

fn list(target: &NodeTarget, json: bool) -> Result<()> {
    let socket = target.socket_path()?;
    let names = list_registers(&socket)
        .with_context(|| format!("failed to list registers at {}", socket.display()))?;

    let mut registers = Vec::with_capacity(names.len());
    for name in &names {
        let register = access_register(&socket, name.as_str(), None)
            .with_context(|| format!("failed to read register '{name}'"))?;
        registers.push(register);
    }

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&registers).context("failed to serialize registers")?
        );
        return Ok(());
    }

    let rows: Vec<RegisterRow> = registers.iter().map(RegisterRow::from).collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

fn get(target: &NodeTarget, name: &str, json: bool) -> Result<()> {
    let socket = target.socket_path()?;
    match access_register(&socket, name, None) {
        Ok(register) => print_register(&register, json),
        Err(err) => Err(rejection(err, name, "read")),
    }
}

fn set(target: &NodeTarget, name: &str, text: &str, json: bool) -> Result<()> {
    let literal: serde_yaml::Value =
        serde_yaml::from_str(text).with_context(|| format!("'{text}' is not a YAML literal"))?;
    let value = infer_literal(name, &literal)?;

    let socket = target.socket_path()?;
    let result = match access_register(&socket, name, Some(value)) {
        // `set some.label 42` means the text "42" when the register holds a string.
        Err(NodeError::Rejected {
            error: RegisterError::IncompatibleKind { .. },
            current: Some(current),
        }) if current.kind() == Kind::String && is_plain_scalar(&literal) => {
            access_register(&socket, name, Some(Value::string(text)))
        }
        other => other,
    };
    match result {
        Ok(register) => print_register(&register, json),
        Err(err) => Err(rejection(err, name, "write")),
    }
}

fn is_plain_scalar(literal: &serde_yaml::Value) -> bool {
    matches!(
        literal,
        serde_yaml::Value::Bool(_) | serde_yaml::Value::Number(_)
    )
}

/// Report a refused access on stderr, with the register's current state when
/// the node sent one back.
fn rejection(err: NodeError, name: &str, action: &str) -> anyhow::Error {
    match err {
        NodeError::Rejected { error, current } => {
            if let Some(current) = current {
                eprintln!("{} {}", "current:".dimmed(), describe(&current));
            }
            anyhow::Error::new(error).context(format!("{action} of register '{name}' rejected"))
        }
        other => anyhow::Error::new(other).context(format!("failed to {action} register '{name}'")),
    }
}

fn print_register(register: &Register, json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(register).context("failed to serialize register")?
        );
    } else {
        println!("{}", describe(register));
    }
    Ok(())
}

fn describe(register: &Register) -> String {
    format!(
        "{} = {} ({})",
        register.name.as_str().bold(),
        register.value,
        flags(register)
    )
}

fn flags(register: &Register) -> String {
    let mut out = vec![if register.mutable { "mutable" } else { "immutable" }];
    if register.persistent {
        out.push("persistent");
    }
    out.join(", ")
}

#[derive(Tabled)]
struct RegisterRow {
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "value")]
    value: String,
    #[tabled(rename = "flags")]
    flags: String,
    #[tabled(rename = "updated")]
    updated: String,
}

impl From<&Register> for RegisterRow {
    fn from(register: &Register) -> Self {
        Self {
            name: register.name.to_string(),
            value: register.value.to_string(),
            flags: flags(register),
            updated: register
                .timestamp
                .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}
