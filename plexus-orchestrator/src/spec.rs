//! Process group specification: the YAML document, its validation, and the
//! launch-ready form every process is materialized into.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use plexus_core::assign::{encode_hierarchical, infer_literal};
use plexus_core::{RegisterError, RegisterName, Value};
use serde::Deserialize;
use serde_yaml::{Mapping, Value as Yaml};

use crate::error::{io_err, OrchestratorError};

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Scope name used for group-level register errors.
const GROUP_SCOPE: &str = "group";

// ---------------------------------------------------------------------------
// Specification
// ---------------------------------------------------------------------------

/// A declared process group. Register literals are untyped until [`GroupSpec::resolve`].
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSpec {
    pub grace_period: Duration,
    /// Inherited by every process; a process-level entry with the same name wins.
    pub registers: Vec<(String, Yaml)>,
    /// Launch order is declaration order.
    pub processes: Vec<ProcessSpec>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSpec {
    pub name: String,
    pub command: Vec<String>,
    /// A required process failing takes the whole group down.
    pub required: bool,
    pub working_dir: Option<PathBuf>,
    pub environment: Vec<(String, String)>,
    pub registers: Vec<(String, Yaml)>,
}

impl ProcessSpec {
    pub fn new<I, S>(name: impl Into<String>, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            command: command.into_iter().map(Into::into).collect(),
            required: true,
            working_dir: None,
            environment: Vec::new(),
            registers: Vec::new(),
        }
    }

    pub fn best_effort(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn register(mut self, name: impl Into<String>, literal: impl Into<Yaml>) -> Self {
        self.registers.push((name.into(), literal.into()));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.push((key.into(), value.into()));
        self
    }
}

impl GroupSpec {
    pub fn new(processes: Vec<ProcessSpec>) -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
            registers: Vec::new(),
            processes,
        }
    }

    pub fn load(path: &Path) -> Result<Self, OrchestratorError> {
        let text = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        let raw: RawGroup =
            serde_yaml::from_str(&text).map_err(|source| OrchestratorError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        raw.into_spec()
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, OrchestratorError> {
        let raw: RawGroup = serde_yaml::from_str(text)?;
        raw.into_spec()
    }

    /// Validate the group and infer every register literal.
    ///
    /// Has no side effects, so a malformed group is rejected before any
    /// process starts.
    pub fn resolve(&self) -> Result<Vec<ResolvedProcess>, OrchestratorError> {
        if self.processes.is_empty() {
            return Err(OrchestratorError::InvalidSpec(
                "group declares no processes".to_string(),
            ));
        }
        let inherited = resolve_registers(GROUP_SCOPE, &self.registers)?;

        let mut seen = HashSet::new();
        let mut resolved = Vec::with_capacity(self.processes.len());
        for process in &self.processes {
            if process.name.is_empty() || process.name.chars().any(char::is_whitespace) {
                return Err(OrchestratorError::InvalidSpec(format!(
                    "invalid process name '{}'",
                    process.name
                )));
            }
            if !seen.insert(process.name.as_str()) {
                return Err(OrchestratorError::InvalidSpec(format!(
                    "duplicate process name '{}'",
                    process.name
                )));
            }
            if process.command.first().map_or(true, |program| program.is_empty()) {
                return Err(OrchestratorError::InvalidSpec(format!(
                    "process '{}' has an empty command",
                    process.name
                )));
            }

            let mut registers: BTreeMap<RegisterName, Value> = inherited.iter().cloned().collect();
            registers.extend(resolve_registers(&process.name, &process.registers)?);

            resolved.push(ResolvedProcess {
                name: process.name.clone(),
                command: process.command.clone(),
                required: process.required,
                working_dir: process.working_dir.clone(),
                environment: process.environment.clone(),
                registers: registers.into_iter().collect(),
            });
        }
        Ok(resolved)
    }
}

fn resolve_registers(
    scope: &str,
    literals: &[(String, Yaml)],
) -> Result<Vec<(RegisterName, Value)>, OrchestratorError> {
    let assignment = |source: RegisterError| OrchestratorError::Assignment {
        scope: scope.to_string(),
        source,
    };
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(literals.len());
    for (raw, literal) in literals {
        let name = RegisterName::parse(raw).map_err(assignment)?;
        if !seen.insert(name.clone()) {
            return Err(OrchestratorError::InvalidSpec(format!(
                "register '{name}' is assigned twice in '{scope}'"
            )));
        }
        let value = infer_literal(raw, literal).map_err(assignment)?;
        out.push((name, value));
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Resolved processes
// ---------------------------------------------------------------------------

/// A validated process with typed register values, ready to launch.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedProcess {
    pub name: String,
    pub command: Vec<String>,
    pub required: bool,
    pub working_dir: Option<PathBuf>,
    pub environment: Vec<(String, String)>,
    /// Sorted by name.
    pub registers: Vec<(RegisterName, Value)>,
}

impl ResolvedProcess {
    /// Variables added to the inherited environment: the declared
    /// `environment` entries followed by every register in hierarchical-name
    /// form.
    pub fn configuration(&self) -> Vec<(String, String)> {
        let mut vars = self.environment.clone();
        vars.extend(
            self.registers
                .iter()
                .map(|(name, value)| encode_hierarchical(name, value)),
        );
        vars
    }
}

// ---------------------------------------------------------------------------
// YAML document
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawGroup {
    #[serde(default)]
    grace_period_secs: Option<f64>,
    #[serde(default)]
    registers: Mapping,
    #[serde(default)]
    processes: Mapping,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawProcess {
    command: RawCommand,
    #[serde(default = "default_required")]
    required: bool,
    #[serde(default)]
    working_dir: Option<PathBuf>,
    #[serde(default)]
    environment: BTreeMap<String, String>,
    #[serde(default)]
    registers: Mapping,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawCommand {
    Argv(Vec<String>),
    Line(String),
}

fn default_required() -> bool {
    true
}

impl RawGroup {
    fn into_spec(self) -> Result<GroupSpec, OrchestratorError> {
        let grace_period = match self.grace_period_secs {
            None => DEFAULT_GRACE_PERIOD,
            Some(secs) => Duration::try_from_secs_f64(secs).map_err(|_| {
                OrchestratorError::InvalidSpec(format!(
                    "grace_period_secs must be a non-negative number of seconds in range, got {secs}"
                ))
            })?,
        };

        let mut processes = Vec::with_capacity(self.processes.len());
        for (key, body) in self.processes {
            let name = string_key(&key, "process name")?;
            let raw: RawProcess = serde_yaml::from_value(body).map_err(|e| {
                OrchestratorError::InvalidSpec(format!("process '{name}': {e}"))
            })?;
            let command = match raw.command {
                RawCommand::Argv(argv) => argv,
                RawCommand::Line(line) => line.split_whitespace().map(str::to_string).collect(),
            };
            processes.push(ProcessSpec {
                registers: literal_entries(raw.registers)?,
                name,
                command,
                required: raw.required,
                working_dir: raw.working_dir,
                environment: raw.environment.into_iter().collect(),
            });
        }

        Ok(GroupSpec {
            grace_period,
            registers: literal_entries(self.registers)?,
            processes,
        })
    }
}

fn literal_entries(mapping: Mapping) -> Result<Vec<(String, Yaml)>, OrchestratorError> {
    mapping
        .into_iter()
        .map(|(key, literal)| Ok((string_key(&key, "register name")?, literal)))
        .collect()
}

fn string_key(key: &Yaml, what: &str) -> Result<String, OrchestratorError> {
    match key {
        Yaml::String(s) => Ok(s.clone()),
        other => Err(OrchestratorError::InvalidSpec(format!(
            "{what} must be a string, got {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const THERMOSTAT: &str = r#"
grace_period_secs: 2.5
registers:
  plexus.demo.rate: 10
processes:
  thermostat:
    command: [plexus, node]
    environment:
      FOO: bar
    registers:
      uavcan.node.id: 42
      thermostat.pid.gains: [0.1, 0, 0]
      x.y: {natural16: 42}
      plexus.demo.rate: 20
  plant:
    command: sleep  30
    required: false
"#;

    fn name(raw: &str) -> RegisterName {
        RegisterName::parse(raw).unwrap()
    }

    #[test]
    fn parses_document_in_declaration_order() {
        let spec = GroupSpec::from_yaml_str(THERMOSTAT).unwrap();
        assert_eq!(spec.grace_period, Duration::from_millis(2500));
        let names: Vec<&str> = spec.processes.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["thermostat", "plant"]);
        assert_eq!(spec.processes[1].command, vec!["sleep", "30"]);
        assert!(!spec.processes[1].required);
        assert!(spec.processes[0].required);
    }

    #[test]
    fn resolve_infers_and_inherits_registers() {
        let resolved = GroupSpec::from_yaml_str(THERMOSTAT).unwrap().resolve().unwrap();
        let thermostat = &resolved[0];
        assert_eq!(
            thermostat.registers,
            vec![
                (name("plexus.demo.rate"), Value::Natural8(vec![20])),
                (name("thermostat.pid.gains"), Value::Real32(vec![0.1, 0.0, 0.0])),
                (name("uavcan.node.id"), Value::Natural8(vec![42])),
                (name("x.y"), Value::Natural16(vec![42])),
            ]
        );
        assert_eq!(
            resolved[1].registers,
            vec![(name("plexus.demo.rate"), Value::Natural8(vec![10]))]
        );
    }

    #[test]
    fn configuration_encodes_registers_after_environment() {
        let resolved = GroupSpec::from_yaml_str(THERMOSTAT).unwrap().resolve().unwrap();
        let vars = resolved[0].configuration();
        assert_eq!(vars[0], ("FOO".to_string(), "bar".to_string()));
        assert!(vars.contains(&("X__Y__NATURAL16".to_string(), "42".to_string())));
        assert!(vars.contains(&("UAVCAN__NODE__ID__NATURAL8".to_string(), "42".to_string())));
    }

    #[rstest]
    #[case("processes: {}", "no processes")]
    #[case("processes: {a: {command: []}}", "empty command")]
    #[case("processes: {a: {command: ''}}", "empty command")]
    #[case("grace_period_secs: -1\nprocesses: {a: {command: x}}", "non-negative")]
    #[case("grace_period_secs: 1e30\nprocesses: {a: {command: x}}", "in range")]
    #[case("grace_period_secs: .nan\nprocesses: {a: {command: x}}", "non-negative")]
    fn invalid_groups_are_rejected(#[case] yaml: &str, #[case] needle: &str) {
        let err = GroupSpec::from_yaml_str(yaml)
            .and_then(|spec| spec.resolve())
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidSpec(_)), "got: {err}");
        assert!(err.to_string().contains(needle), "got: {err}");
    }

    #[rstest]
    #[case("processes: {a: {command: x, registers: {A.B: 1}}}")]
    #[case("processes: {a: {command: x, registers: {a.b: [1, hello]}}}")]
    #[case("processes: {a: {command: x, registers: {a.b: []}}}")]
    #[case("processes: {a: {command: x, registers: {a.b: {natural99: 1}}}}")]
    #[case("registers: {a.b: ~}\nprocesses: {a: {command: x}}")]
    fn malformed_literals_fail_before_launch(#[case] yaml: &str) {
        let err = GroupSpec::from_yaml_str(yaml)
            .unwrap()
            .resolve()
            .unwrap_err();
        assert!(
            matches!(
                err,
                OrchestratorError::Assignment {
                    source: RegisterError::InvalidAssignment { .. },
                    ..
                }
            ),
            "got: {err}"
        );
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = GroupSpec::from_yaml_str("processes: {a: {command: x, restart: always}}")
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidSpec(_)), "got: {err}");
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let spec = GroupSpec::new(vec![
            ProcessSpec::new("a", ["true"]),
            ProcessSpec::new("a", ["true"]),
        ]);
        assert!(matches!(spec.resolve(), Err(OrchestratorError::InvalidSpec(_))));

        let spec = GroupSpec::new(vec![ProcessSpec::new("a", ["true"])
            .register("x.y", 1)
            .register("x.y", 2)]);
        assert!(matches!(spec.resolve(), Err(OrchestratorError::InvalidSpec(_))));
    }

    #[test]
    fn load_reports_path_on_parse_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("group.yaml");
        std::fs::write(&path, "processes: [not, a, mapping").unwrap();
        let err = GroupSpec::load(&path).unwrap_err();
        assert!(matches!(err, OrchestratorError::Parse { .. }), "got: {err}");
        assert!(err.to_string().contains("group.yaml"));
    }
}
