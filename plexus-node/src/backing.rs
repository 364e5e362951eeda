//! Durable storage behind a register store.
//!
//! The JSON backing persists a `RegisterFile` document and writes it with the
//! atomic `.tmp` + rename pattern, so a crash mid-write leaves the previous
//! file intact.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use plexus_core::{RegisterName, Value};
use serde::{Deserialize, Serialize};

use crate::error::{io_err, NodeError};

/// One persisted register as it appears on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedRegister {
    pub name: RegisterName,
    pub value: Value,
    pub mutable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// On-disk payload of a [`JsonFileBacking`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterFile {
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub registers: Vec<PersistedRegister>,
}

/// Where persistent registers go between runs.
pub trait Backing: Send {
    /// Human-readable location, used in logs.
    fn location(&self) -> String;

    /// Whether values written here survive a restart. Registers backed by a
    /// non-durable store always report `persistent = false`.
    fn is_durable(&self) -> bool;

    fn load(&mut self) -> Result<Vec<PersistedRegister>, NodeError>;

    fn store(&mut self, registers: &[PersistedRegister]) -> Result<(), NodeError>;
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

/// Volatile backing: nothing is kept across restarts.
#[derive(Debug, Default)]
pub struct MemoryBacking;

impl Backing for MemoryBacking {
    fn location(&self) -> String {
        "memory".to_string()
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn load(&mut self) -> Result<Vec<PersistedRegister>, NodeError> {
        Ok(Vec::new())
    }

    fn store(&mut self, _registers: &[PersistedRegister]) -> Result<(), NodeError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JSON file
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct JsonFileBacking {
    path: PathBuf,
}

impl JsonFileBacking {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

impl Backing for JsonFileBacking {
    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn is_durable(&self) -> bool {
        true
    }

    /// Returns no registers if the file does not exist yet.
    fn load(&mut self) -> Result<Vec<PersistedRegister>, NodeError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = std::fs::read_to_string(&self.path).map_err(|e| io_err(&self.path, e))?;
        let file: RegisterFile =
            serde_json::from_str(&contents).map_err(|source| NodeError::Parse {
                path: self.path.clone(),
                source,
            })?;
        Ok(file.registers)
    }

    fn store(&mut self, registers: &[PersistedRegister]) -> Result<(), NodeError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }

        let file = RegisterFile {
            saved_at: Utc::now(),
            registers: registers.to_vec(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        let tmp = self.tmp_path();
        std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
        set_private_permissions(&tmp)?;
        std::fs::rename(&tmp, &self.path).map_err(|e| io_err(&self.path, e))?;
        Ok(())
    }
}

#[cfg(unix)]
fn set_private_permissions(path: &Path) -> Result<(), NodeError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_private_permissions(_path: &Path) -> Result<(), NodeError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn persisted(name: &str, value: Value) -> PersistedRegister {
        PersistedRegister {
            name: RegisterName::parse(name).unwrap(),
            value,
            mutable: true,
            timestamp: None,
        }
    }

    #[test]
    fn missing_file_loads_empty() {
        let tmp = TempDir::new().unwrap();
        let mut backing = JsonFileBacking::new(tmp.path().join("absent.json"));
        assert!(backing.load().unwrap().is_empty());
    }

    #[test]
    fn store_then_load_returns_registers() {
        let tmp = TempDir::new().unwrap();
        let mut backing = JsonFileBacking::new(tmp.path().join("nested").join("regs.json"));
        let regs = vec![
            persisted("uavcan.node.id", Value::Natural16(vec![42])),
            persisted("thermostat.pid.gains", Value::Real32(vec![0.1, 0.0, 0.0])),
        ];
        backing.store(&regs).unwrap();
        assert_eq!(backing.load().unwrap(), regs);
        assert!(
            !backing.tmp_path().exists(),
            "tmp file should be removed after atomic rename"
        );
    }

    #[cfg(unix)]
    #[test]
    fn stored_file_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = TempDir::new().unwrap();
        let mut backing = JsonFileBacking::new(tmp.path().join("regs.json"));
        backing.store(&[]).unwrap();
        let mode = std::fs::metadata(backing.path()).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "expected 0600, got {mode:o}");
    }

    #[test]
    fn corrupt_file_is_a_parse_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("regs.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = JsonFileBacking::new(&path).load().unwrap_err();
        assert!(matches!(err, NodeError::Parse { .. }), "got: {err}");
    }

    #[test]
    fn memory_backing_is_volatile() {
        let mut backing = MemoryBacking;
        backing
            .store(&[persisted("a", Value::string("x"))])
            .unwrap();
        assert!(!backing.is_durable());
        assert!(backing.load().unwrap().is_empty());
    }
}
