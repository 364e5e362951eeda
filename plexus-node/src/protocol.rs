//! Newline-delimited JSON request/response protocol spoken on a node socket,
//! plus the blocking client used by the CLI and by tests.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::{Duration, Instant};

use plexus_core::{Register, RegisterError, RegisterName, Value};
use serde::{Deserialize, Serialize};

use crate::error::{io_err, NodeError};

const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum NodeRequest {
    List,
    NameAt {
        index: usize,
    },
    /// A read when `value` is null, a write otherwise.
    Access {
        name: String,
        #[serde(default)]
        value: Option<Value>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub names: Option<Vec<RegisterName>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<RegisterName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub register: Option<Register>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RegisterError>,
    /// Protocol-level failure text (malformed request and the like).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl NodeResponse {
    pub fn names(names: Vec<RegisterName>) -> Self {
        Self {
            ok: true,
            names: Some(names),
            ..Self::default()
        }
    }

    pub fn name(name: Option<RegisterName>) -> Self {
        Self {
            ok: true,
            name,
            ..Self::default()
        }
    }

    pub fn register(register: Register) -> Self {
        Self {
            ok: true,
            register: Some(register),
            ..Self::default()
        }
    }

    pub fn rejected(error: RegisterError, current: Option<Register>) -> Self {
        Self {
            ok: false,
            register: current,
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn protocol_error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: Some(message.into()),
            ..Self::default()
        }
    }

    fn into_result(self) -> Result<Self, NodeError> {
        if self.ok {
            return Ok(self);
        }
        match self.error {
            Some(error) => Err(NodeError::Rejected {
                error,
                current: self.register.map(Box::new),
            }),
            None => Err(NodeError::Protocol(
                self.message
                    .unwrap_or_else(|| "unknown node error".to_string()),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Send one request to the node listening on `socket` and return one response.
pub fn send_request(socket: &Path, request: &NodeRequest) -> Result<NodeResponse, NodeError> {
    if !socket.exists() {
        return Err(NodeError::NodeNotRunning {
            socket: socket.to_path_buf(),
        });
    }

    let mut stream = UnixStream::connect(socket).map_err(|err| {
        if matches!(
            err.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
        ) {
            NodeError::NodeNotRunning {
                socket: socket.to_path_buf(),
            }
        } else {
            io_err(socket, err)
        }
    })?;

    let payload = serde_json::to_string(request)?;
    stream
        .write_all(payload.as_bytes())
        .map_err(|e| io_err(socket, e))?;
    stream.write_all(b"\n").map_err(|e| io_err(socket, e))?;
    stream.flush().map_err(|e| io_err(socket, e))?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let read = reader.read_line(&mut line).map_err(|e| io_err(socket, e))?;
    if read == 0 {
        return Err(NodeError::Protocol(
            "node closed connection before responding".to_string(),
        ));
    }

    Ok(serde_json::from_str(line.trim_end())?)
}

/// [`send_request`], retried briefly while the node is not yet listening.
pub fn send_with_retry(socket: &Path, request: &NodeRequest) -> Result<NodeResponse, NodeError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match send_request(socket, request) {
            Err(NodeError::NodeNotRunning { .. }) if attempt < CONNECT_ATTEMPTS => {
                sleep(CONNECT_BACKOFF);
            }
            other => return other,
        }
    }
}

/// Poll `socket` until the node answers a `list` or `timeout` elapses.
pub fn wait_for_node(socket: &Path, timeout: Duration) -> Result<(), NodeError> {
    let deadline = Instant::now() + timeout;
    loop {
        match send_request(socket, &NodeRequest::List) {
            Ok(_) => return Ok(()),
            Err(NodeError::NodeNotRunning { .. }) if Instant::now() < deadline => {
                sleep(CONNECT_BACKOFF);
            }
            Err(err) => return Err(err),
        }
    }
}

pub fn list_registers(socket: &Path) -> Result<Vec<RegisterName>, NodeError> {
    let response = send_with_retry(socket, &NodeRequest::List)?.into_result()?;
    Ok(response.names.unwrap_or_default())
}

pub fn register_name_at(socket: &Path, index: usize) -> Result<Option<RegisterName>, NodeError> {
    let response = send_with_retry(socket, &NodeRequest::NameAt { index })?.into_result()?;
    Ok(response.name)
}

/// Read (`value = None`) or write a register on a remote node.
///
/// A refused access comes back as [`NodeError::Rejected`].
pub fn access_register(
    socket: &Path,
    name: &str,
    value: Option<Value>,
) -> Result<Register, NodeError> {
    let request = NodeRequest::Access {
        name: name.to_string(),
        value,
    };
    let response = send_with_retry(socket, &request)?.into_result()?;
    response
        .register
        .ok_or_else(|| NodeError::Protocol("access response without register".to_string()))
}
