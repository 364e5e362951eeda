//! Node bootstrap: seed a register store from startup overrides, serve it on
//! a Unix socket, flush it on shutdown.

use std::path::{Path, PathBuf};
use std::time::Instant;

use plexus_core::assign::parse_environment;
use plexus_core::{RegisterFlags, RegisterName, Value};
use tokio::sync::broadcast;

use crate::backing::JsonFileBacking;
use crate::error::{io_err, NodeError};
use crate::paths::default_socket_path;
use crate::server::serve;
use crate::service::AccessService;
use crate::store::{Computed, StoreBuilder};

pub const NAME_REGISTER: &str = "plexus.node.name";
pub const SOCKET_REGISTER: &str = "plexus.node.socket";
pub const BACKING_REGISTER: &str = "plexus.node.backing";
pub const PID_REGISTER: &str = "plexus.node.pid";
pub const UPTIME_REGISTER: &str = "plexus.node.uptime";

const DEFAULT_NODE_NAME: &str = "node";

#[derive(Debug)]
pub struct Node {
    name: String,
    socket: PathBuf,
    service: AccessService,
}

impl Node {
    /// Bootstrap from hierarchical-name environment variables.
    pub fn from_env<I, K, V>(home: &Path, vars: I) -> Result<Self, NodeError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let overrides = parse_environment(vars)?;
        Self::bootstrap(home, overrides, |builder| builder)
    }

    /// Build the store from the reserved registers, whatever `configure` adds,
    /// and `overrides`.
    ///
    /// `plexus.node.backing` is read from the overrides before the store
    /// exists, since it decides where persisted values come from.
    pub fn bootstrap(
        home: &Path,
        overrides: Vec<(RegisterName, Value)>,
        configure: impl FnOnce(StoreBuilder) -> StoreBuilder,
    ) -> Result<Self, NodeError> {
        let backing_path = overrides
            .iter()
            .find(|(name, _)| name.as_str() == BACKING_REGISTER)
            .and_then(|(_, value)| match value {
                Value::String(path) if !path.is_empty() => Some(PathBuf::from(path)),
                _ => None,
            });

        let started = Instant::now();
        let mut builder = configure(StoreBuilder::new())
            .register(reserved(NAME_REGISTER)?, DEFAULT_NODE_NAME, RegisterFlags::CONFIG)
            .register(reserved(SOCKET_REGISTER)?, "", RegisterFlags::CONFIG)
            .register(reserved(BACKING_REGISTER)?, "", RegisterFlags::READ_ONLY)
            .computed(
                reserved(PID_REGISTER)?,
                Computed::read_only(|| Value::Natural32(vec![std::process::id()])),
            )
            .computed(
                reserved(UPTIME_REGISTER)?,
                Computed::read_only(move || Value::Real64(vec![started.elapsed().as_secs_f64()])),
            );
        if let Some(path) = backing_path {
            builder = builder.backing(JsonFileBacking::new(path));
        }
        let store = builder.overrides(overrides).build()?;

        let name = match store.get(NAME_REGISTER)?.value {
            Value::String(name) if !name.is_empty() => name,
            _ => DEFAULT_NODE_NAME.to_string(),
        };
        let socket = match store.get(SOCKET_REGISTER)?.value {
            Value::String(path) if !path.is_empty() => PathBuf::from(path),
            _ => default_socket_path(home, &name),
        };

        Ok(Self {
            name,
            socket,
            service: AccessService::new(store),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    pub fn service(&self) -> &AccessService {
        &self.service
    }

    /// Serve until SIGINT/SIGTERM or a message on `shutdown`, then flush.
    pub async fn run(self, shutdown: broadcast::Sender<()>) -> Result<(), NodeError> {
        let Node {
            name,
            socket,
            service,
        } = self;
        tracing::info!(node = %name, socket = %socket.display(), "node starting");

        let server_handle = {
            let shutdown = shutdown.clone();
            let rx = shutdown.subscribe();
            let service = service.clone();
            tokio::spawn(async move {
                let result = serve(socket, service, rx).await;
                let _ = shutdown.send(());
                result
            })
        };

        let signal_handle = {
            let shutdown = shutdown.clone();
            let mut rx = shutdown.subscribe();
            tokio::spawn(async move {
                tokio::select! {
                    _ = rx.recv() => Ok(()),
                    signal = wait_for_signal() => {
                        signal?;
                        tracing::info!("received termination signal, shutting down node");
                        let _ = shutdown.send(());
                        Ok(())
                    }
                }
            })
        };

        let (server_result, signal_result) = tokio::join!(server_handle, signal_handle);
        service.flush().await;
        tracing::info!(node = %name, "node stopped");

        handle_join("register_service", server_result)?;
        handle_join("signal_handler", signal_result)?;
        Ok(())
    }

    /// Run the node on a fresh multi-threaded runtime, blocking the caller.
    pub fn run_blocking(self) -> Result<(), NodeError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| io_err("tokio-runtime", e))?;
        let (shutdown, _) = broadcast::channel(4);
        runtime.block_on(self.run(shutdown))
    }
}

/// Install the fmt subscriber, filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn reserved(name: &str) -> Result<RegisterName, NodeError> {
    Ok(RegisterName::parse(name)?)
}

async fn wait_for_signal() -> Result<(), NodeError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).map_err(|e| io_err("SIGTERM handler", e))?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map_err(|e| io_err("ctrl-c handler", e)),
        _ = terminate.recv() => Ok(()),
    }
}

fn handle_join(
    task: &str,
    result: Result<Result<(), NodeError>, tokio::task::JoinError>,
) -> Result<(), NodeError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(NodeError::Protocol(format!("{task} task join failure: {err}"))),
    }
}
