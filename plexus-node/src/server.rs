//! Unix-socket front end for an [`AccessService`].

use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;

use crate::error::{io_err, NodeError};
use crate::protocol::{NodeRequest, NodeResponse};
use crate::service::AccessService;

/// Answer one request against `service`.
pub async fn dispatch(service: &AccessService, request: NodeRequest) -> NodeResponse {
    match request {
        NodeRequest::List => NodeResponse::names(service.list().await),
        NodeRequest::NameAt { index } => NodeResponse::name(service.name_at(index).await),
        NodeRequest::Access { name, value } => match service.access(&name, value).await {
            Ok(register) => NodeResponse::register(register),
            Err(failure) => NodeResponse::rejected(failure.error, failure.current),
        },
    }
}

/// Accept connections on `socket` until `shutdown` fires, then remove the
/// socket file.
pub async fn serve(
    socket: PathBuf,
    service: AccessService,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), NodeError> {
    if let Some(dir) = socket.parent().filter(|d| !d.as_os_str().is_empty()) {
        if !dir.exists() {
            std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
    }
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "register service listening");

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let service = service.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_client(stream, service).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = std::fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_client(stream: UnixStream, service: AccessService) -> Result<(), NodeError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("node socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<NodeRequest>(&line) {
            Ok(request) => dispatch(&service, request).await,
            Err(err) => NodeResponse::protocol_error(format!("invalid request JSON: {err}")),
        };
        write_response(&mut writer, &response).await?;
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &NodeResponse,
) -> Result<(), NodeError> {
    let mut payload = serde_json::to_vec(response)?;
    payload.push(b'\n');
    writer
        .write_all(&payload)
        .await
        .map_err(|e| io_err("node socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("node socket flush", e))
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), NodeError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(NodeError::Protocol(format!(
                "node socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale node socket before bind",
            );
        }
    }

    match std::fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn set_socket_permissions(path: &Path) -> Result<(), NodeError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{access_register, list_registers, register_name_at};
    use crate::store::StoreBuilder;
    use plexus_core::{RegisterError, RegisterFlags, RegisterName, Value};
    use tempfile::TempDir;

    fn service() -> AccessService {
        AccessService::new(
            StoreBuilder::new()
                .register(RegisterName::parse("x.y").unwrap(), vec![42_u16], RegisterFlags::CONFIG)
                .register(RegisterName::parse("a.ro").unwrap(), "fixed", RegisterFlags::READ_ONLY)
                .build()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn dispatch_name_at_out_of_range() {
        let response = dispatch(&service(), NodeRequest::NameAt { index: 9 }).await;
        assert!(response.ok);
        assert!(response.name.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn serves_clients_over_socket_until_shutdown() {
        let tmp = TempDir::new().unwrap();
        let socket = tmp.path().join("run").join("node.sock");
        // A leftover file from a dead node must not block the bind.
        std::fs::create_dir_all(socket.parent().unwrap()).unwrap();
        std::fs::write(&socket, b"").unwrap();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let server = tokio::spawn(serve(socket.clone(), service(), shutdown_rx));

        let client_socket = socket.clone();
        tokio::task::spawn_blocking(move || {
            crate::protocol::wait_for_node(&client_socket, std::time::Duration::from_secs(5))
                .unwrap();
            let names = list_registers(&client_socket).unwrap();
            assert_eq!(names.len(), 2);
            assert_eq!(
                register_name_at(&client_socket, 0).unwrap().unwrap().as_str(),
                "a.ro"
            );

            let reg = access_register(&client_socket, "x.y", None).unwrap();
            assert_eq!(reg.value, Value::Natural16(vec![42]));

            let reg =
                access_register(&client_socket, "x.y", Some(Value::Integer8(vec![7]))).unwrap();
            assert_eq!(reg.value, Value::Natural16(vec![7]));

            match access_register(&client_socket, "a.ro", Some(Value::string("new"))) {
                Err(NodeError::Rejected { error, current }) => {
                    assert_eq!(error, RegisterError::immutable("a.ro"));
                    assert_eq!(current.unwrap().value, Value::string("fixed"));
                }
                other => panic!("expected rejection, got {other:?}"),
            }
        })
        .await
        .unwrap();

        shutdown_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
        assert!(!socket.exists(), "socket should be removed on shutdown");
    }
}
