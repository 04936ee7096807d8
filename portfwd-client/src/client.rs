//! Request/response calls to the daemon

use std::path::Path;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::RuleStatus;
use crate::error::ClientError;
use crate::protocol::{ControlRequest, ControlResponse, socket_path};

/// Send one request and return the daemon's `data` on success
///
/// A reply with `success: false` becomes [`ClientError::Daemon`] carrying
/// the daemon's message.
pub async fn send(home: &Path, request: &ControlRequest) -> Result<serde_json::Value, ClientError> {
    let socket = socket_path(home);

    let stream = match UnixStream::connect(&socket).await {
        Ok(stream) => stream,
        Err(e)
            if matches!(
                e.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
            ) =>
        {
            return Err(ClientError::DaemonNotRunning { socket });
        }
        Err(e) => return Err(e.into()),
    };

    tracing::debug!(?request, socket = %socket.display(), "Sending control request");

    let (reader, mut writer) = stream.into_split();
    let mut line = serde_json::to_string(request)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.shutdown().await?;

    let mut reply = String::new();
    if BufReader::new(reader).read_line(&mut reply).await? == 0 {
        return Err(ClientError::NoResponse);
    }

    let response: ControlResponse = serde_json::from_str(reply.trim())?;
    if response.success {
        Ok(response.data)
    } else {
        let message = match response.data {
            serde_json::Value::String(message) => message,
            other => other.to_string(),
        };
        Err(ClientError::Daemon(message))
    }
}

/// True when something is accepting connections on the control socket
pub async fn is_daemon_running(home: &Path) -> bool {
    UnixStream::connect(socket_path(home)).await.is_ok()
}

pub async fn start_rule(home: &Path, name: &str) -> Result<(), ClientError> {
    send(
        home,
        &ControlRequest::StartRule {
            name: name.to_string(),
        },
    )
    .await
    .map(drop)
}

pub async fn stop_rule(home: &Path, name: &str) -> Result<(), ClientError> {
    send(
        home,
        &ControlRequest::StopRule {
            name: name.to_string(),
        },
    )
    .await
    .map(drop)
}

pub async fn status(home: &Path) -> Result<Vec<RuleStatus>, ClientError> {
    let data = send(home, &ControlRequest::Status).await?;
    Ok(serde_json::from_value(data)?)
}

/// Ask the daemon to re-read its rule store
///
/// Returns the daemon's summary of what changed.
pub async fn reload(home: &Path) -> Result<serde_json::Value, ClientError> {
    send(home, &ControlRequest::Reload).await
}
