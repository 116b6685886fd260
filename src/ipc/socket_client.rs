use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::error::{Result, StopkranError};
use crate::ipc::{IpcRequest, IpcResponse, MAX_REQUEST_BYTES};

/// Client side of the hook protocol: one request line out, one response line
/// back, all within `timeout_secs`.
pub struct IpcClient {
    socket_path: PathBuf,
    timeout_secs: u64,
}

impl IpcClient {
    pub fn new(socket_path: PathBuf, timeout_secs: u64) -> Self {
        Self {
            socket_path,
            timeout_secs,
        }
    }

    /// Ask the daemon to mediate `req`.
    pub async fn request(&self, req: &IpcRequest) -> Result<IpcResponse> {
        let line = serde_json::to_string(req)?;
        self.request_raw(&line).await
    }

    /// Send `line` verbatim, even when it is not a valid request.
    pub async fn request_raw(&self, line: &str) -> Result<IpcResponse> {
        if !self.socket_path.exists() {
            return Err(StopkranError::SocketNotFound {
                path: self.socket_path.clone(),
            });
        }

        let deadline = Duration::from_secs(self.timeout_secs);
        tokio::time::timeout(deadline, self.exchange(line))
            .await
            .map_err(|_| StopkranError::DaemonTimeout {
                timeout_secs: self.timeout_secs,
            })?
    }

    async fn exchange(&self, line: &str) -> Result<IpcResponse> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(ipc_error("cannot reach daemon"))?;
        let (reader, mut writer) = stream.into_split();

        let mut frame = Vec::with_capacity(line.len() + 1);
        frame.extend_from_slice(line.as_bytes());
        frame.push(b'\n');
        writer
            .write_all(&frame)
            .await
            .map_err(ipc_error("sending request"))?;
        // Half-close so the daemon sees end of input after the request line.
        writer
            .shutdown()
            .await
            .map_err(ipc_error("closing request stream"))?;

        let mut answer = String::new();
        let read = BufReader::new(reader.take(MAX_REQUEST_BYTES))
            .read_line(&mut answer)
            .await
            .map_err(ipc_error("reading response"))?;
        if read == 0 {
            return Err(StopkranError::Ipc {
                reason: "daemon closed the connection without answering".into(),
            });
        }

        serde_json::from_str(answer.trim_end()).map_err(|e| StopkranError::Ipc {
            reason: format!("daemon sent an unreadable response: {}", e),
        })
    }
}

fn ipc_error(context: &'static str) -> impl FnOnce(std::io::Error) -> StopkranError {
    move |e| StopkranError::Ipc {
        reason: format!("{}: {}", context, e),
    }
}
