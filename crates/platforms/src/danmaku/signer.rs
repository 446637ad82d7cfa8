//! Signing capability used to complete connection URLs.
//!
//! Some platforms require an opaque value derived from the connection parameters
//! (a URL signature, or the address of a relay that speaks the platform's native
//! protocol). Protocols only see [`SignatureProvider`].

use async_trait::async_trait;
use parking_lot::Mutex;
use std::net::{Ipv4Addr, SocketAddr};
use std::process::Stdio;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::danmaku::error::{DanmakuError, Result};

#[async_trait]
pub trait SignatureProvider: Send + Sync {
    async fn compute_signature(&self, input: &str) -> Result<String>;
}

/// How long a freshly spawned helper may take to start listening.
pub const DEFAULT_HELPER_READY_TIMEOUT: Duration = Duration::from_secs(15);
const HELPER_POLL_INTERVAL: Duration = Duration::from_millis(250);

struct RunningHelper {
    child: Child,
    url: String,
}

/// Runs an external relay process that connects to the platform and re-emits
/// events as JSON text frames on a local WebSocket.
///
/// The command template is split on whitespace. `{room}` and `{port}` are
/// substituted; when neither appears, the room id and port are appended as the
/// final two arguments. `compute_signature(room_id)` returns the relay URL,
/// spawning the process on first use and again if it has exited.
pub struct HelperProcessSigner {
    template: Vec<String>,
    ready_timeout: Duration,
    running: Mutex<Option<RunningHelper>>,
}

impl HelperProcessSigner {
    pub fn new(command: &str) -> Result<Self> {
        let template: Vec<String> = command.split_whitespace().map(str::to_string).collect();
        if template.is_empty() {
            return Err(DanmakuError::signature("helper command is empty"));
        }
        Ok(Self {
            template,
            ready_timeout: DEFAULT_HELPER_READY_TIMEOUT,
            running: Mutex::new(None),
        })
    }

    /// Bound the wait for a freshly spawned helper to start listening.
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn ready_timeout(&self) -> Duration {
        self.ready_timeout
    }

    fn build_args(&self, room_id: &str, port: u16) -> (String, Vec<String>) {
        let port = port.to_string();
        let has_placeholder = self
            .template
            .iter()
            .any(|a| a.contains("{room}") || a.contains("{port}"));

        let mut parts = self
            .template
            .iter()
            .map(|a| a.replace("{room}", room_id).replace("{port}", &port));
        let program = parts.next().unwrap_or_default();
        let mut args: Vec<String> = parts.collect();
        if !has_placeholder {
            args.push(room_id.to_string());
            args.push(port);
        }
        (program, args)
    }

    /// Reuse the live helper if there is one.
    fn running_url(&self) -> Option<String> {
        let mut guard = self.running.lock();
        let helper = guard.as_mut()?;
        match helper.child.try_wait() {
            Ok(None) => Some(helper.url.clone()),
            Ok(Some(status)) => {
                warn!(%status, "Helper process exited");
                *guard = None;
                None
            }
            Err(e) => {
                warn!(error = %e, "Failed to poll helper process");
                *guard = None;
                None
            }
        }
    }

    async fn wait_ready(port: u16, timeout: Duration) -> Result<()> {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if TcpStream::connect(addr).await.is_ok() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(DanmakuError::signature(format!(
                    "helper did not listen on port {port} within {timeout:?}"
                )));
            }
            tokio::time::sleep(HELPER_POLL_INTERVAL).await;
        }
    }
}

/// Ask the OS for a free local port.
async fn free_port() -> Result<u16> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
    Ok(listener.local_addr()?.port())
}

#[async_trait]
impl SignatureProvider for HelperProcessSigner {
    async fn compute_signature(&self, room_id: &str) -> Result<String> {
        if let Some(url) = self.running_url() {
            return Ok(url);
        }

        let port = free_port().await?;
        let (program, args) = self.build_args(room_id, port);
        debug!(%program, ?args, "Spawning helper process");

        let child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DanmakuError::signature(format!("failed to spawn {program}: {e}")))?;

        Self::wait_ready(port, self.ready_timeout).await?;

        let url = format!("ws://127.0.0.1:{port}/");
        info!(room_id, %url, "Helper relay ready");
        *self.running.lock() = Some(RunningHelper {
            child,
            url: url.clone(),
        });
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_command_rejected() {
        assert!(HelperProcessSigner::new("   ").is_err());
    }

    #[test]
    fn test_args_appended_without_placeholders() {
        let signer = HelperProcessSigner::new("node relay/index.js").unwrap();
        let (program, args) = signer.build_args("kaerlol", 40000);
        assert_eq!(program, "node");
        assert_eq!(args, vec!["relay/index.js", "kaerlol", "40000"]);
    }

    #[test]
    fn test_placeholders_substituted() {
        let signer = HelperProcessSigner::new("relay --room={room} --port {port}").unwrap();
        let (program, args) = signer.build_args("11342412", 41234);
        assert_eq!(program, "relay");
        assert_eq!(args, vec!["--room=11342412", "--port", "41234"]);
    }

    #[test]
    fn test_ready_timeout_override() {
        let signer = HelperProcessSigner::new("relay").unwrap();
        assert_eq!(signer.ready_timeout(), DEFAULT_HELPER_READY_TIMEOUT);
        let signer = signer.with_ready_timeout(Duration::from_secs(7));
        assert_eq!(signer.ready_timeout(), Duration::from_secs(7));
    }

    #[tokio::test]
    async fn test_wait_ready_gives_up_after_timeout() {
        // Nothing listens on a port we just released.
        let port = free_port().await.unwrap();
        let started = std::time::Instant::now();
        let err = HelperProcessSigner::wait_ready(port, Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, DanmakuError::Signature(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_free_port_is_nonzero() {
        assert_ne!(free_port().await.unwrap(), 0);
    }
}
