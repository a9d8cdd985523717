//! Child-process supervision for the demo: start the resource server, wait until it
//! answers `/health`, and make sure it never outlives the demo.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use crate::error::ClientError;

/// Owns a spawned child. Dropping the guard kills the child; [`ChildGuard::shutdown`]
/// kills it and waits for it to exit.
pub struct ChildGuard {
    child: Option<Child>,
    name: String,
}

impl ChildGuard {
    /// Spawn `program` with `args`, forwarding its output lines prefixed with `[name]`.
    pub fn spawn(name: &str, program: &str, args: &[&str]) -> Result<Self, ClientError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(stdout) = child.stdout.take() {
            let prefix = name.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    println!("[{prefix}] {line}");
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            let prefix = name.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    eprintln!("[{prefix}] {line}");
                }
            });
        }

        tracing::info!(pid = ?child.id(), "started {name}");
        Ok(Self {
            child: Some(child),
            name: name.to_string(),
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Kill the child and wait for it to exit.
    pub async fn shutdown(mut self) -> Result<(), ClientError> {
        if let Some(mut child) = self.child.take() {
            tracing::info!("shutting down {}", self.name);
            if child.try_wait()?.is_none() {
                child.kill().await?;
            }
        }
        Ok(())
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if let Err(e) = child.start_kill() {
                tracing::debug!(error = %e, "{} already exited", self.name);
            }
        }
    }
}

/// Poll `{base_url}/health` until it answers 2xx, `attempts` times at most.
pub async fn wait_for_health(
    http: &reqwest::Client,
    base_url: &str,
    attempts: u32,
    interval: Duration,
) -> Result<(), ClientError> {
    let url = format!("{}/health", base_url.trim_end_matches('/'));
    for attempt in 1..=attempts {
        match http.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(attempt, "{url} is healthy");
                return Ok(());
            }
            Ok(resp) => tracing::debug!(attempt, status = %resp.status(), "not ready yet"),
            Err(e) => tracing::debug!(attempt, error = %e, "not ready yet"),
        }
        if attempt < attempts {
            tokio::time::sleep(interval).await;
        }
    }
    Err(ClientError::Unhealthy { url, attempts })
}

/// Resolves on the first SIGINT or SIGTERM with the signal's name. The handlers are
/// installed before this returns.
#[cfg(unix)]
pub fn shutdown_signal() -> std::io::Result<impl std::future::Future<Output = &'static str>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
        }
    })
}

#[cfg(not(unix))]
pub fn shutdown_signal() -> std::io::Result<impl std::future::Future<Output = &'static str>> {
    Ok(async {
        let _ = tokio::signal::ctrl_c().await;
        "ctrl-c"
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_kills_child() {
        let guard = ChildGuard::spawn("sleeper", "sleep", &["30"]).unwrap();
        assert!(guard.id().is_some());
        guard.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_health_gives_up() {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(200))
            .build()
            .unwrap();
        let err = wait_for_health(&http, "http://127.0.0.1:9", 2, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Unhealthy { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_sigterm_is_caught() {
        let signal = shutdown_signal().unwrap();
        let status = Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .await
            .unwrap();
        assert!(status.success());

        let name = tokio::time::timeout(Duration::from_secs(5), signal)
            .await
            .expect("SIGTERM not delivered");
        assert_eq!(name, "SIGTERM");
    }
}
