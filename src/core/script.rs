use std::{process::Stdio, time::Duration};

use log::{debug, error, info, warn};
use tokio::process::Command;

use super::settings::ScriptSettings;

/// Runs external programs for hooks and the script installer.
#[derive(Debug, Clone)]
pub struct ScriptClient {
    timeout: Duration,
}

impl ScriptClient {
    pub fn new(settings: &ScriptSettings) -> Self {
        Self {
            timeout: Duration::from_secs(settings.timeout_seconds),
        }
    }

    /// Returns `true` only when the program ran to completion with exit code 0.
    pub async fn run_script(&self, path: &str, args: &[String]) -> bool {
        let path = path.trim();
        if path.is_empty() {
            warn!("[script] no script path configured");
            return false;
        }
        info!("[script] running {path} {}", args.join(" "));
        let child = Command::new(path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(child) => child,
            Err(err) => {
                error!("[script] unable to start {path}: {err}");
                return false;
            }
        };
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                error!("[script] {path} failed: {err}");
                return false;
            }
            Err(_) => {
                error!(
                    "[script] {path} did not finish within {} seconds and was stopped",
                    self.timeout.as_secs()
                );
                return false;
            }
        };
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            info!("[script] {line}");
        }
        for line in String::from_utf8_lossy(&output.stderr).lines() {
            warn!("[script] {line}");
        }
        if output.status.success() {
            debug!("[script] {path} finished");
            true
        } else {
            error!("[script] {path} exited with {}", output.status);
            false
        }
    }
}
