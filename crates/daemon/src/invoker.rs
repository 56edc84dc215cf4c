//! Run process invocation

use async_trait::async_trait;
use launchgate_common::EXIT_SYSTEM_ERROR;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{SchedulerError, SchedulerResult};

/// Starts one pipeline run and reports its exit code
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(&self, entrypoint: &str, args: &[String]) -> SchedulerResult<i32>;
}

/// Runs the pipeline as a child process
#[derive(Debug, Default, Clone)]
pub struct ProcessInvoker;

#[async_trait]
impl Invoker for ProcessInvoker {
    async fn invoke(&self, entrypoint: &str, args: &[String]) -> SchedulerResult<i32> {
        debug!("Invoking {} {}", entrypoint, args.join(" "));
        let output = Command::new(entrypoint)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SchedulerError::Spawn {
                entrypoint: entrypoint.to_string(),
                message: e.to_string(),
            })?;

        // Killed by a signal counts as a system error
        let code = output.status.code().unwrap_or(EXIT_SYSTEM_ERROR);
        if code >= EXIT_SYSTEM_ERROR {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            warn!(
                "Run exited with {}: {}",
                code,
                tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
            );
        }
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let result = ProcessInvoker
            .invoke("/nonexistent/launchgate-binary", &[])
            .await;
        assert!(matches!(result, Err(SchedulerError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_code_is_reported() {
        let code = ProcessInvoker
            .invoke("sh", &["-c".to_string(), "exit 2".to_string()])
            .await
            .unwrap();
        assert_eq!(code, 2);
    }
}
