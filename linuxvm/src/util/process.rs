//! Child process helpers for the subprocess-backed subsystems.

use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::Child;

/// Grace period between SIGTERM and SIGKILL.
pub const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Check if a process with the given PID exists.
///
/// Uses `libc::kill(pid, 0)` which sends a null signal to check existence.
pub fn is_process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

/// Stop a child process: SIGTERM first, SIGKILL once `grace` has elapsed.
///
/// Always reaps the child so no zombie is left behind.
pub async fn terminate(child: &mut Child, name: &str, grace: Duration) -> std::io::Result<ExitStatus> {
    if let Some(status) = child.try_wait()? {
        return Ok(status);
    }

    if let Some(pid) = child.id()
        && is_process_alive(pid)
    {
        tracing::debug!(process = name, pid, "Sending SIGTERM");
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            tracing::warn!(
                process = name,
                grace_ms = grace.as_millis() as u64,
                "Process ignored SIGTERM, killing"
            );
            child.kill().await?;
            child.wait().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::process::Command;

    #[test]
    fn test_is_process_alive_current() {
        assert!(is_process_alive(std::process::id()));
    }

    #[test]
    fn test_is_process_alive_invalid() {
        // u32::MAX becomes -1 when cast to i32, which has special meaning in kill()
        assert!(!is_process_alive(999999999));
    }

    #[tokio::test]
    async fn test_terminate_running_child() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id().unwrap();

        let status = terminate(&mut child, "sleep", Duration::from_secs(2))
            .await
            .unwrap();

        assert!(!status.success());
        assert!(!is_process_alive(pid));
    }

    #[tokio::test]
    async fn test_terminate_already_exited() {
        let mut child = Command::new("true").spawn().unwrap();
        child.wait().await.unwrap();

        let status = terminate(&mut child, "true", Duration::from_secs(1))
            .await
            .unwrap();
        assert!(status.success());
    }
}
