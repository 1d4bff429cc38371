//! Lifecycle hook scripts.
//!
//! Hooks live in the relay's hooks directory and are executed by name
//! with tunnel details passed through environment variables. A missing
//! script is not an error.

use std::path::Path;

use tokio::process::Command;
use tracing::debug;

use crate::error::RelayError;

/// Runs after a TCP tunnel's public listener is bound.
pub const TCP_POST_CONNECT: &str = "tcp-post-connect";
/// Runs after an HTTP subdomain is registered.
pub const CREATE_HTTP_SUBDOMAIN: &str = "create-http-subdomain";

pub async fn run(dir: &Path, name: &str, envs: &[(&str, String)]) -> Result<(), RelayError> {
    let script = dir.join(name);
    if tokio::fs::metadata(&script).await.is_err() {
        debug!("no hook script at {:?}, skipping", script);
        return Ok(());
    }
    let status = Command::new(&script).envs(envs.iter().cloned()).status().await?;
    if !status.success() {
        return Err(RelayError::HookFailed {
            name: name.to_string(),
            status,
        });
    }
    debug!("hook {} finished: {}", name, status);
    Ok(())
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn write_script(dir: &Path, name: &str, body: &str) {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[tokio::test]
    async fn test_missing_script_is_ok() {
        let dir = std::env::temp_dir().join("revport-hooks-missing");
        std::fs::create_dir_all(&dir).unwrap();
        run(&dir, "tcp-post-connect", &[]).await.unwrap();
    }

    #[tokio::test]
    async fn test_script_receives_env() {
        let dir = std::env::temp_dir().join("revport-hooks-env");
        std::fs::create_dir_all(&dir).unwrap();
        let marker = dir.join("port.out");
        write_script(
            &dir,
            TCP_POST_CONNECT,
            &format!("#!/bin/sh\necho \"$PORT\" > {}\n", marker.display()),
        );
        run(&dir, TCP_POST_CONNECT, &[("PORT", "42000".to_string())])
            .await
            .unwrap();
        let out = std::fs::read_to_string(&marker).unwrap();
        assert_eq!(out.trim(), "42000");
    }

    #[tokio::test]
    async fn test_failing_script_reports_status() {
        let dir = std::env::temp_dir().join("revport-hooks-fail");
        std::fs::create_dir_all(&dir).unwrap();
        write_script(&dir, TCP_POST_CONNECT, "#!/bin/sh\nexit 3\n");
        let err = run(&dir, TCP_POST_CONNECT, &[]).await.unwrap_err();
        assert!(matches!(err, RelayError::HookFailed { .. }));
    }
}
