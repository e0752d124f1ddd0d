//! Initial shell launcher
//!
//! The session collaborator has already dropped to the user's credentials and
//! prepared the environment; the shell inherits both and additionally learns
//! where the control socket lives.

use std::path::Path;
use std::process::Command;

use anyhow::{bail, Context, Result};
use tracing::info;
use windowserver_ipc::SOCKET_ENV;

/// Spawn the shell command line and return its pid
pub fn launch(argv: &[String], socket: &Path) -> Result<u32> {
    let Some((program, args)) = argv.split_first() else {
        bail!("Shell command is empty");
    };

    let mut cmd = Command::new(program);
    cmd.args(args).env(SOCKET_ENV, socket);

    let child = cmd
        .spawn()
        .with_context(|| format!("Failed to launch shell {:?}", program))?;
    let pid = child.id();
    info!("Launched shell {:?} (pid {})", program, pid);

    // Reaped by the reactor's process watch
    drop(child);
    Ok(pid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_command_rejected() {
        assert!(launch(&[], Path::new("/tmp/ws.sock")).is_err());
    }

    #[test]
    fn test_missing_program_reported() {
        let argv = vec!["/nonexistent/windowserver-shell".to_string()];
        let err = launch(&argv, Path::new("/tmp/ws.sock")).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to launch shell"));
    }

    #[test]
    fn test_shell_sees_socket_path() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("socket.txt");
        let argv = vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("printf %s \"${}\" > {}", SOCKET_ENV, out.display()),
        ];

        let pid = launch(&argv, Path::new("/run/test/ws.sock")).unwrap();
        assert!(pid > 0);

        let mut written = String::new();
        for _ in 0..200 {
            written = std::fs::read_to_string(&out).unwrap_or_default();
            if !written.is_empty() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert_eq!(written, "/run/test/ws.sock");
    }
}
