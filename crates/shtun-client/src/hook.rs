//! Up/down hook script runner.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use ipnet::IpNet;
use tokio::process::Command;
use tracing::{debug, info, warn};

use shtun_core::{Error, Result};

/// Which transition the hook is told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    Up,
    Down,
}

impl HookAction {
    fn as_str(self) -> &'static str {
        match self {
            HookAction::Up => "up",
            HookAction::Down => "down",
        }
    }
}

/// Arguments passed to the hook after the action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookArgs {
    pub device: String,
    pub local_ip: Ipv4Addr,
    pub remote_ip: Ipv4Addr,
    pub routes: Vec<IpNet>,
}

/// External script invoked as
/// `<script> up|down <device> <local_ip> <remote_ip> <route>...`.
#[derive(Debug, Clone)]
pub struct UpDownHook {
    script: PathBuf,
}

impl UpDownHook {
    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self {
            script: script.into(),
        }
    }

    /// Full argument list for one invocation.
    pub fn arguments(action: HookAction, args: &HookArgs) -> Vec<String> {
        let mut out = vec![
            action.as_str().to_string(),
            args.device.clone(),
            args.local_ip.to_string(),
            args.remote_ip.to_string(),
        ];
        out.extend(args.routes.iter().map(ToString::to_string));
        out
    }

    /// Run the up hook. A failure to start or a non-zero exit is an error.
    pub async fn up(&self, args: &HookArgs) -> Result<()> {
        let status = self
            .command(HookAction::Up, args)
            .status()
            .await
            .map_err(|e| Error::Hook {
                message: format!("failed to run {}: {e}", self.script.display()),
            })?;
        if !status.success() {
            return Err(Error::Hook {
                message: format!("{} up exited with {status}", self.script.display()),
            });
        }
        info!(script = %self.script.display(), "Up hook done");
        Ok(())
    }

    /// Run the down hook. Its outcome is only logged.
    pub async fn down(&self, args: &HookArgs) {
        match self.command(HookAction::Down, args).status().await {
            Ok(status) => debug!(script = %self.script.display(), %status, "Down hook done"),
            Err(e) => warn!(script = %self.script.display(), error = %e, "Failed to run down hook"),
        }
    }

    fn command(&self, action: HookAction, args: &HookArgs) -> Command {
        let argv = Self::arguments(action, args);
        info!(script = %self.script.display(), args = %argv.join(" "), "Running hook");
        let mut command = Command::new(&self.script);
        command.args(argv).kill_on_drop(true);
        command
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn args() -> HookArgs {
        HookArgs {
            device: "shtun.12.10".into(),
            local_ip: "100.64.12.10".parse().unwrap(),
            remote_ip: "100.64.12.11".parse().unwrap(),
            routes: vec!["10.0.0.0/16".parse().unwrap(), "192.168.1.0/24".parse().unwrap()],
        }
    }

    fn script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("hook.sh");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn argument_order() {
        assert_eq!(
            UpDownHook::arguments(HookAction::Up, &args()),
            vec![
                "up",
                "shtun.12.10",
                "100.64.12.10",
                "100.64.12.11",
                "10.0.0.0/16",
                "192.168.1.0/24"
            ]
        );
        let no_routes = HookArgs {
            routes: Vec::new(),
            ..args()
        };
        assert_eq!(UpDownHook::arguments(HookAction::Down, &no_routes).len(), 4);
    }

    #[tokio::test]
    async fn up_passes_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("calls");
        let hook = UpDownHook::new(script(
            dir.path(),
            &format!("echo \"$@\" >> {}", log.display()),
        ));

        hook.up(&args()).await.unwrap();
        hook.down(&args()).await;

        let calls = fs::read_to_string(&log).unwrap();
        assert_eq!(
            calls,
            "up shtun.12.10 100.64.12.10 100.64.12.11 10.0.0.0/16 192.168.1.0/24\n\
             down shtun.12.10 100.64.12.10 100.64.12.11 10.0.0.0/16 192.168.1.0/24\n"
        );
    }

    #[tokio::test]
    async fn up_failure_is_hook_error() {
        let dir = tempfile::tempdir().unwrap();
        let hook = UpDownHook::new(script(dir.path(), "exit 3"));
        let err = hook.up(&args()).await.unwrap_err();
        assert!(matches!(err, Error::Hook { .. }));

        // down ignores the exit status
        hook.down(&args()).await;
    }

    #[tokio::test]
    async fn missing_script_is_hook_error() {
        let hook = UpDownHook::new("/nonexistent/shtun-hook");
        assert!(matches!(hook.up(&args()).await, Err(Error::Hook { .. })));
        hook.down(&args()).await;
    }
}
