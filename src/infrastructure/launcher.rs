//! Presents the OS Bluetooth settings screen by spawning the platform's
//! settings command.

use crate::domain::handlers::{LaunchError, SettingsLauncher};
use crate::domain::settings::LauncherCommand;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

/// Built-in command for the current target.
pub fn default_command() -> LauncherCommand {
    let (program, args, detach): (&str, &[&str], bool) = if cfg!(target_os = "android") {
        // 0x10000000 = FLAG_ACTIVITY_NEW_TASK
        (
            "am",
            &["start", "-a", "android.settings.BLUETOOTH_SETTINGS", "-f", "0x10000000"],
            false,
        )
    } else if cfg!(windows) {
        ("cmd", &["/C", "start", "", "ms-settings:bluetooth"], false)
    } else if cfg!(target_os = "macos") {
        ("open", &["x-apple.systempreferences:com.apple.BluetoothSettings"], false)
    } else {
        // Stays in the foreground until the window closes.
        ("gnome-control-center", &["bluetooth"], true)
    };

    LauncherCommand {
        program: program.to_string(),
        args: args.iter().map(|a| a.to_string()).collect(),
        detach,
    }
}

/// Wait on a detached child from a background thread so it never lingers as a
/// zombie once it exits.
fn reap_detached(mut child: Child) -> JoinHandle<Option<ExitStatus>> {
    let pid = child.id();
    debug!("Detached settings process {}", pid);
    std::thread::spawn(move || match child.wait() {
        Ok(status) => {
            debug!("Settings process {} exited with {}", pid, status);
            Some(status)
        }
        Err(e) => {
            warn!("Failed to wait on settings process {}: {}", pid, e);
            None
        }
    })
}

pub struct SystemSettingsLauncher {
    command: LauncherCommand,
}

impl SystemSettingsLauncher {
    pub fn new(command: LauncherCommand) -> Self {
        Self { command }
    }

    /// Use the configured override, or the built-in command.
    pub fn from_settings(command: Option<&LauncherCommand>) -> Self {
        Self::new(command.cloned().unwrap_or_else(default_command))
    }

    pub fn command(&self) -> &LauncherCommand {
        &self.command
    }

    fn spawn_error(&self, source: std::io::Error) -> LaunchError {
        LaunchError::Spawn {
            program: self.command.program.clone(),
            source,
        }
    }
}

impl SettingsLauncher for SystemSettingsLauncher {
    fn open_bluetooth_settings(&self) -> Result<(), LaunchError> {
        let LauncherCommand {
            program,
            args,
            detach,
        } = &self.command;
        info!("Launching {} {:?}", program, args);

        let mut command = Command::new(program);
        command.args(args).stdin(Stdio::null());

        if *detach {
            let child = command
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
                .map_err(|e| self.spawn_error(e))?;
            reap_detached(child);
            return Ok(());
        }

        let output = command.output().map_err(|e| self.spawn_error(e))?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(LaunchError::Rejected(if stderr.is_empty() {
            format!("{} exited with {}", program, output.status)
        } else {
            stderr
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_wins() {
        let custom = LauncherCommand {
            program: "xdg-open".into(),
            args: vec!["settings://bluetooth".into()],
            detach: false,
        };
        let launcher = SystemSettingsLauncher::from_settings(Some(&custom));
        assert_eq!(launcher.command(), &custom);
    }

    #[test]
    fn test_default_command_is_bluetooth_specific() {
        let launcher = SystemSettingsLauncher::from_settings(None);
        let command = launcher.command();
        assert!(!command.program.is_empty());
        assert!(command
            .args
            .iter()
            .any(|a| a.to_lowercase().contains("bluetooth")));
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let launcher = SystemSettingsLauncher::new(LauncherCommand {
            program: "definitely-not-a-real-settings-program".into(),
            args: vec![],
            detach: false,
        });
        let err = launcher.open_bluetooth_settings().unwrap_err();
        assert!(matches!(err, LaunchError::Spawn { .. }));
        assert!(err.to_string().starts_with("definitely-not-a-real-settings-program: "));
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_is_rejected_with_stderr() {
        let launcher = SystemSettingsLauncher::new(LauncherCommand {
            program: "sh".into(),
            args: vec!["-c".into(), "echo permission denied >&2; exit 1".into()],
            detach: false,
        });
        let err = launcher.open_bluetooth_settings().unwrap_err();
        assert_eq!(err.to_string(), "permission denied");
    }

    #[cfg(unix)]
    #[test]
    fn test_zero_exit_succeeds() {
        let launcher = SystemSettingsLauncher::new(LauncherCommand {
            program: "true".into(),
            args: vec![],
            detach: false,
        });
        assert!(launcher.open_bluetooth_settings().is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_detached_child_is_reaped() {
        let child = Command::new("true").spawn().unwrap();
        let status = reap_detached(child).join().unwrap();
        assert!(status.is_some_and(|s| s.success()));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_detached_launches_leave_no_zombies() {
        let launcher = SystemSettingsLauncher::new(LauncherCommand {
            program: "true".into(),
            args: vec![],
            detach: true,
        });
        for _ in 0..3 {
            launcher.open_bluetooth_settings().unwrap();
        }

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while zombie_children() > 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(50));
        }
        assert_eq!(zombie_children(), 0);
    }

    #[cfg(target_os = "linux")]
    fn zombie_children() -> usize {
        let me = std::process::id().to_string();
        std::fs::read_dir("/proc")
            .unwrap()
            .filter_map(|entry| std::fs::read_to_string(entry.ok()?.path().join("stat")).ok())
            .filter(|stat| {
                // "<pid> (<comm>) <state> <ppid> ..."
                let Some((_, rest)) = stat.rsplit_once(')') else {
                    return false;
                };
                let mut fields = rest.split_whitespace();
                fields.next() == Some("Z") && fields.next() == Some(me.as_str())
            })
            .count()
    }
}
