use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Default logical channel the host binds.
pub const DEFAULT_CHANNEL: &str = "epayload/settings";

/// Logging knobs. Missing fields take their defaults; `RUST_LOG` overrides `level`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub console: bool,
    /// Rolling log files under `log_dir`, rotated per `rotation`
    /// ("hourly", "minutely", "never", anything else is daily).
    pub file: bool,
    pub log_dir: String,
    pub rotation: String,
    pub show_source: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console: true,
            file: false,
            log_dir: "logs".to_string(),
            rotation: "daily".to_string(),
            show_source: false,
        }
    }
}

fn default_channel() -> String {
    DEFAULT_CHANNEL.to_string()
}

/// Program and arguments that replace the built-in platform command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LauncherCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Leave the program running instead of waiting for its exit status.
    #[serde(default)]
    pub detach: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_channel")]
    pub channel_name: String,

    #[serde(default)]
    pub launcher_command: Option<LauncherCommand>,

    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            channel_name: default_channel(),
            launcher_command: None,
            log_settings: LogSettings::default(),
        }
    }
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    /// Load from the user config directory, falling back to defaults.
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::load(settings_path))
    }

    /// Load from an explicit path, falling back to defaults.
    pub fn load(settings_path: PathBuf) -> Self {
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                if settings_path.exists() {
                    warn!("Ignoring unreadable settings file: {:#}", e);
                }
                Settings::default()
            }
        };

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("SettingsBridge");
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let settings = serde_json::from_str(&contents)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let service = SettingsService::load(dir.path().join("settings.json"));
        assert_eq!(service.get().channel_name, DEFAULT_CHANNEL);
        assert!(service.get().launcher_command.is_none());
        assert_eq!(service.get().log_settings.level, "info");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{"launcher_command":{"program":"xdg-open"},"log_settings":{"level":"debug"}}"#,
        )
        .unwrap();

        let service = SettingsService::load(path);
        let settings = service.get();
        assert_eq!(settings.channel_name, DEFAULT_CHANNEL);
        assert_eq!(
            settings.launcher_command,
            Some(LauncherCommand {
                program: "xdg-open".into(),
                args: vec![],
                detach: false,
            })
        );
        assert_eq!(settings.log_settings.level, "debug");
        assert_eq!(settings.log_settings.rotation, "daily");
        assert!(settings.log_settings.console);
        assert!(!settings.log_settings.file);
    }

    #[test]
    fn test_corrupt_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();
        let service = SettingsService::load(path);
        assert_eq!(service.get().channel_name, DEFAULT_CHANNEL);
    }

    #[test]
    fn test_save_then_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let mut service = SettingsService::load(path.clone());
        service.get_mut().channel_name = "custom/channel".into();
        service.save().unwrap();

        let reloaded = SettingsService::load(path);
        assert_eq!(reloaded.get().channel_name, "custom/channel");
    }
}
