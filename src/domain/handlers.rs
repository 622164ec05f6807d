//! Host command handlers.

use crate::domain::command::OPEN_BLUETOOTH_SETTINGS;
use crate::domain::dispatcher::{DispatchTable, Dispatcher, HandlerError, TableError};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Failure reported by the platform when a settings screen can't be shown.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The platform refused or failed the request. Carries its description.
    #[error("{0}")]
    Rejected(String),

    #[error("{program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Performs the OS-level "show Bluetooth settings" action.
pub trait SettingsLauncher: Send + Sync {
    fn open_bluetooth_settings(&self) -> Result<(), LaunchError>;
}

pub fn open_bluetooth_settings(launcher: &dyn SettingsLauncher) -> Result<Value, HandlerError> {
    info!("Opening Bluetooth settings");
    launcher
        .open_bluetooth_settings()
        .map(|()| Value::Null)
        .map_err(|e| HandlerError::error(format!("Failed to open Bluetooth settings: {}", e)))
}

/// The host's dispatch table.
pub fn dispatch_table(launcher: Arc<dyn SettingsLauncher>) -> Result<DispatchTable, TableError> {
    Ok(DispatchTable::builder()
        .register_fn(OPEN_BLUETOOTH_SETTINGS, move |_| {
            open_bluetooth_settings(launcher.as_ref())
        })?
        .build())
}

pub fn host_dispatcher(launcher: Arc<dyn SettingsLauncher>) -> Result<Dispatcher, TableError> {
    dispatch_table(launcher).map(Dispatcher::new)
}
