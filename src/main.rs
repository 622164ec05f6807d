use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use settings_bridge::domain::command::{CallError, OPEN_BLUETOOTH_SETTINGS};
use settings_bridge::domain::handlers::host_dispatcher;
use settings_bridge::domain::settings::SettingsService;
use settings_bridge::infrastructure::launcher::SystemSettingsLauncher;
use settings_bridge::infrastructure::local_socket::{LocalSocketHost, RemoteChannel};
use settings_bridge::infrastructure::logging::init_logger;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "settings-bridge", version, about = "Open system settings through a command channel")]
struct Cli {
    /// Channel name; overrides the settings file
    #[arg(long, global = true)]
    channel: Option<String>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Bind the channel and serve commands until interrupted
    Host,
    /// Send one command to a running host
    Call {
        name: String,
        /// JSON argument payload
        #[arg(long)]
        arguments: Option<String>,
    },
    /// Ask the host to open the Bluetooth settings screen
    OpenBluetooth,
    /// Write the current settings (defaults included) to the settings file
    InitConfig,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let settings_service = SettingsService::new()?;
    let settings = settings_service.get().clone();
    let _log_guard = init_logger(&settings.log_settings)?;

    let channel = cli.channel.unwrap_or(settings.channel_name);

    match cli.command {
        CliCommand::Host => {
            let launcher = SystemSettingsLauncher::from_settings(settings.launcher_command.as_ref());
            let dispatcher = Arc::new(host_dispatcher(Arc::new(launcher))?);
            let host = LocalSocketHost::bind(&channel, dispatcher)?;
            info!("Host ready on '{}'", host.channel());

            // The accept loop blocks; it lives on a plain thread so ctrl-c can end the process.
            let (done_tx, done_rx) = tokio::sync::oneshot::channel();
            std::thread::spawn(move || {
                let _ = done_tx.send(host.serve());
            });
            tokio::select! {
                res = done_rx => res.context("Host thread exited without a result")??,
                _ = tokio::signal::ctrl_c() => info!("Shutting down host"),
            }
            Ok(ExitCode::SUCCESS)
        }
        CliCommand::Call { name, arguments } => {
            let arguments = arguments
                .map(|raw| serde_json::from_str::<Value>(&raw))
                .transpose()
                .context("--arguments must be valid JSON")?;
            call(&channel, &name, arguments)
        }
        CliCommand::OpenBluetooth => call(&channel, OPEN_BLUETOOTH_SETTINGS, None),
        CliCommand::InitConfig => {
            settings_service.save()?;
            println!("{}", settings_service.path().display());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn call(channel: &str, name: &str, arguments: Option<Value>) -> Result<ExitCode> {
    let mut remote = RemoteChannel::connect(channel)?;
    match remote.invoke_method(name, arguments) {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(CallError::Failed { code, message, .. }) => {
            warn!(code = %code, "Command failed");
            eprintln!("{}: {}", code, message);
            Ok(ExitCode::from(1))
        }
        Err(CallError::NotImplemented { name }) => {
            eprintln!("Command '{}' is not implemented by the host", name);
            Ok(ExitCode::from(2))
        }
        Err(e @ CallError::Transport(_)) => Err(e.into()),
    }
}
