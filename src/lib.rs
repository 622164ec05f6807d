//! Command bridge between a UI-layer caller and a host-side dispatcher.
//!
//! ```text
//! Caller ──► channel ──► Dispatcher ──► Handler ──► SettingsLauncher
//!   ▲                        │
//!   └──────── Reply ◄────────┘
//! ```

pub mod domain;
pub mod infrastructure;

pub use domain::command::{CallError, Command, Reply};
pub use domain::dispatcher::{DispatchTable, Dispatcher, Handler, HandlerError};
pub use domain::handlers::{LaunchError, SettingsLauncher};
pub use infrastructure::channel::{ChannelHost, MethodChannel};
pub use infrastructure::local_socket::{LocalSocketHost, RemoteChannel};
