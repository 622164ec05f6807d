//! Channel transports, the platform settings launcher and logging setup.

pub mod channel;
pub mod launcher;
pub mod local_socket;
pub mod logging;
