//! Dispatch core: commands, replies, the dispatch table and host handlers.

pub mod command;
pub mod dispatcher;
pub mod handlers;
pub mod settings;
