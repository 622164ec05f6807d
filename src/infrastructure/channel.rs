//! In-process method channel.
//!
//! A [`ChannelHost`] owns the dispatcher side of a named channel and drains
//! calls on a tokio task. [`MethodChannel`] is the caller side: each call
//! suspends on a oneshot receiver until its single reply arrives.

use crate::domain::command::{CallError, Command, Reply, ERROR_CODE, OPEN_BLUETOOTH_SETTINGS};
use crate::domain::dispatcher::Dispatcher;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BindError {
    #[error("channel name must not be empty")]
    EmptyName,

    #[error("channel '{0}' is already bound in this process")]
    AlreadyBound(String),
}

fn bound_channels() -> &'static Mutex<HashSet<String>> {
    static BOUND: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    BOUND.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Process-wide claim on a channel name. Released on drop.
#[derive(Debug)]
pub struct ChannelBinding {
    name: String,
}

impl ChannelBinding {
    pub fn acquire(name: &str) -> Result<Self, BindError> {
        if name.is_empty() {
            return Err(BindError::EmptyName);
        }
        // A poisoned set is still a valid set of names.
        let mut bound = bound_channels()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !bound.insert(name.to_string()) {
            return Err(BindError::AlreadyBound(name.to_string()));
        }
        debug!(channel = name, "Channel bound");
        Ok(Self {
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for ChannelBinding {
    fn drop(&mut self) {
        let mut bound = bound_channels()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        bound.remove(&self.name);
        debug!(channel = %self.name, "Channel released");
    }
}

struct Call {
    command: Command,
    reply: oneshot::Sender<Reply>,
}

/// Caller-side endpoint. Cheap to clone; clones share no call state.
#[derive(Clone)]
pub struct MethodChannel {
    name: String,
    sender: mpsc::UnboundedSender<Call>,
}

impl MethodChannel {
    /// Submit a command and wait for its raw reply.
    pub async fn invoke(&self, command: Command) -> Result<Reply, CallError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(Call { command, reply: tx })
            .map_err(|_| CallError::Transport(format!("channel '{}' is closed", self.name)))?;
        rx.await
            .map_err(|_| CallError::transport("host dropped the call without replying"))
    }

    /// Submit a command and interpret the reply.
    pub async fn invoke_method(
        &self,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<Value, CallError> {
        let command = Command {
            name: name.to_string(),
            arguments,
        };
        self.invoke(command).await?.into_result(name)
    }

    pub async fn open_bluetooth_settings(&self) -> Result<(), CallError> {
        self.invoke_method(OPEN_BLUETOOTH_SETTINGS, None)
            .await
            .map(|_| ())
    }
}

/// Dispatcher-side endpoint. Stops serving when dropped.
pub struct ChannelHost {
    binding: ChannelBinding,
    task: JoinHandle<()>,
}

impl ChannelHost {
    /// Bind `name` and start serving. Must be called inside a tokio runtime.
    pub fn bind(
        name: &str,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<(Self, MethodChannel), BindError> {
        let binding = ChannelBinding::acquire(name)?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(serve(name.to_string(), receiver, dispatcher));
        info!(channel = name, "In-process channel host started");

        let channel = MethodChannel {
            name: name.to_string(),
            sender,
        };
        Ok((Self { binding, task }, channel))
    }
}

impl Drop for ChannelHost {
    fn drop(&mut self) {
        self.task.abort();
        info!(channel = %self.binding.name(), "In-process channel host stopped");
    }
}

async fn serve(
    name: String,
    mut receiver: mpsc::UnboundedReceiver<Call>,
    dispatcher: Arc<Dispatcher>,
) {
    while let Some(Call { command, reply }) = receiver.recv().await {
        debug!(channel = %name, command = %command.name, "Received call");
        // Handlers may block on OS calls; keep them off the async workers.
        let dispatcher = dispatcher.clone();
        let outcome = tokio::task::spawn_blocking(move || dispatcher.dispatch(command))
            .await
            .unwrap_or_else(|e| {
                Reply::failure(ERROR_CODE, format!("Dispatch task did not complete: {}", e))
            });
        if reply.send(outcome).is_err() {
            debug!(channel = %name, "Caller went away before the reply");
        }
    }
    debug!(channel = %name, "All callers dropped");
}
