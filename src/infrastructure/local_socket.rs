//! Cross-process method channel over a named local socket.
//!
//! Frames are newline-terminated JSON: a [`Command`] per request line and a
//! [`Reply`] per response line. Every request line gets exactly one reply
//! line, including lines that fail to decode.

use crate::domain::command::{
    CallError, Command, Reply, MALFORMED_CALL_CODE, OPEN_BLUETOOTH_SETTINGS,
};
use crate::domain::dispatcher::Dispatcher;
use crate::infrastructure::channel::ChannelBinding;
use anyhow::{Context, Result};
use interprocess::local_socket::{
    traits::{ListenerExt, Stream as _},
    GenericFilePath, GenericNamespaced, ListenerOptions, Name, NameType, Stream as LocalStream,
    ToFsName, ToNsName,
};
use interprocess::TryClone;
use serde_json::Value;
use std::io::{self, BufRead, BufReader, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Socket name for a logical channel name. `/` is not allowed in namespaced
/// names, so it is mapped to `.`.
pub fn socket_name(channel: &str) -> io::Result<Name<'static>> {
    let flat = channel.replace('/', ".");
    if GenericNamespaced::is_supported() {
        format!("{}.sock", flat).to_ns_name::<GenericNamespaced>()
    } else {
        std::env::temp_dir()
            .join(format!("{}.sock", flat))
            .to_string_lossy()
            .into_owned()
            .to_fs_name::<GenericFilePath>()
    }
}

/// Decode one request frame and dispatch it. Bytes that are not UTF-8 JSON
/// are a decode error like any other.
pub fn handle_frame(dispatcher: &Dispatcher, frame: &[u8]) -> Reply {
    match serde_json::from_slice::<Command>(frame) {
        Ok(command) => dispatcher.dispatch(command),
        Err(e) => {
            warn!("Malformed call frame: {}", e);
            Reply::failure(MALFORMED_CALL_CODE, format!("Malformed call: {}", e))
        }
    }
}

/// Serve frames from `reader` until EOF, writing one reply per request.
pub fn serve_connection<R, W>(
    mut reader: R,
    mut writer: W,
    dispatcher: &Dispatcher,
) -> io::Result<()>
where
    R: BufRead,
    W: Write,
{
    let mut buffer = Vec::new();
    loop {
        buffer.clear();
        if reader.read_until(b'\n', &mut buffer)? == 0 {
            break; // EOF
        }
        let frame = buffer.trim_ascii();
        if frame.is_empty() {
            continue;
        }

        let reply = handle_frame(dispatcher, frame);
        let json = serde_json::to_string(&reply)? + "\n";
        writer.write_all(json.as_bytes())?;
        writer.flush()?;
    }
    Ok(())
}

/// Dispatcher side of a local-socket channel.
pub struct LocalSocketHost {
    binding: ChannelBinding,
    listener: interprocess::local_socket::Listener,
    dispatcher: Arc<Dispatcher>,
}

impl LocalSocketHost {
    pub fn bind(channel: &str, dispatcher: Arc<Dispatcher>) -> Result<Self> {
        let binding = ChannelBinding::acquire(channel)?;
        let name = socket_name(channel).context("Invalid socket name")?;
        let listener = ListenerOptions::new()
            .name(name)
            .create_sync()
            .with_context(|| format!("Failed to listen on channel '{}'", channel))?;

        info!(channel, "Listening on local socket");
        Ok(Self {
            binding,
            listener,
            dispatcher,
        })
    }

    pub fn channel(&self) -> &str {
        self.binding.name()
    }

    /// Accept clients until the process exits. One thread per client.
    pub fn serve(self) -> Result<()> {
        for conn in self.listener.incoming() {
            let stream = match conn {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Failed to accept client: {}", e);
                    continue;
                }
            };

            info!(channel = %self.binding.name(), "Client connected");
            let dispatcher = self.dispatcher.clone();
            std::thread::spawn(move || {
                if let Err(e) = handle_connection(stream, &dispatcher) {
                    error!("Connection error: {}", e);
                }
                debug!("Client disconnected");
            });
        }
        Ok(())
    }
}

fn handle_connection(stream: LocalStream, dispatcher: &Dispatcher) -> io::Result<()> {
    let reader = BufReader::new(stream.try_clone()?);
    serve_connection(reader, stream, dispatcher)
}

/// Caller side of a local-socket channel.
pub struct RemoteChannel {
    reader: BufReader<LocalStream>,
    writer: LocalStream,
}

impl RemoteChannel {
    pub fn connect(channel: &str) -> Result<Self, CallError> {
        let name = socket_name(channel).map_err(CallError::transport)?;
        let stream = LocalStream::connect(name).map_err(|e| {
            CallError::Transport(format!("no host on channel '{}': {}", channel, e))
        })?;
        let reader = BufReader::new(stream.try_clone().map_err(CallError::transport)?);
        debug!(channel, "Connected to host");
        Ok(Self {
            reader,
            writer: stream,
        })
    }

    /// Poll until a host is listening on `channel` or `timeout` elapses.
    pub fn wait_for_host(channel: &str, timeout: Duration) -> Result<Self, CallError> {
        let start = Instant::now();
        loop {
            match Self::connect(channel) {
                Ok(remote) => return Ok(remote),
                Err(e) if start.elapsed() >= timeout => return Err(e),
                Err(_) => std::thread::sleep(Duration::from_millis(50)),
            }
        }
    }

    /// Send a command and await its raw reply.
    pub fn invoke(&mut self, command: &Command) -> Result<Reply, CallError> {
        let frame = serde_json::to_string(command).map_err(CallError::transport)? + "\n";
        self.writer
            .write_all(frame.as_bytes())
            .and_then(|()| self.writer.flush())
            .map_err(CallError::transport)?;

        let mut buffer = String::new();
        let read = self
            .reader
            .read_line(&mut buffer)
            .map_err(CallError::transport)?;
        if read == 0 {
            return Err(CallError::transport("host closed the connection"));
        }
        serde_json::from_str(&buffer).map_err(CallError::transport)
    }

    pub fn invoke_method(
        &mut self,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<Value, CallError> {
        let command = Command {
            name: name.to_string(),
            arguments,
        };
        self.invoke(&command)?.into_result(name)
    }

    pub fn open_bluetooth_settings(&mut self) -> Result<(), CallError> {
        self.invoke_method(OPEN_BLUETOOTH_SETTINGS, None).map(|_| ())
    }
}
