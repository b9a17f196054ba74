// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! SPDK JSON-RPC 2.0 client.
//!
//! One connection is shared by all callers. Writes are serialized through a
//! mutex so frames never interleave; a single reader task matches replies to
//! callers by request id.
//!
//! Dropping an in-flight [`JsonRpcClient::invoke`] future stops the wait but
//! does not abort the request: SPDK still executes it.

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, warn};

use super::codec::JsonCodec;
use super::logging::LoggingStream;
use crate::domain::backend::BackendError;

type Reply = Result<Value, BackendError>;
type FrameSink = FramedWrite<Box<dyn AsyncWrite + Send + Unpin>, JsonCodec>;

#[derive(Default)]
struct PendingState {
    calls: HashMap<u64, oneshot::Sender<Reply>>,
    /// Set once the connection is unusable; every later call fails with it.
    closed: Option<String>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<PendingState>,
}

impl Shared {
    fn fail_all(&self, reason: &str) {
        let drained: Vec<_> = {
            let mut state = self.state.lock();
            if state.closed.is_none() {
                state.closed = Some(reason.to_string());
            }
            state.calls.drain().collect()
        };
        for (_, tx) in drained {
            let _ = tx.send(Err(BackendError::Closed(reason.to_string())));
        }
    }

    /// Route one decoded frame to its caller. A frame that is not a
    /// JSON-RPC response object with a numeric id poisons the connection.
    fn dispatch(&self, frame: Value) -> Result<(), String> {
        if !frame.is_object() {
            return Err(format!("frame is not a JSON-RPC response: {frame}"));
        }
        let response: Response = serde_json::from_value(frame)
            .map_err(|e| format!("frame is not a JSON-RPC response: {e}"))?;
        let Some(id) = response.id.as_ref().and_then(Value::as_u64) else {
            return Err(match &response.error {
                Some(payload) => format!("response without numeric id: {}", payload.describe()),
                None => format!("response without numeric id: {:?}", response.id),
            });
        };

        let Some(tx) = self.state.lock().calls.remove(&id) else {
            warn!(id, "Dropping response for unknown request id");
            return Ok(());
        };

        let reply = match response.error {
            Some(payload) => Err(payload.into_backend_error()),
            None => Ok(response.result.unwrap_or(Value::Null)),
        };
        // Receiver gone means the caller stopped waiting.
        let _ = tx.send(reply);
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct Response {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorPayload>,
}

/// SPDK reports errors either as `{code, message}` or as a bare string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorPayload {
    Structured {
        #[serde(default)]
        code: Option<i64>,
        #[serde(default)]
        message: Option<String>,
    },
    Text(String),
    Other(Value),
}

impl ErrorPayload {
    fn describe(&self) -> String {
        match self {
            Self::Structured { code, message } => format!(
                "{} ({})",
                message.as_deref().unwrap_or_default(),
                code.map_or_else(|| "no code".to_string(), |c| c.to_string())
            ),
            Self::Text(message) => message.clone(),
            Self::Other(value) => value.to_string(),
        }
    }

    fn into_backend_error(self) -> BackendError {
        match self {
            Self::Structured { code, message } => BackendError::Rpc {
                code,
                message: message.unwrap_or_default(),
            },
            Self::Text(message) => BackendError::Rpc { code: None, message },
            Self::Other(value) => BackendError::Rpc {
                code: None,
                message: value.to_string(),
            },
        }
    }
}

#[derive(Serialize)]
struct Request<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
    id: u64,
}

/// Removes the pending entry when the caller stops waiting.
struct PendingSlot<'a> {
    shared: &'a Shared,
    id: u64,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.shared.state.lock().calls.remove(&self.id);
    }
}

pub struct JsonRpcClient {
    shared: Arc<Shared>,
    writer: tokio::sync::Mutex<FrameSink>,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
}

impl JsonRpcClient {
    /// Connect to the SPDK Unix socket at `path`.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path)
            .await
            .map_err(|e| BackendError::Transport(format!("connect {}: {}", path.display(), e)))?;
        debug!("Connected to SPDK at {}", path.display());
        Ok(Self::new(stream))
    }

    /// Run the protocol over an already established byte stream.
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, write_half) = tokio::io::split(LoggingStream::new(stream));
        let shared = Arc::new(Shared::default());

        let frames = FramedRead::new(read_half, JsonCodec::new());
        let reader = tokio::spawn(read_loop(frames, shared.clone()));

        let sink: Box<dyn AsyncWrite + Send + Unpin> = Box::new(write_half);
        Self {
            shared,
            writer: tokio::sync::Mutex::new(FramedWrite::new(sink, JsonCodec::new())),
            next_id: AtomicU64::new(1),
            reader,
        }
    }

    /// Whether the connection has failed. A closed client never recovers.
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed.is_some()
    }

    /// Call `method` and decode its result.
    ///
    /// `params: None` omits the field entirely, which SPDK requires for
    /// methods that take no arguments; `Some(&Empty {})` sends `{}`.
    pub async fn invoke<P, R>(&self, method: &str, params: Option<&P>) -> Result<R, BackendError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = params
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| BackendError::InvalidRequest {
                method: method.to_string(),
                reason: e.to_string(),
            })?;

        let result = self.invoke_value(method, params).await?;
        serde_json::from_value(result).map_err(|e| BackendError::InvalidReply {
            method: method.to_string(),
            reason: e.to_string(),
        })
    }

    /// Call `method` with raw JSON params and return the raw result.
    pub async fn invoke_value(&self, method: &str, params: Option<Value>) -> Result<Value, BackendError> {
        metrics::counter!("oim_backend_requests_total", "method" => method.to_string()).increment(1);
        let reply = self.round_trip(method, params).await;
        if let Err(e) = &reply {
            metrics::counter!("oim_backend_errors_total", "method" => method.to_string()).increment(1);
            debug!(method, "Backend call failed: {}", e);
        }
        reply
    }

    async fn round_trip(&self, method: &str, params: Option<Value>) -> Reply {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.shared.state.lock();
            if let Some(reason) = &state.closed {
                return Err(BackendError::Closed(reason.clone()));
            }
            state.calls.insert(id, tx);
        }
        let _slot = PendingSlot {
            shared: &self.shared,
            id,
        };

        let request = Request {
            jsonrpc: "2.0",
            method,
            params,
            id,
        };
        debug!(id, method, "Sending backend request");

        let sent = {
            let mut writer = self.writer.lock().await;
            writer.send(&request).await
        };
        if let Err(e) = sent {
            let reason = format!("write failed: {e}");
            self.shared.fail_all(&reason);
            return Err(BackendError::Transport(reason));
        }

        match rx.await {
            Ok(reply) => reply,
            Err(_) => Err(BackendError::Closed("reply channel dropped".to_string())),
        }
    }
}

impl Drop for JsonRpcClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop<R>(mut frames: FramedRead<R, JsonCodec>, shared: Arc<Shared>)
where
    R: AsyncRead + Unpin,
{
    let reason = loop {
        match frames.next().await {
            Some(Ok(frame)) => {
                if let Err(reason) = shared.dispatch(frame) {
                    error!("Backend sent an unusable frame: {}", reason);
                    break reason;
                }
            }
            Some(Err(e)) => {
                error!("Backend connection failed: {}", e);
                break e.to_string();
            }
            None => {
                debug!("Backend closed the connection");
                break "connection closed by backend".to_string();
            }
        }
    };
    shared.fail_all(&reason);
}
