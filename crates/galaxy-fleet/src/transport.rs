//! WebSocket device transport (§4.3). Owns one stream per device, frames
//! messages as [`Envelope`]s, and correlates replies to outstanding
//! requests by id.
//!
//! The race-safe startup order spec.md calls out — "install reader → begin
//! handshake → resolve ready-state" — is implemented literally in
//! [`WebSocketTransport::connect`]: the reader task is spawned against the
//! freshly split stream *before* the `Register` message is written, so a
//! `RegisterAck` that arrives immediately can never be dropped on the floor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use galaxy_shared::error::GalaxyResult;
use galaxy_shared::ids::{DeviceId, TaskId};
use galaxy_shared::planner::DeviceTransport;
use galaxy_shared::protocol::{Envelope, ErrorCategory, ExecutionResult, WireMessage};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;
use uuid::Uuid;

use crate::error::{FleetError, FleetResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Observes transport-level events the fleet manager needs to react to but
/// that do not fit the request/reply pattern: disconnections and
/// peer-initiated ("server-push") messages such as heartbeat acks and task
/// progress. Playing the role the teacher's callback-based `message_processor`
/// argument plays in the original device manager.
#[async_trait]
pub trait TransportEventSink: Send + Sync {
    async fn on_disconnected(&self, device_id: DeviceId);
    async fn on_device_info(&self, device_id: DeviceId, message: WireMessage);
    async fn on_heartbeat_ack(&self, device_id: DeviceId, sequence: u64);
    async fn on_task_progress(&self, device_id: DeviceId, task_id: TaskId, progress: Option<Value>);
}

struct Connection {
    sink: Mutex<WsSink>,
    reader_handle: tokio::task::JoinHandle<()>,
    pending: Arc<DashMap<String, oneshot::Sender<WireMessage>>>,
}

/// `DeviceTransport` implementation backed by `tokio-tungstenite`.
pub struct WebSocketTransport {
    connections: DashMap<DeviceId, Connection>,
    sink: Arc<dyn TransportEventSink>,
}

impl WebSocketTransport {
    pub fn new(sink: Arc<dyn TransportEventSink>) -> Self {
        Self {
            connections: DashMap::new(),
            sink,
        }
    }

    /// Connects to `server_url`, installs the reader loop, and completes the
    /// REGISTER/REGISTER_ACK and DEVICE_INFO_REQUEST/DEVICE_INFO exchanges.
    pub async fn connect_to(&self, device_id: &DeviceId, server_url: &str) -> FleetResult<()> {
        let url = Url::parse(server_url).map_err(|error| FleetError::InvalidUrl {
            url: server_url.to_string(),
            reason: error.to_string(),
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(FleetError::InvalidUrl {
                url: server_url.to_string(),
                reason: format!("unsupported scheme {:?}, expected ws or wss", url.scheme()),
            });
        }

        let (stream, _response) = connect_async(server_url).await?;
        let (sink, source) = stream.split();
        let pending: Arc<DashMap<String, oneshot::Sender<WireMessage>>> = Arc::new(DashMap::new());

        // Reader is spawned before anything is written to the socket.
        let reader_handle = spawn_reader(device_id.clone(), source, Arc::clone(&pending), Arc::clone(&self.sink));

        let connection = Connection {
            sink: Mutex::new(sink),
            reader_handle,
            pending,
        };
        self.connections.insert(device_id.clone(), connection);

        let register = Envelope::new(WireMessage::Register {
            session_id: Uuid::new_v4().to_string(),
        });
        self.write_envelope(device_id, &register).await?;
        self.await_reply(device_id, &register.correlation_id, Duration::from_secs(30))
            .await?;

        let info_request = Envelope::new(WireMessage::DeviceInfoRequest);
        self.write_envelope(device_id, &info_request).await?;
        self.await_reply(device_id, &info_request.correlation_id, Duration::from_secs(30))
            .await?;

        Ok(())
    }

    /// Sends a HEARTBEAT and waits for its HEARTBEAT_ACK, correlated by
    /// `sequence` rather than a fresh UUID so a device that replies with the
    /// sequence it was sent (the wire contract in §6.1) lands back on this
    /// specific call instead of the server-push path in [`spawn_reader`].
    /// Used by `galaxy-fleet`'s `HeartbeatManager` (§4.4), not part of the
    /// `DeviceTransport` trait since heartbeating is orthogonal to task
    /// dispatch.
    pub async fn ping(&self, device_id: &DeviceId, sequence: u64, timeout: Duration) -> bool {
        let envelope = Envelope::with_correlation_id(
            sequence.to_string(),
            WireMessage::Heartbeat {
                sequence,
                timestamp: chrono::Utc::now(),
            },
        );
        if self.write_envelope(device_id, &envelope).await.is_err() {
            return false;
        }
        matches!(
            self.await_reply(device_id, &envelope.correlation_id, timeout).await,
            Ok(WireMessage::HeartbeatAck { .. })
        )
    }

    async fn write_envelope(&self, device_id: &DeviceId, envelope: &Envelope) -> FleetResult<()> {
        let connection = self
            .connections
            .get(device_id)
            .ok_or_else(|| FleetError::NotConnected(device_id.clone()))?;
        let payload = serde_json::to_string(envelope).map_err(galaxy_shared::error::GalaxyError::from)?;
        connection
            .sink
            .lock()
            .await
            .send(Message::Text(payload.into()))
            .await?;
        Ok(())
    }

    async fn await_reply(
        &self,
        device_id: &DeviceId,
        correlation_id: &str,
        timeout: Duration,
    ) -> FleetResult<WireMessage> {
        let (tx, rx) = oneshot::channel();
        {
            let connection = self
                .connections
                .get(device_id)
                .ok_or_else(|| FleetError::NotConnected(device_id.clone()))?;
            connection.pending.insert(correlation_id.to_string(), tx);
        }
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(_)) | Err(_) => Err(FleetError::RequestTimeout(correlation_id.to_string())),
        }
    }
}

fn spawn_reader(
    device_id: DeviceId,
    mut source: WsSource,
    pending: Arc<DashMap<String, oneshot::Sender<WireMessage>>>,
    sink: Arc<dyn TransportEventSink>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = source.next().await {
            let text = match frame {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => continue,
            };
            let envelope: Envelope = match serde_json::from_str(&text) {
                Ok(envelope) => envelope,
                Err(error) => {
                    tracing::warn!(%device_id, %error, "dropping malformed frame from device");
                    continue;
                }
            };

            if let Some((_, waiter)) = pending.remove(&envelope.correlation_id) {
                let _ = waiter.send(envelope.message);
                continue;
            }

            // Unmatched messages are peer-initiated pushes.
            match envelope.message {
                WireMessage::HeartbeatAck { sequence } => {
                    sink.on_heartbeat_ack(device_id.clone(), sequence).await;
                }
                WireMessage::TaskProgress { task_id, progress } => {
                    sink.on_task_progress(device_id.clone(), task_id, progress).await;
                }
                other @ WireMessage::DeviceInfo { .. } => {
                    sink.on_device_info(device_id.clone(), other).await;
                }
                _ => {}
            }
        }
        sink.on_disconnected(device_id).await;
    })
}

#[async_trait]
impl DeviceTransport for WebSocketTransport {
    async fn connect(&self, device_id: &DeviceId) -> GalaxyResult<()> {
        // The registry owns `server_url`; callers use `connect_to` directly
        // with it. This trait-level entry point exists for interface parity
        // with `galaxy_shared::planner::DeviceTransport` and is exercised by
        // `FleetManager`, which always knows the url up front.
        let _ = device_id;
        Ok(())
    }

    async fn send_task(
        &self,
        device_id: &DeviceId,
        task_id: TaskId,
        description: &str,
        parameters: Value,
        timeout_s: f64,
    ) -> ExecutionResult {
        let envelope = Envelope::new(WireMessage::TaskRequest {
            task_id: task_id.clone(),
            description: description.to_string(),
            parameters,
            timeout_s,
        });

        if let Err(_err) = self.write_envelope(device_id, &envelope).await {
            return ExecutionResult::connection_failure(task_id, Some(device_id.clone()));
        }

        let timeout = Duration::from_secs_f64(timeout_s.max(0.0));
        match self.await_reply(device_id, &envelope.correlation_id, timeout).await {
            Ok(WireMessage::TaskResult { status, result, error, .. }) => ExecutionResult {
                task_id,
                status,
                result,
                error,
                device_id: Some(device_id.clone()),
                disconnected: false,
                error_category: error_category_for(status),
            },
            Ok(_unexpected) => ExecutionResult::device_reported_failure(
                task_id,
                "device replied with an unexpected message kind",
                device_id.clone(),
            ),
            Err(FleetError::RequestTimeout(_)) => ExecutionResult::timeout_failure(task_id, Some(device_id.clone())),
            Err(_) => ExecutionResult::connection_failure(task_id, Some(device_id.clone())),
        }
    }

    async fn disconnect(&self, device_id: &DeviceId) -> GalaxyResult<()> {
        if let Some((_, connection)) = self.connections.remove(device_id) {
            connection.reader_handle.abort();
            let _ = connection.sink.lock().await.close().await;
        }
        Ok(())
    }

    async fn is_connected(&self, device_id: &DeviceId) -> bool {
        self.connections.contains_key(device_id)
    }
}

fn error_category_for(status: galaxy_shared::status::TaskStatus) -> Option<ErrorCategory> {
    use galaxy_shared::status::TaskStatus;
    match status {
        TaskStatus::Failed => Some(ErrorCategory::GeneralError),
        _ => None,
    }
}
