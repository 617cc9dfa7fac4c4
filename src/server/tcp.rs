//! Cache server endpoint: accepts client connections and serves region
//! operations over the framed wire protocol described in
//! [`crate::types::frame`].
//!
//! Each connection runs in its own task and processes its requests in
//! order. Loads triggered by a request run detached from the connection, so
//! a client that disconnects mid-request only loses its own response.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncRead, BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;

use super::{RequestHandler, ServerConfig};
use crate::error::CacheError;
use crate::region::RegionRegistry;
use crate::types::frame::{self, Encoding, Frame, MessageType};
use crate::types::{Request, Response};

/// Id used when a request frame is too broken to recover its own id.
const UNKNOWN_REQUEST_ID: &str = "0";

const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(10);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Pause before accepting again after `failures` consecutive accept errors.
fn accept_backoff(failures: u32) -> Duration {
  let doublings = failures.saturating_sub(1).min(16);
  ACCEPT_BACKOFF_MIN
    .saturating_mul(1u32 << doublings)
    .min(ACCEPT_BACKOFF_MAX)
}

/// Just enough of a request to answer it when full decoding fails.
#[derive(Deserialize)]
struct RequestEnvelope {
  #[serde(default)]
  id: Option<String>,
}

pub struct TcpServer {
  listener: TcpListener,
  local_addr: SocketAddr,
  registry: Arc<RegionRegistry>,
  config: ServerConfig,
}

impl TcpServer {
  /// Bind the listener. A port that is already in use is a `Bind` error.
  pub async fn bind(
    registry: Arc<RegionRegistry>,
    config: ServerConfig,
  ) -> Result<Self, CacheError> {
    let addr = config.address();
    let bind_error = |e: std::io::Error| CacheError::Bind {
      addr: addr.clone(),
      reason: e.to_string(),
    };
    let listener = TcpListener::bind(&addr).await.map_err(bind_error)?;
    let local_addr = listener.local_addr().map_err(bind_error)?;
    tracing::info!(
      "Cache server '{}' listening on {} (clients use {}:{})",
      config.server.name,
      local_addr,
      config.server.hostname_for_clients,
      local_addr.port()
    );

    Ok(Self {
      listener,
      local_addr,
      registry,
      config,
    })
  }

  pub fn local_addr(&self) -> SocketAddr {
    self.local_addr
  }

  /// Accept connections until a shutdown signal arrives, then let open
  /// connections finish their current request within the drain timeout.
  pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
    let handler = Arc::new(RequestHandler::new(self.registry.clone()));
    let (stop_tx, stop_rx) = watch::channel(false);
    let mut connections = JoinSet::new();
    let mut accept_failures = 0u32;

    loop {
      tokio::select! {
        accepted = self.listener.accept() => match accepted {
          Ok((stream, peer)) => {
            accept_failures = 0;
            tracing::debug!("TCP connection from {}", peer);
            let handler = handler.clone();
            let config = self.config.clone();
            let stop_rx = stop_rx.clone();
            connections.spawn(async move {
              if let Err(e) = handle_client(stream, handler, config, stop_rx).await {
                tracing::debug!("TCP client {} error: {}", peer, e);
              }
            });
          }
          Err(e) => {
            // Errors such as EMFILE persist; back off instead of spinning.
            accept_failures = accept_failures.saturating_add(1);
            let pause = accept_backoff(accept_failures);
            tracing::warn!(
              "Failed to accept connection ({} in a row), retrying in {:?}: {}",
              accept_failures,
              pause,
              e
            );
            tokio::time::sleep(pause).await;
          }
        },
        Some(joined) = connections.join_next(), if !connections.is_empty() => {
          if let Err(e) = joined {
            if e.is_panic() {
              tracing::error!("Connection task panicked: {}", e);
            }
          }
        }
        _ = shutdown_rx.recv() => {
          tracing::info!("Cache server shutting down, no longer accepting connections");
          break;
        }
      }
    }

    drop(self.listener);
    let _ = stop_tx.send(true);
    drain(&mut connections, self.config.limits.drain_timeout()).await;
  }
}

async fn drain(connections: &mut JoinSet<()>, timeout: Duration) {
  let open = connections.len();
  if open == 0 {
    return;
  }
  tracing::info!("Draining {} open connection(s)", open);
  let drained = tokio::time::timeout(timeout, async {
    while connections.join_next().await.is_some() {}
  })
  .await;
  if drained.is_err() {
    tracing::warn!(
      "Drain timeout after {:?}, aborting {} connection(s)",
      timeout,
      connections.len()
    );
    connections.abort_all();
    while connections.join_next().await.is_some() {}
  }
}

/// Next frame from the client, or `None` once it has been idle too long.
async fn read_next<R>(
  reader: &mut R,
  max_size: u32,
  idle_timeout: Option<Duration>,
) -> Result<Option<Frame>, anyhow::Error>
where
  R: AsyncRead + Unpin,
{
  match idle_timeout {
    Some(idle) => match tokio::time::timeout(idle, frame::read_frame(reader, max_size)).await {
      Ok(read) => read.map(Some),
      Err(_) => Ok(None),
    },
    None => frame::read_frame(reader, max_size).await.map(Some),
  }
}

fn is_disconnect(err: &anyhow::Error) -> bool {
  err
    .downcast_ref::<std::io::Error>()
    .is_some_and(|e| e.kind() == std::io::ErrorKind::UnexpectedEof)
}

/// Decode a request payload, or produce the error response for it.
fn decode_request(frame: &Frame) -> Result<Request, Response> {
  if frame.msg_type != MessageType::Request {
    return Err(Response::error(
      UNKNOWN_REQUEST_ID,
      &CacheError::BadRequest(format!("unexpected message type {:?}", frame.msg_type)),
    ));
  }

  frame::decode::<Request>(&frame.payload, frame.encoding).map_err(|e| {
    let id = frame::decode::<RequestEnvelope>(&frame.payload, frame.encoding)
      .ok()
      .and_then(|env| env.id)
      .unwrap_or_else(|| UNKNOWN_REQUEST_ID.to_string());
    Response::error(id, &CacheError::BadRequest(format!("Invalid message: {}", e)))
  })
}

async fn write_response<W>(
  writer: &mut W,
  resp: &Response,
  encoding: Encoding,
) -> Result<(), anyhow::Error>
where
  W: tokio::io::AsyncWrite + Unpin,
{
  let payload = frame::encode(resp, encoding)?;
  frame::write_frame(writer, MessageType::Response, encoding, &payload).await
}

/// Handle a single TCP client connection
async fn handle_client(
  mut stream: TcpStream,
  handler: Arc<RequestHandler>,
  config: ServerConfig,
  mut stop_rx: watch::Receiver<bool>,
) -> Result<(), anyhow::Error> {
  let idle_timeout = config.idle_timeout();
  let max_size = config.limits.max_message_size;
  let request_timeout = config.limits.request_timeout();

  let handshake = frame::accept_handshake(&mut stream);
  let (session_id, session_encoding) = match idle_timeout {
    Some(idle) => tokio::time::timeout(idle, handshake)
      .await
      .map_err(|_| anyhow::anyhow!("handshake timed out"))??,
    None => handshake.await?,
  };
  tracing::debug!(
    "TCP handshake complete: session={}, encoding={:?}",
    session_id,
    session_encoding
  );

  let (read_half, write_half) = stream.into_split();
  let mut reader = BufReader::new(read_half);
  let mut writer = BufWriter::new(write_half);

  loop {
    let read = tokio::select! {
      biased;
      _ = stop_rx.changed() => break,
      read = read_next(&mut reader, max_size, idle_timeout) => read,
    };

    let frame = match read {
      Ok(Some(frame)) => frame,
      Ok(None) => {
        tracing::debug!("Session {} idle for more than {:?}, closing", session_id, idle_timeout);
        break;
      }
      Err(e) if is_disconnect(&e) => break,
      Err(e) => {
        // The stream cannot be resynchronised; answer once, then close.
        tracing::warn!("Dropping session {}: {}", session_id, e);
        let resp = Response::error(UNKNOWN_REQUEST_ID, &CacheError::BadRequest(e.to_string()));
        let _ = write_response(&mut writer, &resp, session_encoding).await;
        break;
      }
    };

    let encoding = frame.encoding;
    let resp = match decode_request(&frame) {
      Ok(req) => {
        let id = req.id().to_string();
        match request_timeout {
          Some(timeout) => match tokio::time::timeout(timeout, handler.handle(req)).await {
            Ok(r) => r,
            Err(_) => {
              tracing::warn!("Request {} timed out in session {}", id, session_id);
              Response::error(id, &CacheError::Load("request timed out".into()))
            }
          },
          None => handler.handle(req).await,
        }
      }
      Err(resp) => {
        tracing::debug!("Rejected frame in session {}: {:?}", session_id, resp.error);
        resp
      }
    };

    if let Err(e) = write_response(&mut writer, &resp, encoding).await {
      tracing::debug!("Failed to write response {}: {}", resp.id, e);
      break;
    }
  }

  tracing::debug!("TCP client {} disconnected", session_id);
  Ok(())
}
