use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::types::frame::{self, Encoding, MessageType, DEFAULT_MAX_MESSAGE_SIZE};
use crate::types::{Request, Response};

/// Waiting requests by id; `None` once the connection is gone.
type Pending = Arc<Mutex<Option<HashMap<String, oneshot::Sender<Response>>>>>;

/// Client connection to a cache server.
///
/// Requests may be issued concurrently from several tasks; they are
/// pipelined over one connection and matched to responses by id.
pub struct CacheClient {
  tx: mpsc::UnboundedSender<(Request, oneshot::Sender<Response>)>,
  session_id: Uuid,
  encoding: Encoding,
  reader: JoinHandle<()>,
}

impl CacheClient {
  pub async fn connect(addr: &str) -> Result<Self, anyhow::Error> {
    Self::connect_with(addr, Encoding::default()).await
  }

  pub async fn connect_with(addr: &str, encoding: Encoding) -> Result<Self, anyhow::Error> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    let session_id = frame::initiate_handshake(&mut stream, encoding).await?;
    tracing::debug!("Connected to {} (session {})", addr, session_id);

    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut writer = BufWriter::new(write_half);

    let (req_tx, mut req_rx) = mpsc::unbounded_channel::<(Request, oneshot::Sender<Response>)>();
    let pending: Pending = Arc::new(Mutex::new(Some(HashMap::new())));

    let pending2 = pending.clone();
    tokio::spawn(async move {
      while let Some((req, resp_tx)) = req_rx.recv().await {
        let payload = match frame::encode(&req, encoding) {
          Ok(p) => p,
          Err(e) => {
            tracing::warn!("Failed to encode request {}: {}", req.id(), e);
            continue;
          }
        };
        match pending2.lock().await.as_mut() {
          Some(waiting) => {
            waiting.insert(req.id().to_string(), resp_tx);
          }
          None => break,
        }
        if frame::write_frame(&mut writer, MessageType::Request, encoding, &payload)
          .await
          .is_err()
        {
          break;
        }
      }
    });

    let reader = tokio::spawn(async move {
      while let Ok(f) = frame::read_frame(&mut reader, DEFAULT_MAX_MESSAGE_SIZE).await {
        let resp = match frame::decode::<Response>(&f.payload, f.encoding) {
          Ok(resp) => resp,
          Err(e) => {
            tracing::warn!("Undecodable response: {}", e);
            continue;
          }
        };
        let waiter = pending
          .lock()
          .await
          .as_mut()
          .and_then(|waiting| waiting.remove(&resp.id));
        match waiter {
          Some(tx) => {
            let _ = tx.send(resp);
          }
          None => tracing::debug!("Unmatched response {}: {:?}", resp.id, resp.error),
        }
      }
      // Dropping the senders fails every request still waiting.
      pending.lock().await.take();
    });

    Ok(Self {
      tx: req_tx,
      session_id,
      encoding,
      reader,
    })
  }

  pub fn session_id(&self) -> Uuid {
    self.session_id
  }

  pub fn encoding(&self) -> Encoding {
    self.encoding
  }

  pub async fn send(&self, req: Request) -> Result<Response, anyhow::Error> {
    let (tx, rx) = oneshot::channel();
    self
      .tx
      .send((req, tx))
      .map_err(|_| anyhow::anyhow!("connection closed"))?;
    rx.await.map_err(|_| anyhow::anyhow!("connection closed"))
  }

  pub async fn get(&self, region: &str, key: impl Into<Value>) -> Result<Response, anyhow::Error> {
    self
      .send(Request::Get {
        id: next_id(),
        region: region.into(),
        key: key.into(),
      })
      .await
  }

  pub async fn put(
    &self,
    region: &str,
    key: impl Into<Value>,
    value: impl Into<Value>,
  ) -> Result<Response, anyhow::Error> {
    self
      .send(Request::Put {
        id: next_id(),
        region: region.into(),
        key: key.into(),
        value: Some(value.into()),
      })
      .await
  }

  pub async fn remove(&self, region: &str, key: impl Into<Value>) -> Result<Response, anyhow::Error> {
    self
      .send(Request::Remove {
        id: next_id(),
        region: region.into(),
        key: key.into(),
      })
      .await
  }

  pub async fn contains_key(
    &self,
    region: &str,
    key: impl Into<Value>,
  ) -> Result<Response, anyhow::Error> {
    self
      .send(Request::ContainsKey {
        id: next_id(),
        region: region.into(),
        key: key.into(),
      })
      .await
  }

  pub async fn ping(&self) -> Result<Response, anyhow::Error> {
    self.send(Request::Ping { id: next_id() }).await
  }
}

impl Drop for CacheClient {
  fn drop(&mut self) {
    self.reader.abort();
  }
}

fn next_id() -> String {
  Uuid::new_v4().to_string()
}
