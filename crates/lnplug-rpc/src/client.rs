//! RPC client for the node's Unix socket.
//!
//! Once the host has delivered the `init` call, a plugin knows where the
//! node's JSON-RPC socket lives and can issue calls of its own. The client
//! connects lazily on first use and reconnects on the next call after an
//! I/O failure; it deliberately has no timeout or retry machinery.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tokio_util::codec::Framed;
use tracing::{debug, trace};

use crate::protocol::{Message, NodeError, Request, RequestId, Response};
use crate::transport::{CodecError, Frame, JsonRpcCodec};

/// Errors that can occur with the node RPC client
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Unexpected response type")]
    UnexpectedResponse,
}

type Conn = Framed<UnixStream, JsonRpcCodec>;

struct Inner {
    path: PathBuf,
    next_id: AtomicU64,
    conn: Mutex<Option<Conn>>,
}

/// Handle to the node's JSON-RPC socket.
///
/// Cheap to clone; clones share one connection. Calls are serialized on the
/// connection lock, matching the one-outstanding-call protocol of the node
/// socket.
#[derive(Clone)]
pub struct NodeRpc {
    inner: Arc<Inner>,
}

impl NodeRpc {
    /// Create a client for the socket at `path` without connecting.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Inner {
                path: path.into(),
                next_id: AtomicU64::new(1),
                conn: Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.inner.path
    }

    /// Call `method` and deserialize the `result` member.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails, the node returns an error
    /// object, or the result does not deserialize as `T`.
    pub async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, ClientError> {
        let result = self.call_raw(method, params).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Call `method` and return the raw `result` value.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails or the node returns an
    /// error object.
    pub async fn call_raw(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ClientError> {
        let id = RequestId::Number(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let request = Request::new(method, Some(params), id.clone());

        let mut conn = self.inner.conn.lock().await;

        if conn.is_none() {
            debug!(path = %self.inner.path.display(), "connecting to node socket");
            let stream = UnixStream::connect(&self.inner.path).await?;
            *conn = Some(Framed::new(stream, JsonRpcCodec::new()));
        }

        let Some(active) = conn.as_mut() else {
            return Err(ClientError::ConnectionClosed);
        };

        match Self::exchange(active, request, &id).await {
            Ok(response) => Self::unpack(response),
            Err(e) => {
                // Drop the broken connection; the next call reconnects.
                *conn = None;
                Err(e)
            }
        }
    }

    async fn exchange(
        conn: &mut Conn,
        request: Request,
        id: &RequestId,
    ) -> Result<Response, ClientError> {
        conn.send(Message::Request(request)).await?;

        while let Some(frame) = conn.next().await {
            match frame? {
                Frame::Message(Message::Response(resp)) if resp.id == *id => return Ok(resp),
                Frame::Message(msg) => {
                    // Stale replies or node-side notifications; not ours.
                    trace!(?msg, "skipping unrelated message on node socket");
                }
                Frame::Invalid(e) => return Err(ClientError::Json(e)),
            }
        }

        Err(ClientError::ConnectionClosed)
    }

    fn unpack(response: Response) -> Result<serde_json::Value, ClientError> {
        if let Some(error) = response.error {
            let node_err: NodeError = serde_json::from_value(error)?;
            return Err(node_err.into());
        }
        response.result.ok_or(ClientError::UnexpectedResponse)
    }
}

impl std::fmt::Debug for NodeRpc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRpc")
            .field("path", &self.inner.path)
            .finish_non_exhaustive()
    }
}
