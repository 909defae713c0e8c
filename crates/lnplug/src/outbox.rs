//! The single serialized path onto the output stream.
//!
//! Responses, notifications, and log records all funnel through one framed
//! sink behind a mutex. The lock is held for the duration of one
//! write-and-flush, so frames from the main loop and from asynchronously
//! completing requests never interleave. No write path logs through the
//! outbox while holding the lock, which keeps the scheme deadlock-free.

use std::sync::Arc;

use futures_util::SinkExt;
use tokio::io::AsyncWrite;
use tokio::sync::Mutex;
use tokio_util::codec::FramedWrite;

use crate::error::Result;
use lnplug_rpc::transport::JsonRpcCodec;
use lnplug_rpc::Message;

type BoxedSink = FramedWrite<Box<dyn AsyncWrite + Send + Unpin>, JsonRpcCodec>;

/// Shared handle to the framed output stream.
#[derive(Clone)]
pub(crate) struct Outbox {
    sink: Arc<Mutex<BoxedSink>>,
}

impl Outbox {
    pub(crate) fn new(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        let boxed: Box<dyn AsyncWrite + Send + Unpin> = Box::new(writer);
        Self {
            sink: Arc::new(Mutex::new(FramedWrite::new(boxed, JsonRpcCodec::new()))),
        }
    }

    /// Frame and flush one message while holding the output lock.
    pub(crate) async fn send(&self, message: Message) -> Result<()> {
        let mut sink = self.sink.lock().await;
        sink.send(message).await?;
        Ok(())
    }
}

impl std::fmt::Debug for Outbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbox").finish_non_exhaustive()
    }
}
