//! One inbound JSON-RPC unit and its reply lifecycle.
//!
//! A [`PluginRequest`] resolves exactly once: Pending → Finished or
//! Pending → Failed. Synchronous handlers are finalized by the dispatcher;
//! asynchronous handlers keep the `Arc<PluginRequest>` and call
//! [`set_result`](PluginRequest::set_result) or
//! [`set_error`](PluginRequest::set_error) from whatever task completes the
//! work. A second finalization is a caught misuse error: it is logged and
//! reported to the caller, and no second reply reaches the wire.

use std::sync::{Mutex, PoisonError};

use serde_json::Value;
use tracing::warn;

use crate::error::{Error, Result};
use crate::outbox::Outbox;
use lnplug_rpc::{Message, RequestId, Response};

/// Lifecycle state of an inbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Pending,
    Finished,
    Failed,
}

/// An inbound call being dispatched, with its deferred reply channel.
#[derive(Debug)]
pub struct PluginRequest {
    id: Option<RequestId>,
    method: String,
    params: Value,
    asynchronous: bool,
    state: Mutex<RequestState>,
    outbox: Outbox,
}

impl PluginRequest {
    pub(crate) fn new(
        id: Option<RequestId>,
        method: String,
        params: Value,
        asynchronous: bool,
        outbox: Outbox,
    ) -> Self {
        Self {
            id,
            method,
            params,
            asynchronous,
            state: Mutex::new(RequestState::Pending),
            outbox,
        }
    }

    #[must_use]
    pub fn id(&self) -> Option<&RequestId> {
        self.id.as_ref()
    }

    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    #[must_use]
    pub fn params(&self) -> &Value {
        &self.params
    }

    /// Whether the dispatcher expects this request to be finalized by its
    /// handler instead of by the dispatch loop.
    #[must_use]
    pub fn is_asynchronous(&self) -> bool {
        self.asynchronous
    }

    #[must_use]
    pub fn state(&self) -> RequestState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Finalize with a success result, writing `{id, result}`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRequestId`] for notifications and
    /// [`Error::NotPending`] if the request was already finalized; neither
    /// produces a write.
    pub async fn set_result(&self, result: Value) -> Result<()> {
        let id = self.reply_id()?;
        self.transition(RequestState::Finished)?;
        self.outbox
            .send(Message::Response(Response::success(id, result)))
            .await
    }

    /// Finalize with a failure, writing
    /// `{id, error: "Error while processing <method>: <message>"}`.
    ///
    /// # Errors
    ///
    /// Same misuse conditions as [`set_result`](Self::set_result).
    pub async fn set_error(&self, message: impl Into<String>) -> Result<()> {
        let id = self.reply_id()?;
        self.transition(RequestState::Failed)?;
        let text = format!(
            "Error while processing {}: {}",
            self.method,
            message.into()
        );
        self.outbox
            .send(Message::Response(Response::failure(id, text)))
            .await
    }

    fn reply_id(&self) -> Result<RequestId> {
        self.id.clone().ok_or_else(|| {
            warn!(method = %self.method, "attempted to reply to a notification");
            Error::NoRequestId
        })
    }

    fn transition(&self, to: RequestState) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != RequestState::Pending {
            warn!(
                method = %self.method,
                id = ?self.id,
                state = ?*state,
                "request finalized more than once"
            );
            return Err(Error::NotPending {
                id: self.id.clone(),
                state: *state,
            });
        }
        *state = to;
        Ok(())
    }
}
