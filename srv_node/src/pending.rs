use std::{
    future::Future,
    marker::PhantomData,
    pin::Pin,
    task::{Context, Poll},
};

use futures::future::FusedFuture;
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;
use tracing::debug;

use crate::{Error, Reply};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Pending,
    /// A response arrived and decoded.
    Completed,
    /// A reply arrived but carried a service failure, a foreign id or an
    /// undecodable response.
    Failed,
    Cancelled,
}

/// Handle to one sent request.
///
/// Awaiting the handle yields the response, or [`Error::Cancelled`] when the
/// reply path was dropped before an answer arrived (responder shutdown, lost
/// connection, explicit [`PendingCall::cancel`]). A reply that does not yield
/// a response leaves the call [`CallState::Failed`]. The state moves out of
/// [`CallState::Pending`] exactly once; polling afterwards returns
/// [`Error::AlreadyResolved`].
#[must_use = "a pending call does nothing unless awaited"]
pub struct PendingCall<T> {
    id: u64,
    service: String,
    response: oneshot::Receiver<Reply>,
    state: CallState,
    _response: PhantomData<fn() -> T>,
}

impl<T> PendingCall<T> {
    pub(crate) fn new(id: u64, service: String, response: oneshot::Receiver<Reply>) -> Self {
        Self {
            id,
            service,
            response,
            state: CallState::Pending,
            _response: PhantomData,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    /// Resolves the call to [`CallState::Cancelled`] if it is still pending.
    /// A response arriving afterwards is discarded.
    pub fn cancel(&mut self) {
        if self.state == CallState::Pending {
            self.response.close();
            self.state = CallState::Cancelled;
            debug!(id = self.id, service = %self.service, "call cancelled");
        }
    }

    fn cancelled(&self) -> Error {
        Error::Cancelled {
            service: self.service.clone(),
            id: self.id,
        }
    }
}

impl<T: DeserializeOwned> PendingCall<T> {
    /// Awaits the response unless `signal` completes first, in which case the
    /// call is cancelled.
    pub async fn cancel_on(mut self, signal: impl Future<Output = ()>) -> Result<T, Error> {
        tokio::select! {
            biased;
            result = &mut self => result,
            () = signal => {
                self.cancel();
                Err(self.cancelled())
            }
        }
    }

    fn complete(&mut self, reply: Reply) -> Result<T, Error> {
        let result = self.decode(reply);
        self.state = match &result {
            Ok(_) => CallState::Completed,
            Err(_) => CallState::Failed,
        };
        result
    }

    fn decode(&self, reply: Reply) -> Result<T, Error> {
        if reply.id != self.id {
            return Err(Error::Correlation {
                expected: self.id,
                actual: reply.id,
            });
        }
        match reply.result {
            Ok(value) => Ok(serde_json::from_value(value)?),
            Err(message) => Err(Error::Service {
                service: self.service.clone(),
                message,
            }),
        }
    }
}

impl<T: DeserializeOwned> Future for PendingCall<T> {
    type Output = Result<T, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.state != CallState::Pending {
            return Poll::Ready(Err(Error::AlreadyResolved { id: self.id }));
        }
        match Pin::new(&mut self.response).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(reply)) => Poll::Ready(self.complete(reply)),
            Poll::Ready(Err(_)) => {
                self.state = CallState::Cancelled;
                debug!(id = self.id, service = %self.service, "reply path dropped");
                Poll::Ready(Err(self.cancelled()))
            }
        }
    }
}

impl<T: DeserializeOwned> FusedFuture for PendingCall<T> {
    fn is_terminated(&self) -> bool {
        self.state != CallState::Pending
    }
}

impl<T> std::fmt::Debug for PendingCall<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall")
            .field("id", &self.id)
            .field("service", &self.service)
            .field("state", &self.state)
            .finish()
    }
}
