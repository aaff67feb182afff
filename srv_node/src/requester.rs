use std::{marker::PhantomData, sync::Arc, time::Duration};

use tokio::{sync::oneshot, time::Instant};
use tracing::{debug, info};

use crate::{transport::next_call_id, Context, Envelope, Error, PendingCall, Service, Transport};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Client side of a service.
pub struct Requester<S: Service> {
    service: String,
    transport: Arc<dyn Transport>,
    _service: PhantomData<fn() -> S>,
}

impl<S: Service> Requester<S> {
    /// Requester for a responder living in the same process.
    pub fn new(context: &Context, service: &str) -> Self {
        Self::with_transport(Arc::new(context.clone()), service)
    }

    pub fn with_transport(transport: Arc<dyn Transport>, service: &str) -> Self {
        Self {
            service: service.to_string(),
            transport,
            _service: PhantomData,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn is_available(&self) -> bool {
        self.transport.is_available(&self.service)
    }

    /// Polls availability every `poll_interval` until a responder offers the
    /// service.
    ///
    /// With a `timeout`, fails with [`Error::Unavailable`] once it elapses.
    /// The first check happens before any waiting, so a zero timeout is a
    /// single check.
    pub async fn await_availability(
        &self,
        poll_interval: Duration,
        timeout: Option<Duration>,
    ) -> Result<(), Error> {
        let poll_interval = poll_interval.max(MIN_POLL_INTERVAL);
        let started = Instant::now();
        loop {
            if self.is_available() {
                debug!(service = %self.service, "service available");
                return Ok(());
            }
            let waited = started.elapsed();
            let pause = match timeout {
                Some(timeout) if waited >= timeout => {
                    return Err(Error::Unavailable {
                        service: self.service.clone(),
                        waited,
                    })
                }
                Some(timeout) => poll_interval.min(timeout - waited),
                None => poll_interval,
            };
            info!(service = %self.service, "service not available, waiting again...");
            tokio::time::sleep(pause).await;
        }
    }

    /// Hands one request to the transport without waiting for the answer.
    pub fn send_request(&self, request: &S::Request) -> Result<PendingCall<S::Response>, Error> {
        let id = next_call_id();
        let payload = serde_json::to_value(request)?;
        let (reply, response) = oneshot::channel();
        self.transport.dispatch(Envelope {
            id,
            service: self.service.clone(),
            payload,
            reply,
        })?;
        debug!(id, service = %self.service, "request sent");
        Ok(PendingCall::new(id, self.service.clone(), response))
    }

    pub async fn call(&self, request: &S::Request) -> Result<S::Response, Error> {
        self.send_request(request)?.await
    }
}

impl<S: Service> Clone for Requester<S> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            transport: self.transport.clone(),
            _service: PhantomData,
        }
    }
}
