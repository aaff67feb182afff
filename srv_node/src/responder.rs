use std::{collections::HashMap, future::Future, sync::Arc};

use futures::stream::{Stream, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{context::Advertisement, Context, Envelope, Error, Reply, Service};

type Handler = Box<dyn Fn(Value) -> Result<Value, String> + Send + Sync>;

/// Server side of one or more services.
///
/// Requests for every bound service share one bounded queue and are answered
/// one at a time, in arrival order, by [`Responder::run`].
pub struct Responder {
    node: String,
    bindings: HashMap<String, Handler>,
    sender: mpsc::Sender<Envelope>,
    receiver: mpsc::Receiver<Envelope>,
    advertisement: Advertisement,
}

/// What a front end needs to feed requests into a responder.
///
/// The service list is shared with the responder, so names registered after
/// the endpoint was taken show up in [`ResponderEndpoint::services`] too.
#[derive(Clone, Debug)]
pub struct ResponderEndpoint {
    pub node: String,
    pub queue: mpsc::Sender<Envelope>,
    services: Arc<Mutex<Vec<String>>>,
}

impl ResponderEndpoint {
    /// Services currently advertised, sorted. Empty once the responder stopped.
    pub fn services(&self) -> Vec<String> {
        let mut services = self.services.lock().clone();
        services.sort();
        services
    }
}

impl Responder {
    /// Creates a responder whose queue holds up to `queue_depth` requests
    /// (at least one).
    pub fn new(context: &Context, node: &str, queue_depth: usize) -> Self {
        let (sender, receiver) = mpsc::channel(queue_depth.max(1));
        Self {
            node: node.to_string(),
            bindings: HashMap::new(),
            sender,
            receiver,
            advertisement: Advertisement {
                context: context.clone(),
                node: node.to_string(),
                services: Arc::new(Mutex::new(vec![])),
            },
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    /// Bound service names, sorted.
    pub fn services(&self) -> Vec<String> {
        let mut services: Vec<String> = self.bindings.keys().cloned().collect();
        services.sort();
        services
    }

    /// Binds `handler` to `service` and advertises it in the context.
    ///
    /// Fails with [`Error::DuplicateBinding`] when this responder (or another
    /// live one in the same context) already serves the name; existing
    /// bindings are left untouched.
    pub fn register<S, F>(&mut self, service: &str, handler: F) -> Result<(), Error>
    where
        S: Service,
        F: Fn(S::Request) -> S::Response + Send + Sync + 'static,
    {
        if self.bindings.contains_key(service) {
            return Err(Error::DuplicateBinding {
                service: service.to_string(),
                node: self.node.clone(),
            });
        }
        self.advertisement
            .context
            .advertise(service, &self.node, self.sender.clone())?;
        self.advertisement.services.lock().push(service.to_string());

        let handler: Handler = Box::new(move |payload: Value| -> Result<Value, String> {
            let request = serde_json::from_value::<S::Request>(payload)
                .map_err(|e| format!("undecodable request: {e}"))?;
            serde_json::to_value(handler(request)).map_err(|e| format!("unencodable response: {e}"))
        });
        self.bindings.insert(service.to_string(), handler);
        info!(node = %self.node, service, "service registered");
        Ok(())
    }

    pub fn endpoint(&self) -> ResponderEndpoint {
        ResponderEndpoint {
            node: self.node.clone(),
            queue: self.sender.clone(),
            services: self.advertisement.services.clone(),
        }
    }

    /// Answers requests until `shutdown` completes.
    ///
    /// On shutdown the services are withdrawn from the context and requests
    /// still queued are dropped, which cancels the calls waiting on them.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        let Responder {
            node,
            bindings,
            sender,
            mut receiver,
            advertisement,
        } = self;
        info!(node = %node, services = ?bindings.keys(), "responder running");

        {
            let requests = futures::stream::poll_fn(|cx| receiver.poll_recv(cx));
            serve_requests(&node, &bindings, requests, shutdown).await;
        }

        drop(sender);
        drop(advertisement);
        receiver.close();
        let mut dropped = 0;
        while receiver.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            warn!(node = %node, dropped, "queued requests cancelled by shutdown");
        }
        info!(node = %node, "responder stopped");
    }
}

async fn serve_requests(
    node: &str,
    bindings: &HashMap<String, Handler>,
    mut requests: impl Stream<Item = Envelope> + Unpin,
    shutdown: impl Future<Output = ()>,
) {
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            biased;
            () = &mut shutdown => {
                info!(node, "shutdown requested");
                return;
            }
            request = requests.next() => {
                match request {
                    Some(envelope) => respond(node, bindings, envelope),
                    None => return,
                }
            }
        }
    }
}

fn respond(node: &str, bindings: &HashMap<String, Handler>, envelope: Envelope) {
    let Envelope {
        id,
        service,
        payload,
        reply,
    } = envelope;
    let result = match bindings.get(&service) {
        Some(handler) => handler(payload),
        None => Err(format!("node '{node}' has no binding for '{service}'")),
    };
    if let Err(message) = &result {
        warn!(node, id, service = %service, "request failed with: '{}'", message);
    }
    if reply.send(Reply { id, result }).is_err() {
        debug!(node, id, service = %service, "requester stopped waiting before the response");
    }
}
