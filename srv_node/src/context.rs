use std::{collections::HashMap, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

use crate::{Envelope, Error, Transport};

struct Endpoint {
    node: String,
    queue: mpsc::Sender<Envelope>,
}

/// In-process registry of the services responders currently offer.
///
/// Cloning is cheap and every clone sees the same registry.
#[derive(Clone, Default)]
pub struct Context {
    endpoints: Arc<Mutex<HashMap<String, Endpoint>>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn advertise(
        &self,
        service: &str,
        node: &str,
        queue: mpsc::Sender<Envelope>,
    ) -> Result<(), Error> {
        let mut endpoints = self.endpoints.lock();
        if let Some(existing) = endpoints.get(service) {
            if !existing.queue.is_closed() {
                return Err(Error::DuplicateBinding {
                    service: service.to_string(),
                    node: existing.node.clone(),
                });
            }
        }
        debug!(service, node, "advertised");
        endpoints.insert(
            service.to_string(),
            Endpoint {
                node: node.to_string(),
                queue,
            },
        );
        Ok(())
    }

    pub(crate) fn withdraw(&self, service: &str, node: &str) {
        let mut endpoints = self.endpoints.lock();
        if endpoints.get(service).is_some_and(|e| e.node == node) {
            endpoints.remove(service);
            debug!(service, node, "withdrawn");
        }
    }

    /// Names of the services with a live responder, sorted.
    pub fn services(&self) -> Vec<String> {
        let mut services: Vec<String> = self
            .endpoints
            .lock()
            .iter()
            .filter(|(_, e)| !e.queue.is_closed())
            .map(|(name, _)| name.clone())
            .collect();
        services.sort();
        services
    }
}

impl Transport for Context {
    fn is_available(&self, service: &str) -> bool {
        self.endpoints
            .lock()
            .get(service)
            .is_some_and(|e| !e.queue.is_closed())
    }

    fn dispatch(&self, envelope: Envelope) -> Result<(), Error> {
        let service = envelope.service.clone();
        let queue = match self.endpoints.lock().get(&service) {
            Some(endpoint) => endpoint.queue.clone(),
            None => {
                return Err(Error::Unavailable {
                    service,
                    waited: Duration::ZERO,
                })
            }
        };
        match queue.try_send(envelope) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Error::QueueFull { service }),
            Err(TrySendError::Closed(_)) => Err(Error::Unavailable {
                service,
                waited: Duration::ZERO,
            }),
        }
    }
}

/// Withdraws the listed services from the context when dropped.
pub(crate) struct Advertisement {
    pub(crate) context: Context,
    pub(crate) node: String,
    pub(crate) services: Arc<Mutex<Vec<String>>>,
}

impl Drop for Advertisement {
    fn drop(&mut self) {
        let services = std::mem::take(&mut *self.services.lock());
        for service in &services {
            self.context.withdraw(service, &self.node);
        }
    }
}
