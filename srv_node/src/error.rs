use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("srv_node: Service '{}' is already bound by node '{}'", service, node)]
    DuplicateBinding { service: String, node: String },
    #[error("srv_node: Service '{}' unavailable after {:?}", service, waited)]
    Unavailable { service: String, waited: Duration },
    #[error("srv_node: Call {} to service '{}' was cancelled", id, service)]
    Cancelled { service: String, id: u64 },
    #[error("srv_node: Request queue of service '{}' is full", service)]
    QueueFull { service: String },
    #[error("srv_node: Service '{}' failed: {}", service, message)]
    Service { service: String, message: String },
    #[error("srv_node: Call {} already reached a terminal state", id)]
    AlreadyResolved { id: u64 },
    #[error("srv_node: Response for call {} delivered to call {}", actual, expected)]
    Correlation { expected: u64, actual: u64 },
    #[error("srv_node: Frame of {} bytes exceeds the limit of {}", len, limit)]
    FrameTooLarge { len: u64, limit: u64 },
    #[error("srv_node: Invalid configuration: {}", message)]
    Config { message: String },
    #[error("srv_node: Serialization: {}", .0)]
    Serialization(#[from] serde_json::Error),
    #[error("srv_node: IO: {}", .0)]
    Io(#[from] std::io::Error),
}
