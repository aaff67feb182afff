use serde::{de::DeserializeOwned, Serialize};

/// Type-level description of a request kind.
///
/// A service type carries no data, it only ties a request type to the
/// response type its handler produces. Both travel as JSON documents, so
/// they must round-trip through serde.
pub trait Service: Send + 'static {
    type Request: Serialize + DeserializeOwned + Send + 'static;
    type Response: Serialize + DeserializeOwned + Send + 'static;
}
