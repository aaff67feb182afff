use srv_node::{Context, Error, Responder};
use tracing::info;

pub static SERVICE_NAME: &str = "add_two_ints";
pub static SERVER_NODE_ID: &str = "add_two_ints_server";
pub static CLIENT_NODE_ID: &str = "add_two_ints_client";

pub mod srv {
    #[allow(non_snake_case)]
    pub mod AddTwoInts {
        use serde::{Deserialize, Serialize};

        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
        pub struct Request {
            pub a: i64,
            pub b: i64,
        }

        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
        pub struct Response {
            pub sum: i64,
        }

        pub struct Service;

        impl srv_node::Service for Service {
            type Request = Request;
            type Response = Response;
        }
    }
}

use srv::AddTwoInts;

/// Sum of the two operands; sums outside the `i64` range wrap around.
pub fn add_two_ints(request: AddTwoInts::Request) -> AddTwoInts::Response {
    info!(
        node = SERVER_NODE_ID,
        "Incoming request a: {} b: {}", request.a, request.b
    );
    AddTwoInts::Response {
        sum: request.a.wrapping_add(request.b),
    }
}

/// The server node with the `add_two_ints` service bound.
pub fn responder(context: &Context, queue_depth: usize) -> Result<Responder, Error> {
    let mut responder = Responder::new(context, SERVER_NODE_ID, queue_depth);
    responder.register::<AddTwoInts::Service, _>(SERVICE_NAME, add_two_ints)?;
    Ok(responder)
}
