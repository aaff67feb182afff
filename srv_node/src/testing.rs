use crate::Service;

/// Answers with the request text.
pub(crate) struct Echo;

impl Service for Echo {
    type Request = String;
    type Response = String;
}

/// Answers with the length of the request text.
pub(crate) struct Length;

impl Service for Length {
    type Request = String;
    type Response = usize;
}
