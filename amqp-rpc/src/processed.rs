//! The internal carrier handed from a handler task to the Responder.

use lapin::types::ShortString;

use crate::response::Publishing;

/// A reply ready to be published, produced by a single delivery's handler task and consumed
/// exactly once by the Responder.
#[derive(Debug, Clone)]
pub struct ProcessedRequest {
    /// The queue to publish the reply to - the inbound delivery's `reply_to` property.
    pub reply_to: ShortString,
    /// The `mandatory` publish flag, as set on the [`crate::response::ResponseWriter`].
    pub mandatory: bool,
    /// The `immediate` publish flag, as set on the [`crate::response::ResponseWriter`].
    pub immediate: bool,
    /// The body and properties to publish.
    pub publishing: Publishing,
}
