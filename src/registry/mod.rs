//! The `registry` module tracks which connections are subscribed to which
//! channels. The broker and the peer client each keep their own view.

pub mod subscriptions;

pub use subscriptions::{ConnectionId, SubscriptionFlags, SubscriptionRegistry};
