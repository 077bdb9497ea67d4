//! Forward sessions and their reconnect policy

mod backoff;
mod forward;
mod relay;

pub use backoff::ExponentialBackoff;
pub use forward::{ForwardSession, SessionContext};
