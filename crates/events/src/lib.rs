//! Job event fan-out for the darkroom client.
//!
//! [`EventRouter`] is the publish/subscribe hub between the per-job
//! stream transports and whoever is rendering job progress. It is an
//! owned object with an explicit lifecycle: constructed per client
//! session, dropped with it. Never a process-wide global.

pub mod dispatch;

pub use dispatch::{EventRouter, Listener, ListenerGuard};
