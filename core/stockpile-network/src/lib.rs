//! Connectivity monitoring for Stockpile.
//!
//! [`NetworkMonitor`] holds the current online/offline snapshot, exposes it
//! synchronously through [`NetworkMonitor::is_online`], and notifies
//! subscribers on every transition. Platform glue feeds it either directly
//! via [`NetworkMonitor::set_online`] or through a polling [`Probe`].

mod monitor;
mod probe;

pub use monitor::{NetworkMonitor, Subscription};
pub use probe::{PollConfig, Probe, TcpProbe};
