//! Service layer: the broker core and the event loop that owns it.

pub mod broker;
pub mod event_loop;

pub use broker::{Broker, BrokerStats, LookupRequest, MessageOutcome, RelayOutcome};
pub use event_loop::{BrokerEvent, BrokerHandle, EventLoop, ShutdownReason};
