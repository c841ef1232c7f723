//! Queue module: topology, routing, delayed dispatch and the in-memory broker.

pub mod delayed;
pub mod memory;
pub mod router;
pub mod topology;

pub use delayed::DelayedDispatchGateway;
pub use memory::{InMemoryBroker, PUBLISHED_LOG_CAPACITY, PublishedMessage};
pub use router::{QueueRouter, Route};
pub use topology::{ExchangeKind, QueueBinding, QueueSpec, Topology};
