//! Broker-facing side of the gateway: topology, the AMQP publisher and an
//! in-process recorder with the same contract.

pub mod memory;
pub mod publisher;
pub mod topology;

pub use memory::MemoryPublisher;
pub use publisher::{AmqpPublisher, DispatchError, Publisher};
