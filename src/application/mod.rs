//! Application layer: the lending services and the saga glue between them.
//!
//! Each service owns its own store and talks to the others only through
//! events on the broker or through the RPC surface in [`rpc`].
//! [`platform::LendingPlatform`] wires them together and runs one consumer
//! task per queue.

pub mod consumer;
pub mod loans;
pub mod notifications;
pub mod outbox;
pub mod platform;
pub mod rpc;
pub mod scheduler;
pub mod settlement;
