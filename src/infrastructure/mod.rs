//! Adapters for the domain ports: storage, the message broker and the vendor
//! stand-ins.

pub mod broker;
pub mod in_memory;
pub mod mock_vendor;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
