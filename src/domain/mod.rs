//! Domain layer: entities, value objects, the event schema and the ports the
//! application layer is written against.

pub mod events;
pub mod installment;
pub mod loan;
pub mod messaging;
pub mod money;
pub mod notification;
pub mod payment;
pub mod ports;
