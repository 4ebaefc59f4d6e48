//! Payment domain: the aggregate, its transactions, value types and the
//! ports to the outside world.

pub mod events;
pub mod money;
pub mod payment;
pub mod ports;
pub mod transaction;
pub mod types;
