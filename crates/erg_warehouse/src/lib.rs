//! The ergs warehouse: the scheduler that drives datasources and persists
//! their output.
//!
//! One worker per datasource instance, each on its own cadence. A worker
//! drains its datasource's block stream with back-pressure, routes every
//! block to the store matching its `source`, and announces stored blocks to
//! the event sinks — best-effort, never blocking the fetch.

mod status;
mod warehouse;
mod worker;

pub use self::status::{FetchState, FetchStatus};
pub use self::warehouse::{Warehouse, WarehouseConfig};
