//! Strongly-typed domain model: position addressing, tax lots, events,
//! snapshots, and the schedule. Everything persisted goes through these
//! types; there are no open maps on the wire.

pub mod event;
pub mod keys;
pub mod lot;
pub mod position;
pub mod schedule;
pub mod snapshot;
pub mod trade;
pub mod units;
pub mod upi;
