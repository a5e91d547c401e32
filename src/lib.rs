//! Availability and pricing engine for hospitality inventory: hotel rooms by
//! night and event venues by time slot.
//!
//! [`engine`] holds the pure decision functions. [`store`] is the WAL-backed
//! repository, [`service`] wires the two together, and [`wire`] serves it all
//! as JSON lines over TCP.

pub mod compactor;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod property;
pub mod repository;
pub mod service;
pub mod store;
pub mod wal;
pub mod wire;
