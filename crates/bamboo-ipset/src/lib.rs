//! `ipset` backend: differential address-set reconciliation (§4.3).

pub mod command;
pub mod syncer;

pub use syncer::{normalize_cidr, IpSetSyncer};
