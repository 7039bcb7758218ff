//! Re-exports of the wire schema consumed from the policy server.
//!
//! The fetch/ping responses use exactly `bamboo_core::model`'s shapes
//! (§10.6); this module exists only so connector code can `use
//! crate::dto::*` the way the original's `pkg/apiserver/dto` package is
//! referenced from its client, without duplicating the struct
//! definitions `bamboo-core` already owns as the single authoritative
//! schema.

pub use bamboo_core::model::{ErrorEnvelope, HostEndpointPolicy, Metadata};
