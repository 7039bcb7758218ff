//! Re-exports the process-wide cancellation wrapper (§5, §9, §10.5); it
//! lives in `bamboo-core` since both the connector and dataplane workers
//! need it without depending on each other.

pub use bamboo_core::cancel::Canceller;
