//! Internal Dataplane: owns the per-family syncer/manager groups and the
//! top-level reconciliation loop (§4.5, §4.6).

pub mod cancel;
pub mod dataplane;
pub mod managers;

pub use cancel::Canceller;
pub use dataplane::InternalDataplane;
