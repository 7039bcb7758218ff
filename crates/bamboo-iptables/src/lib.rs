//! `iptables`/`ip6tables` backend: rule rendering, kernel-text rendering,
//! command discovery, and the differential Table Syncer (§4.1, §4.4).

pub mod command;
pub mod lock;
pub mod renderer;
pub mod restore_builder;
pub mod table;
pub mod version;

pub use renderer::render;
pub use table::TableSyncer;
