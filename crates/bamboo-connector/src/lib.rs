pub mod client;
pub mod connector;
pub mod dto;

pub use bamboo_core::cancel::Canceller;
pub use client::PolicyClient;
pub use connector::DatastoreConnector;
