pub mod api;
pub mod bus;
pub mod chat;
pub mod config;
pub mod entity;
pub mod error;
pub mod panel;
pub mod presence;
pub mod scheduler;
pub mod send;
pub mod store;

pub use panel::{DmPanel, PanelSnapshot, SendOutcome};
