//! Session lifecycle: discovery, selection, creation and revocation.

pub mod manager;

pub use manager::SessionManager;
