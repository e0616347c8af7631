pub mod api;
pub mod catalog;
pub mod client;
pub mod config;
pub mod gating;
pub mod license;
pub mod store;
