pub mod error;
pub mod types;
pub mod config;
pub mod session;
pub mod store;
pub mod repository;
pub mod provider;
pub mod channel;
pub mod dialogue;
pub mod service;
pub mod util;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
