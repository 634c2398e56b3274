pub mod config;
pub mod error;
pub mod logging;
pub mod notify;
pub mod reconcile;
pub mod scheduler;
pub mod services;
