pub mod config;
pub mod doctor;
pub mod error;
pub mod history;
pub mod logging;
pub mod ops;
pub mod security;


pub use error::OpsError;
