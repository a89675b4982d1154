pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod storage;
pub mod validation;

pub use error::*;
pub use models::*;
pub use services::*;
pub use validation::*;
