pub mod app;
pub mod chat;
pub mod cli;
pub mod error;
pub mod models;
pub mod platform;
pub mod server;
pub mod storage;

pub use error::{Error, Result};
