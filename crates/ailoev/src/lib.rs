pub mod auth;
pub mod config;
pub mod extract;
pub mod konnector;
pub mod navigator;
pub mod normalize;
pub mod page;
pub mod parser;
pub mod poll;
pub mod sink;
pub mod site;
pub mod types;
pub mod utils;
pub mod worker;

#[cfg(test)]
mod testing;

pub use config::{DevConfig, Fields, KonnectorConfig};
pub use konnector::{Konnector, KonnectorError, RunReport};
pub use sink::{FolderSink, Sink};
