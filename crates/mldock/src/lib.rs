pub mod archive;
pub mod artifacts;
pub mod assets;
pub mod channels;
pub mod cli_config;
pub mod container;
pub mod document;
pub mod env_vars;
pub mod error;
pub mod lifecycle;
pub mod manifest;
pub mod process;
pub mod project;
pub mod runner;
pub mod storage;
pub mod transfer;

pub use error::{Error, Result};
