pub mod agent;
pub mod cli;
pub mod config;
pub mod context;
pub mod debug;
pub mod error;
pub mod model;
pub mod provider;
pub mod redact;
pub mod specialist;
pub mod tools;
