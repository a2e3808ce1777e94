#![forbid(unsafe_code)]

//! Remote scan agent: runs a vulnerability scanning engine on behalf of a
//! controller over mutually authenticated gRPC, streaming live engine logs
//! and the resulting reports back to the caller.

pub mod admission;
pub mod config;
pub mod errors;
pub mod execution;
pub mod identity;
pub mod jobfile;
pub mod models;
pub mod platform;
pub mod probe;
pub mod proto;
pub mod server;
pub mod tls;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
