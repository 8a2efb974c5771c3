//! Library crate for cfpinner-rs: sample CDN edge address blocks and probe
//! every node for a cached resource.
pub mod alive;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod lists;
pub mod logging;
pub mod probe;
pub mod progress;
pub mod report;
pub mod sampler;
pub mod server;
pub mod target;
pub mod tracker;
pub mod types;
pub mod updater;
