//! Persistent string map over the shared region

pub mod config;
pub mod hash;
pub mod iter;
pub mod table;

pub use config::MapConfig;
pub use iter::Iter;
pub use table::{MapInfo, ShmMap};
