//! Shared region provider

pub mod config;
pub mod regions;

pub use config::{BackingType, RegionConfig};
pub use regions::{has_existing_layout, InitMode, SharedMemoryRegion};
