//! Telemetry sampling and aggregation
//!
//! Rate math, multi-source resolution, resource lifecycle and the snapshot
//! sampler that ties them together.

pub mod format;
pub mod history;
pub mod inventory;
pub mod models;
pub mod rate;
pub mod resolver;
pub mod resource;
pub mod sampler;
pub mod throttle;
pub mod trace;

pub use models::{
    CpuInfo, DiskProcessInfo, GpuInfo, NetworkInfo, RamInfo, StorageInfo, SystemSnapshot,
};
pub use resolver::SourceTag;
pub use sampler::SystemSnapshotSampler;
