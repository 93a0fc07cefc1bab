//! Process table sampling, tree reconciliation and control

pub mod actions;
pub mod collection;
pub mod gpu;
pub mod normalize;
pub mod sampler;
pub mod tree;

pub use actions::{KillReport, ProcessActions};
pub use collection::{MutationStats, ObservableList};
pub use gpu::{GpuUsageSampler, ProcessGpu};
pub use sampler::{ProcessSnapshot, ProcessTableSampler};
pub use tree::{NodeKey, ProcessNode, ProcessRow, ProcessTreeReconciler, SortColumn, SortState};
