pub use crate::accumulator::{Accumulator, ReduceOp};
pub use crate::apply::{
    apply_range, apply_range_async, grain_for_threads, grain_for_threads_min, ApplyReport,
    Placement, Shape, Strategy, TaskContext,
};
pub use crate::array::{LocalData, PartitionedArray};
pub use crate::error::{RuntimeError, RuntimeResult};
pub use crate::memregion::Dist;
pub use crate::partition_map::{Address, Layout, PartitionMap};
pub use crate::replicated::ReplicatedValue;
pub use crate::scheduler::TaskHandle;
pub use crate::world::{World, WorldBuilder, WorldStats};
