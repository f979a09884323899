//! Migrant is a partitioned-memory tasking runtime.
//!
//! A [World] owns a fixed number of partitions, each a unit of memory locality with its own storage budget,
//! and a pool of worker threads distributed over them. On top of it Migrant provides:
//!
//! - [PartitionMap]: the mapping of logical indices to `(partition, offset)` pairs for striped and chunked layouts.
//! - [PartitionedArray]: an array whose storage is spread over the partitions and addressed uniformly by logical index.
//! - [ReplicatedValue]: a value with one independent copy per partition.
//! - [Accumulator]: a reduction cell per partition, combined once after the updating tasks have joined.
//! - [apply_range] / [PartitionedArray::apply]: a fork/join combinator that splits a range into grain sized tasks
//!   according to a [Strategy], placing tasks either at the spawner's partition or next to the data they touch.
//!   Running tasks may [migrate][TaskContext::migrate] their notional execution context next to an address;
//!   migration never changes which data a task reads or writes.
//!
//! The [harness] module describes the contract benchmark programs use to drive the runtime.
//!
//! EXAMPLES
//! --------
//!
//! # Summing a partitioned array
//! ```
//! use migrant::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let world = WorldBuilder::new().with_partitions(8).build()?;
//!     let array = PartitionedArray::<u64>::new(&world, 1024, Layout::Striped)?;
//!     array.fill(1, Strategy::SerialSpawn)?;
//!
//!     let sum = Accumulator::<u64>::sum(&world);
//!     let (a, s) = (array.clone(), sum.clone());
//!     array.apply(64, Strategy::RecursiveRemoteSpawn, move |ctx, range| {
//!         for i in range {
//!             ctx.migrate(a.index(i)?);
//!             s.update(ctx, a.load(i)?);
//!         }
//!         Ok(())
//!     })?;
//!     assert_eq!(sum.combine(), 1024);
//!     Ok(())
//! }
//! ```
//!
//! # Configuration
//! Defaults for every [WorldBuilder] setting are read once from `MIGRANT_*` environment variables,
//! see [Config][env_var::Config].

pub mod accumulator;
pub mod apply;
pub mod array;
pub mod env_var;
pub mod error;
pub mod harness;
pub mod memregion;
pub mod partition_map;
pub mod replicated;
mod scheduler;
mod warnings;
mod world;

pub use array::prelude;
pub use array::prelude::*;
pub use env_var::config;
pub use harness::{check_value, run_trials, Benchmark, TrialReport};
