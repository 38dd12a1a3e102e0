//! minispark: motor de agregación clave-valor particionada e iteraciones
//! de punto fijo, en un solo proceso con un pool acotado de workers.
//!
//! ```no_run
//! use minispark::{Context, EngineConfig};
//!
//! # fn main() -> minispark::Result<()> {
//! let ctx = Context::new(EngineConfig::from_env())?;
//! let counts = ctx
//!     .parallelize(vec!["a b", "b c", "c"], 2)?
//!     .flat_map(|l| l.split(' ').map(str::to_string).collect::<Vec<_>>())
//!     .map(|w| (w, 1_u64))
//!     .reduce_by_key(|a, b| a + b)
//!     .collect()?;
//! println!("{:?}", counts);
//! # Ok(())
//! # }
//! ```

pub mod broadcast;
pub mod combine;
pub mod config;
pub mod context;
pub mod dag;
pub mod dataset;
pub mod error;
pub mod genomics;
pub mod graph;
pub mod iterate;
pub mod job;
pub mod join;
pub mod monoid;
pub mod partitioner;
pub mod source;
pub mod task;
pub mod text;
pub mod worker;

mod executor;
mod pair;
mod plan;
mod shuffle;

pub use broadcast::Broadcast;
pub use combine::{Average, Combiner, CombinerSpec, Count, MeanAcc, MinMax, MinMaxCount, Sum};
pub use config::EngineConfig;
pub use context::Context;
pub use dag::{Dag, DagNode};
pub use dataset::{Data, Dataset, Key};
pub use error::{EngineError, Result};
pub use genomics::{BaseCounts, RankProduct};
pub use iterate::{FixedRelation, IterationOutcome, RankConfig, Solver};
pub use job::{JobId, JobInfo, JobStatus};
pub use join::{JoinRow, JoinStrategy, JoinType};
pub use partitioner::{Partitioner, PartitioningInfo, PartitioningKind};
pub use plan::{NarrowKind, ShuffleKind};
pub use source::{
    CsvSink, CsvSource, JsonLinesSink, JsonLinesSource, SinkAdapter, SourceAdapter, TextSource,
    WholeTextSource, WriteMode,
};
pub use task::TaskFailure;
pub use text::Posting;
pub use worker::{CancelToken, WorkerMetrics};
