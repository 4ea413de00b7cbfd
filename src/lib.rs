pub mod queue;
pub mod runtime;
pub mod workload;

pub use queue::{BoundedQueue, DrainPolicy, InvalidCapacity, QueueState, QueueStats, ShutdownError};
pub use runtime::{PipelineConfig, RunStats, run_pipeline};
pub use workload::{ItemSink, ItemSource, SequenceSource, SimulatedSink};
