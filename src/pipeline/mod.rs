pub mod control;
pub mod export;
pub mod gate;
pub mod persist;
pub mod rate;

pub use control::{
    Clock, IterationReport, PipelineLoop, PipelineState, RunSummary, StopReason, SystemClock, MAX_CORRUPT_FRAMES,
};
pub use export::Exporter;
pub use gate::EventGate;
pub use persist::{Enqueued, PersistenceReport, PersistenceTask, PersistenceWorker};
pub use rate::RateTracker;
