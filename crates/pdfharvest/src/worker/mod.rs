pub mod driver;
pub mod pool;
pub mod summary;

pub use driver::{BatchDriver, DriverSettings};
pub use pool::{BatchReport, WorkerPool};
pub use summary::{BatchSummary, RowReport, RunSummary, StopReason};
