pub mod coordination;
pub mod data;
pub mod error;
pub mod scheduler;
pub mod store;
pub mod summary;

pub use coordination::{Coordinator, DomainLockGuard};
pub use data::{Database, NewScan, ScanRecord, ScanStatus, SeedEntry, new_scan_id};
pub use error::StoreError;
pub use scheduler::{ScanProgressCallback, Scheduler, SchedulerConfig, TickOutcome};
pub use store::{ResultSink, SeedQueue};
