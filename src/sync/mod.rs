pub mod customers;
pub mod fleet;

pub use customers::{BulkSyncReport, MirrorProfile, SyncAction, SyncOutcome};
pub use fleet::{FleetReport, SyncError, SyncService};
