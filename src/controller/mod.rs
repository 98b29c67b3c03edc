pub mod backoff;
pub mod clock;
pub mod condition;
pub mod config_tracker;
pub mod fingerprint;
pub mod reconcile;
pub mod release;
pub mod status;
pub mod store;
pub mod target;

pub use reconcile::{error_policy, reconcile, Context, ReconcileError};
pub use release::ReleaseController;
pub use status::{StatusError, StatusStore, StatusUpdater};
