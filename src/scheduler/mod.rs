//! # Background Schedulers
//!
//! Tokio tasks with explicit stop signals; every `stop()` joins its task(s)
//! before returning.
//!
//! - [`warmup::WarmupScheduler`]: queue of keys to pre-populate
//! - [`reconcile::ReconcileScheduler`]: fixed-interval repair pass
//! - [`health::HealthProber`]: periodic store ping

pub mod health;
pub mod reconcile;
pub mod warmup;

pub use health::HealthProber;
pub use reconcile::{ReconcileContext, ReconcileScheduler, Reconciler};
pub use warmup::{WarmupItem, WarmupScheduler};
