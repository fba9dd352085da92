//! Ldapsync Sync - Directory reconciliation, scheduling and the service facade
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      DirectoryEngine                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌───────────────┐  ┌───────────────┐  ┌───────────────┐   │
//! │  │ Authenticator │  │ SyncScheduler │  │  Reconciler   │   │
//! │  │               │  │               │  │               │   │
//! │  │ - Resolve DN  │  │ - Timer loop  │  │ - Full search │   │
//! │  │ - User bind   │  │ - Sync now    │  │ - Upsert rows │   │
//! │  │ - Provision   │  │ - No overlap  │  │ - Deactivate  │   │
//! │  └───────┬───────┘  └───────────────┘  └───────┬───────┘   │
//! │          │                                     │           │
//! │          └──────────────────┬──────────────────┘           │
//! │                             │                               │
//! │                    ┌────────┴────────┐                      │
//! │                    │ DirectoryClient │                      │
//! │                    │  (pooled LDAP)  │                      │
//! │                    └─────────────────┘                      │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Features
//!
//! - **Incremental Cleanup**: Accounts missing from a pass are deactivated, never deleted
//! - **Overlap Guard**: A trigger during a running pass reports "already running"
//! - **Backoff**: Failed passes stretch the schedule up to a configured ceiling

mod engine;
mod reconciler;
mod scheduler;

pub use engine::{ConnectionTestResult, DirectoryEngine, DirectoryStatus, LoginResponse};
pub use reconciler::Reconciler;
pub use scheduler::{RunOutcome, SchedulerPhase, SyncScheduler, TriggerOutcome};
