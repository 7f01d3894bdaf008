//! Approval Workflow Engine
//!
//! The engine takes a document through a chain of reviewers. It records
//! their decisions, advances levels, enforces deadlines and notifies
//! participants when the outcome changes.
//!
//! # Key Principle
//!
//! **Transitions are pure; the engine persists and notifies.**
//!
//! The [`StateMachine`] mutates an in-memory instance and returns the
//! events that transition produced. [`ApprovalEngine`] commits the result
//! with an optimistic version check and only then hands the events to the
//! [`Notifier`]. A failed notification never undoes a committed transition.
//!
//! # Architecture
//!
//! - [`ApprovalEngine`]: service entry point over the collaborators
//! - [`StateMachine`]: lifecycle transitions and decision intake
//! - [`DecisionLedger`]: history and latency statistics
//! - [`InstanceStore`]: versioned persistence
//! - [`Directory`] / [`DocumentCatalog`]: identity and document lookups
//! - [`ExpirySweeper`]: background expiry of overdue instances
//! - [`DashboardSnapshot`]: aggregate counts for monitoring
//!
//! # Example
//!
//! ```rust
//! use approval_engine::{ApprovalEngine, InMemoryInstanceStore, LoggingNotifier, OpenDirectory};
//! use approval_types::*;
//! use std::sync::Arc;
//!
//! # tokio_test_block(async {
//! let engine = ApprovalEngine::new(
//!     Arc::new(InMemoryInstanceStore::new()),
//!     Arc::new(OpenDirectory),
//!     Arc::new(LoggingNotifier),
//! );
//!
//! let definition = WorkflowDefinition::sequential(
//!     DocumentRef::new("records/1998/ledger-7"),
//!     [UserId::new("archivist"), UserId::new("director")],
//!     72 * 3600,
//! );
//! let instance = engine.create(definition, UserId::new("clerk")).await.unwrap();
//! engine.activate(&instance.id).await.unwrap();
//!
//! engine
//!     .submit_decision(&instance.id, DecisionRequest::approve(UserId::new("archivist")))
//!     .await
//!     .unwrap();
//! assert_eq!(engine.compute_progress(&instance.id).await.unwrap(), 50);
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread()
//! #         .enable_all()
//! #         .build()
//! #         .unwrap()
//! #         .block_on(f)
//! # }
//! ```

#![deny(unsafe_code)]

pub mod clock;
pub mod config;
pub mod dashboard;
pub mod directory;
pub mod documents;
pub mod engine;
pub mod ledger;
pub mod notifier;
pub mod state_machine;
pub mod store;
pub mod sweeper;

// Re-export main types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, LoggingConfig, StoreConfig, SweeperConfig};
pub use dashboard::DashboardSnapshot;
pub use directory::{Directory, DirectoryError, InMemoryDirectory, OpenDirectory, UserRecord};
pub use documents::{DocumentCatalog, DocumentError, DocumentSummary, InMemoryDocumentCatalog};
pub use engine::ApprovalEngine;
pub use ledger::{DecisionLedger, LedgerStatistics};
pub use notifier::{LoggingNotifier, Notification, Notifier, NotifyError, RecordingNotifier};
pub use state_machine::StateMachine;
pub use store::{InMemoryInstanceStore, InstanceStore};
pub use sweeper::{ExpirySweeper, SweepReport};
