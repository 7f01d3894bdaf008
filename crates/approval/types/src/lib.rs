//! Approval Workflow Domain Types
//!
//! An approval workflow drives one document through a chain of
//! reviewers who approve or reject it, and ends in exactly one terminal
//! outcome.
//!
//! # Key Concepts
//!
//! - **WorkflowDefinition**: ordered approvers, approval mode, priority
//!   and deadline. Snapshotted into an instance and frozen.
//! - **WorkflowInstance**: one run of a definition against one document,
//!   with its lifecycle state, open level and decisions.
//! - **Decision**: an append-only approve/reject record for one level.
//! - **FinalOutcome**: how a terminal instance ended.
//! - **WorkflowEvent**: what the notifier is told about.
//!
//! # Modes
//!
//! - `Sequential`: approvers act in order; the first rejection ends the chain.
//! - `Unanimous`: every approver is a peer in a single round; the first
//!   rejection ends the round, and approval needs every vote.

#![deny(unsafe_code)]

mod decision;
mod definition;
mod errors;
mod event;
mod ids;
mod instance;

pub use decision::*;
pub use definition::*;
pub use errors::*;
pub use event::*;
pub use ids::*;
pub use instance::*;
