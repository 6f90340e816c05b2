//! Translation document status tracking.
//!
//! Local units (content entities and configuration objects) are uploaded to
//! a translation management system as documents. Every document has a source
//! status and one status per target locale; [`state_machine`] holds the rules
//! for moving between them and [`tracker::Tracker`] drives those rules from
//! user actions, bulk operations, TMS notifications and a deferred download
//! queue.

pub mod bulk;
pub mod config;
pub mod error;
pub mod notify;
pub mod profile;
pub mod queue;
pub mod state_machine;
pub mod store;
pub mod tms;
pub mod tracker;
pub mod unit;
