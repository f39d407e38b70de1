//! Subcontract ledger and progress certificate approval engine
//!
//! Tracks how much of a subcontract has been certified, retained and paid,
//! and moves each progress certificate through draft, review and payment
//! while the subcontract's running totals stay consistent.

pub mod certificate;
pub mod context;
pub mod error;
pub mod ledger;
pub mod money;
pub mod service;
pub mod subcontract;
pub mod utils;
