//! Harvest orchestration and corpus consumers for the hearings workspace.
//!
//! This crate ties the catalog walker, document fetcher, decoder and corpus
//! store into a resumable harvest run, and hands the finished corpus to the
//! manifest export and the external topic modeller.

pub mod harvest;
pub mod manifest;
pub mod topics;

pub use harvest::{HarvestReport, ProgressReporter, SessionStep, SilentProgress, harvest};
