//! harvest-core - Core library for HarvestPro
//!
//! Offline-first capture of orchard harvest data: a durable local queue of
//! pending mutations, a serial sync processor, dead-letter triage for
//! operators, and the wage-shield / compliance rules consumed by dashboards
//! and payroll exports.

pub mod compliance;
pub mod config;
pub mod db;
pub mod dead_letter;
pub mod error;
pub mod export;
pub mod models;
pub mod queue;
pub mod remote;
pub mod services;
pub mod state;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{
    AttendanceRecord, BucketRecord, DeadLetterEntry, HarvestSettings, Picker, PickerStatus,
    QualityGrade, QueueEntry, QueueEntryId, QueueOperation,
};
