pub mod common;
pub mod completions;
pub mod config;
pub mod crew;
pub mod dlq;
pub mod field;
pub mod payroll;
pub mod queue;
pub mod settings;
pub mod sync;
