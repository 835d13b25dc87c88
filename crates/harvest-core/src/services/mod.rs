//! Shared service layer over the local store.

mod database;

pub use database::DatabaseService;
