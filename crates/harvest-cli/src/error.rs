use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] harvest_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("No picker with badge code '{0}' on this orchard")]
    PickerNotFound(String),
    #[error("A picker with badge code '{0}' already exists on this orchard")]
    DuplicatePicker(String),
    #[error("Invalid entry id '{0}'")]
    InvalidEntryId(String),
    #[error("Nothing to update; pass at least one setting to change")]
    NothingToUpdate,
    #[error("Refusing to {0} without confirmation; rerun with --yes")]
    ConfirmationRequired(String),
    #[error("Aborted")]
    Aborted,
    #[error(
        "Remote sync is not configured. Run `harvest config init --supabase-url <URL> --supabase-anon-key <KEY>` or set HARVEST_SUPABASE_URL and HARVEST_SUPABASE_ANON_KEY."
    )]
    RemoteNotConfigured,
}
