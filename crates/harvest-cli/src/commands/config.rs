use harvest_core::config::HarvestConfig;
use harvest_core::remote::normalize_rest_url;
use harvest_core::util::normalize_text_option;

use crate::cli::ConfigCommands;
use crate::commands::common::Context;
use crate::error::CliError;

/// Values passed to `config init`; unset fields keep the stored value.
#[derive(Debug, Clone, Default)]
pub struct ConfigInit {
    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<String>,
    pub orchard_id: Option<String>,
    pub sync_interval_secs: Option<u64>,
    pub dead_letter_threshold: Option<u32>,
    pub dead_letter_permanent_errors: Option<bool>,
}

/// Merge explicit values over the stored config.
pub fn merge_config_init(existing: &HarvestConfig, init: ConfigInit) -> Result<HarvestConfig, CliError> {
    let supabase_url = match normalize_text_option(init.supabase_url) {
        Some(url) => {
            normalize_rest_url(&url).map_err(|error| CliError::Config(error.to_string()))?;
            Some(url.trim_end_matches('/').to_string())
        }
        None => existing.supabase_url.clone(),
    };

    let merged = HarvestConfig {
        supabase_url,
        supabase_anon_key: normalize_text_option(init.supabase_anon_key)
            .or_else(|| existing.supabase_anon_key.clone()),
        orchard_id: normalize_text_option(init.orchard_id).or_else(|| existing.orchard_id.clone()),
        sync_interval_secs: init
            .sync_interval_secs
            .unwrap_or(existing.sync_interval_secs),
        dead_letter_threshold: init
            .dead_letter_threshold
            .unwrap_or(existing.dead_letter_threshold),
        dead_letter_permanent_errors: init
            .dead_letter_permanent_errors
            .unwrap_or(existing.dead_letter_permanent_errors),
        ..existing.clone()
    };
    merged
        .validate()
        .map_err(|error| CliError::Config(error.to_string()))?;
    Ok(merged)
}

/// Effective config with the anon key shortened for display.
pub fn redacted_config(config: &HarvestConfig) -> HarvestConfig {
    let redact = |value: &Option<String>| {
        value.as_ref().map(|secret| {
            let prefix = secret.chars().take(6).collect::<String>();
            format!("{prefix}...")
        })
    };
    HarvestConfig {
        supabase_anon_key: redact(&config.supabase_anon_key),
        access_token: redact(&config.access_token),
        ..config.clone()
    }
}

pub fn run_config(context: &Context, command: ConfigCommands) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            supabase_url,
            supabase_anon_key,
            orchard_id,
            sync_interval_secs,
            dead_letter_threshold,
            dead_letter_permanent_errors,
        } => {
            // Start from the file alone so env overrides are not persisted.
            let stored = HarvestConfig::load_from_path(&context.config_path)?;
            let merged = merge_config_init(
                &stored,
                ConfigInit {
                    supabase_url,
                    supabase_anon_key,
                    orchard_id,
                    sync_interval_secs,
                    dead_letter_threshold,
                    dead_letter_permanent_errors,
                },
            )?;
            merged.save_to_path(&context.config_path)?;
            println!("Saved config to {}", context.config_path.display());
            if merged.orchard_id.is_none() {
                println!("No orchard set yet; pass --orchard-id before scanning.");
            }
            if !merged.has_remote() {
                println!("Remote sync is not configured; entries will queue locally.");
            }
            Ok(())
        }
        ConfigCommands::Show { json } => {
            let shown = redacted_config(&context.config);
            if json {
                println!("{}", serde_json::to_string_pretty(&shown)?);
                return Ok(());
            }
            println!("config file:    {}", context.config_path.display());
            println!("database:       {}", context.db_path.display());
            println!(
                "orchard:        {}",
                shown.orchard_id.as_deref().unwrap_or("(not set)")
            );
            println!(
                "supabase url:   {}",
                shown.supabase_url.as_deref().unwrap_or("(not set)")
            );
            println!(
                "anon key:       {}",
                shown.supabase_anon_key.as_deref().unwrap_or("(not set)")
            );
            println!("sync interval:  {}s", shown.sync_interval_secs);
            println!("dead-letter at: {} attempts", shown.dead_letter_threshold);
            println!(
                "fast path:      {}",
                if shown.dead_letter_permanent_errors {
                    "on"
                } else {
                    "off"
                }
            );
            Ok(())
        }
    }
}
