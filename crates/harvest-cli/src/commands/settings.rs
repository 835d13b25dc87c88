use harvest_core::state::AppState;
use harvest_core::util::normalize_text_option;
use harvest_core::HarvestSettings;

use crate::cli::SettingsCommands;
use crate::commands::common::{format_timestamp, Context};
use crate::error::CliError;

/// Requested changes to the orchard settings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsPatch {
    pub piece_rate: Option<f64>,
    pub min_wage_rate: Option<f64>,
    pub min_buckets_per_hour: Option<f64>,
    pub target_tons: Option<f64>,
    pub variety: Option<String>,
}

impl SettingsPatch {
    pub const fn is_empty(&self) -> bool {
        self.piece_rate.is_none()
            && self.min_wage_rate.is_none()
            && self.min_buckets_per_hour.is_none()
            && self.target_tons.is_none()
            && self.variety.is_none()
    }

    pub fn apply_to(&self, settings: &HarvestSettings) -> HarvestSettings {
        HarvestSettings {
            piece_rate: self.piece_rate.unwrap_or(settings.piece_rate),
            min_wage_rate: self.min_wage_rate.unwrap_or(settings.min_wage_rate),
            min_buckets_per_hour: self
                .min_buckets_per_hour
                .unwrap_or(settings.min_buckets_per_hour),
            target_tons: self.target_tons.unwrap_or(settings.target_tons),
            variety: self
                .variety
                .clone()
                .unwrap_or_else(|| settings.variety.clone()),
            ..settings.clone()
        }
    }
}

pub fn format_settings_lines(settings: &HarvestSettings) -> Vec<String> {
    let mut lines = vec![
        format!("orchard:              {}", settings.orchard_id),
        format!("piece rate:           ${:.2} per bucket", settings.piece_rate),
        format!("minimum wage:         ${:.2} per hour", settings.min_wage_rate),
        format!(
            "break-even rate:      {:.1} buckets per hour",
            settings.break_even_buckets_per_hour()
        ),
        format!("target rate:          {:.1} buckets per hour", settings.min_buckets_per_hour),
        format!("season target:        {:.1} t", settings.target_tons),
        format!("variety:              {}", settings.variety),
    ];
    lines.push(if settings.updated_at > 0 {
        format!("last changed:         {}", format_timestamp(settings.updated_at))
    } else {
        "last changed:         never (defaults)".to_string()
    });
    lines
}

pub async fn run_settings(context: &Context, command: SettingsCommands) -> Result<(), CliError> {
    let orchard_id = context.orchard_id()?;
    let db = context.open_database().await?;

    match command {
        SettingsCommands::Show { json } => {
            let settings = db.load_harvest_settings(orchard_id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&settings)?);
            } else {
                for line in format_settings_lines(&settings) {
                    println!("{line}");
                }
            }
        }
        SettingsCommands::Set {
            piece_rate,
            min_wage_rate,
            min_buckets_per_hour,
            target_tons,
            variety,
        } => {
            let patch = SettingsPatch {
                piece_rate,
                min_wage_rate,
                min_buckets_per_hour,
                target_tons,
                variety: normalize_text_option(variety),
            };
            if patch.is_empty() {
                return Err(CliError::NothingToUpdate);
            }

            let state = AppState::load(db, context.remote_client()?, orchard_id).await?;
            let current = state.snapshot().await.settings;
            let stored = state.update_settings(patch.apply_to(&current)).await?;
            for line in format_settings_lines(&stored) {
                println!("{line}");
            }
        }
        SettingsCommands::Pull => {
            let state = AppState::load(db, context.remote_client()?, orchard_id).await?;
            let settings = state.pull_settings().await?;
            for line in format_settings_lines(&settings) {
                println!("{line}");
            }
        }
    }
    Ok(())
}
