use harvest_core::queue::change_picker_status;
use harvest_core::{Picker, PickerStatus};
use serde::Serialize;

use crate::cli::CrewCommands;
use crate::commands::common::{find_picker, Context};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct CrewListItem {
    pub id: String,
    pub code: String,
    pub name: String,
    pub status: PickerStatus,
    pub buckets_today: u32,
    pub hours: f64,
}

pub fn crew_list_item(picker: &Picker) -> CrewListItem {
    CrewListItem {
        id: picker.id.clone(),
        code: picker.picker_id.clone(),
        name: picker.name.clone(),
        status: picker.status,
        buckets_today: picker.total_buckets_today,
        hours: picker.hours,
    }
}

pub fn format_crew_lines(crew: &[Picker]) -> Vec<String> {
    let code_width = crew
        .iter()
        .map(|picker| picker.picker_id.len())
        .max()
        .unwrap_or(4)
        .max(4);

    crew.iter()
        .map(|picker| {
            format!(
                "{:<code_width$}  {:<9}  {:>4} buckets  {}",
                picker.picker_id,
                picker.status.as_str(),
                picker.total_buckets_today,
                picker.name
            )
        })
        .collect()
}

pub async fn run_crew(context: &Context, command: CrewCommands) -> Result<(), CliError> {
    match command {
        CrewCommands::Add { code, name } => run_crew_add(context, &code, &name.join(" ")).await,
        CrewCommands::List { json } => run_crew_list(context, json).await,
        CrewCommands::Archive { code } => {
            run_crew_status(context, &code, PickerStatus::Archived).await
        }
        CrewCommands::Status { code, status } => {
            run_crew_status(context, &code, status.into()).await
        }
    }
}

async fn run_crew_add(context: &Context, code: &str, name: &str) -> Result<(), CliError> {
    let orchard_id = context.orchard_id()?;
    let picker = Picker::new(code, name, orchard_id);
    if picker.picker_id.is_empty() || picker.name.is_empty() {
        return Err(CliError::Core(harvest_core::Error::InvalidInput(
            "badge code and name are required".to_string(),
        )));
    }

    let db = context.open_database().await?;
    if db
        .find_picker_by_code(orchard_id, &picker.picker_id)
        .await?
        .is_some()
    {
        return Err(CliError::DuplicatePicker(picker.picker_id));
    }

    db.save_picker(&picker).await?;
    println!("Added {} ({})", picker.name, picker.picker_id);
    Ok(())
}

async fn run_crew_list(context: &Context, as_json: bool) -> Result<(), CliError> {
    let orchard_id = context.orchard_id()?;
    let db = context.open_database().await?;
    let crew = db.list_pickers(orchard_id).await?;

    if as_json {
        let items = crew.iter().map(crew_list_item).collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if crew.is_empty() {
        println!("No pickers on orchard {orchard_id}.");
        return Ok(());
    }
    for line in format_crew_lines(&crew) {
        println!("{line}");
    }
    Ok(())
}

async fn run_crew_status(
    context: &Context,
    code: &str,
    status: PickerStatus,
) -> Result<(), CliError> {
    let orchard_id = context.orchard_id()?;
    let db = context.open_database().await?;
    let picker = find_picker(&db, orchard_id, code).await?;

    if picker.status == status {
        println!("{} is already {status}", picker.name);
        return Ok(());
    }

    change_picker_status(&db, &picker, status).await?;
    println!("{} is now {status}", picker.name);
    Ok(())
}
