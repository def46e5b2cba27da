use anyhow::Result;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use nutri_core::auth::Session;
use nutri_core::service::NutritionService;

use super::helpers::{opt_text, parse_date, parse_time};

pub(crate) fn cmd_diet_log_list(svc: &NutritionService, session: &Session, json: bool) -> Result<()> {
    let entries = svc.diet_log(session)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("Nothing logged yet.");
        return Ok(());
    }

    #[derive(Tabled)]
    struct Row {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Time")]
        time: String,
        #[tabled(rename = "Recipe")]
        recipe: String,
        #[tabled(rename = "Portion")]
        portion: String,
        #[tabled(rename = "Done")]
        done: &'static str,
        #[tabled(rename = "Notes")]
        notes: String,
    }

    let rows: Vec<Row> = entries
        .iter()
        .map(|e| Row {
            id: e.id,
            date: e.date.clone(),
            time: opt_text(e.time.as_deref()),
            recipe: opt_text(e.recipe_name.as_deref()),
            portion: format!("{:.1}", e.portion_size),
            done: if e.is_finished { "yes" } else { "" },
            notes: opt_text(e.notes.as_deref()),
        })
        .collect();
    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(4..5)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn cmd_diet_log_add(
    svc: &NutritionService,
    session: &Session,
    recipe_id: i64,
    date: Option<String>,
    time: Option<String>,
    portion: f64,
    notes: Option<String>,
    json: bool,
) -> Result<()> {
    let date = parse_date(date)?;
    let time = parse_time(time)?;
    let entry = svc.log_meal(session, recipe_id, date, time, portion, notes)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&entry)?);
    } else {
        println!(
            "Logged {:.1} x {} on {} at {} (ID {})",
            entry.portion_size,
            entry.recipe_name.as_deref().unwrap_or("recipe"),
            entry.date,
            entry.time.as_deref().unwrap_or("-"),
            entry.id
        );
    }
    Ok(())
}

pub(crate) fn cmd_diet_log_finish(
    svc: &NutritionService,
    session: &Session,
    log_id: i64,
    finished: bool,
    json: bool,
) -> Result<()> {
    let changed = svc.set_meal_finished(session, log_id, finished)?;
    if json {
        println!(
            "{}",
            serde_json::json!({ "id": log_id, "is_finished": finished, "rows": usize::from(changed) })
        );
    } else if !changed {
        println!("No diet log entry {log_id}, nothing changed");
    } else if finished {
        println!("Marked entry {log_id} as finished");
    } else {
        println!("Marked entry {log_id} as not finished");
    }
    Ok(())
}

pub(crate) fn cmd_diet_log_delete(
    svc: &NutritionService,
    session: &Session,
    log_id: i64,
    json: bool,
) -> Result<()> {
    let deleted = svc.delete_diet_log(session, log_id)?;
    if json {
        println!("{}", serde_json::json!({ "id": log_id, "rows": usize::from(deleted) }));
    } else if deleted {
        println!("Deleted entry {log_id}");
    } else {
        println!("No diet log entry {log_id}, nothing deleted");
    }
    Ok(())
}
