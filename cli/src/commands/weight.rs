use anyhow::Result;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use nutri_core::auth::Session;
use nutri_core::models::WeightHistoryEntry;
use nutri_core::service::NutritionService;

use super::helpers::opt_num;

const LBS_PER_KG: f64 = 2.20462;

fn print_history(history: &[WeightHistoryEntry]) {
    #[derive(Tabled)]
    struct WeightRow {
        #[tabled(rename = "Updated")]
        updated_at: String,
        #[tabled(rename = "Old (kg)")]
        old: String,
        #[tabled(rename = "New (kg)")]
        new: String,
        #[tabled(rename = "New (lbs)")]
        lbs: String,
        #[tabled(rename = "Change")]
        change: String,
    }

    let rows: Vec<WeightRow> = history
        .iter()
        .map(|h| WeightRow {
            updated_at: h.updated_at.clone(),
            old: opt_num(h.old_weight, 1),
            new: format!("{:.1}", h.new_weight),
            lbs: format!("{:.1}", h.new_weight * LBS_PER_KG),
            change: h
                .old_weight
                .map_or_else(|| "-".into(), |old| format!("{:+.1}", h.new_weight - old)),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..5)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn cmd_weight_set(
    svc: &NutritionService,
    session: &Session,
    weight_kg: f64,
    json: bool,
) -> Result<()> {
    let history = svc.update_weight(session, weight_kg)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&history)?);
        return Ok(());
    }

    let user = svc.profile(session)?;
    println!(
        "Weight set to {weight_kg:.1} kg ({:.1} lbs), BMI {}",
        weight_kg * LBS_PER_KG,
        opt_num(user.bmi, 2)
    );
    print_history(&history);
    Ok(())
}

pub(crate) fn cmd_weight_history(
    svc: &NutritionService,
    session: &Session,
    json: bool,
) -> Result<()> {
    let history = svc.weight_history(session)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&history)?);
    } else if history.is_empty() {
        println!("No weight changes recorded.");
    } else {
        print_history(&history);
    }
    Ok(())
}
