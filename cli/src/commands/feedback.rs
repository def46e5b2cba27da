use anyhow::Result;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use nutri_core::auth::Session;
use nutri_core::service::NutritionService;

use super::helpers::opt_text;

pub(crate) fn cmd_feedback_add(
    svc: &NutritionService,
    session: &Session,
    recipe_id: i64,
    rating: i64,
    comments: Option<String>,
    json: bool,
) -> Result<()> {
    let feedback = svc.submit_feedback(session, recipe_id, rating, comments)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&feedback)?);
    } else {
        println!(
            "Rated recipe {} {}/5 (feedback ID {})",
            feedback.recipe_id, feedback.rating, feedback.id
        );
    }
    Ok(())
}

pub(crate) fn cmd_feedback_list(
    svc: &NutritionService,
    recipe_id: Option<i64>,
    json: bool,
) -> Result<()> {
    let feedback = svc.list_feedback(recipe_id)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&feedback)?);
        return Ok(());
    }
    if feedback.is_empty() {
        println!("No feedback.");
        return Ok(());
    }

    #[derive(Tabled)]
    struct Row {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Recipe")]
        recipe_id: i64,
        #[tabled(rename = "User")]
        user_id: i64,
        #[tabled(rename = "Rating")]
        rating: String,
        #[tabled(rename = "Comments")]
        comments: String,
        #[tabled(rename = "When")]
        created_at: String,
    }

    let rows: Vec<Row> = feedback
        .iter()
        .map(|f| Row {
            id: f.id,
            recipe_id: f.recipe_id,
            user_id: f.user_id,
            rating: "*".repeat(usize::try_from(f.rating).unwrap_or(0)),
            comments: opt_text(f.comments.as_deref()),
            created_at: opt_text(f.created_at.as_deref()),
        })
        .collect();
    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..3)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}
