use anyhow::Result;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use nutri_core::auth::Session;
use nutri_core::models::{MealPlanView, NewMealPlan};
use nutri_core::service::NutritionService;

use super::helpers::{exit_not_found, opt_text, parse_date, truncate};

#[allow(clippy::too_many_arguments)]
pub(crate) fn cmd_meal_plan_add(
    svc: &NutritionService,
    session: &Session,
    user_id: i64,
    name: String,
    start: Option<String>,
    end: Option<String>,
    notes: Option<String>,
    json: bool,
) -> Result<()> {
    let start_date = start.map(|s| parse_date(Some(s))).transpose()?;
    let end_date = end.map(|s| parse_date(Some(s))).transpose()?;
    let plan = svc.add_meal_plan(
        session,
        &NewMealPlan {
            user_id,
            plan_name: name,
            start_date,
            end_date,
            notes,
        },
    )?;
    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        println!(
            "Created meal plan '{}' (ID {}) for user {}",
            plan.plan_name, plan.id, plan.user_id
        );
    }
    Ok(())
}

pub(crate) fn cmd_meal_plan_list(
    svc: &NutritionService,
    session: &Session,
    user_id: Option<i64>,
    json: bool,
) -> Result<()> {
    let plans = svc.list_meal_plans(session, user_id)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&plans)?);
        return Ok(());
    }
    if plans.is_empty() {
        println!("No meal plans.");
        return Ok(());
    }

    #[derive(Tabled)]
    struct Row {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "User")]
        user_id: i64,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Start")]
        start: String,
        #[tabled(rename = "End")]
        end: String,
        #[tabled(rename = "Notes")]
        notes: String,
    }

    let rows: Vec<Row> = plans
        .iter()
        .map(|p| Row {
            id: p.id,
            user_id: p.user_id,
            name: truncate(&p.plan_name, 30),
            start: opt_text(p.start_date.as_deref()),
            end: opt_text(p.end_date.as_deref()),
            notes: opt_text(p.notes.as_deref()),
        })
        .collect();
    println!("{}", Table::new(&rows).with(Style::rounded()));
    Ok(())
}

fn print_plan(view: &MealPlanView) {
    let plan = &view.plan;
    println!(
        "{} ({} to {})",
        plan.plan_name,
        plan.start_date.as_deref().unwrap_or("?"),
        plan.end_date.as_deref().unwrap_or("?")
    );
    if view.items.is_empty() {
        println!("\nNo recipes planned yet.");
        return;
    }

    #[derive(Tabled)]
    struct ItemRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Day")]
        day: String,
        #[tabled(rename = "Meal")]
        meal: String,
        #[tabled(rename = "Recipe")]
        recipe: String,
        #[tabled(rename = "Cuisine")]
        cuisine: String,
        #[tabled(rename = "Calories")]
        calories: String,
    }

    let rows: Vec<ItemRow> = view
        .items
        .iter()
        .map(|i| ItemRow {
            id: i.id,
            day: i.day_of_week.clone(),
            meal: i.meal_type.clone(),
            recipe: truncate(&i.recipe_name, 35),
            cuisine: opt_text(i.cuisine_type.as_deref()),
            calories: format!("{:.0}", i.calories),
        })
        .collect();
    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(5..6)).with(Alignment::right()))
        .to_string();
    println!("\n{table}");
}

pub(crate) fn cmd_meal_plan_show(svc: &NutritionService, session: &Session, json: bool) -> Result<()> {
    match svc.my_meal_plan(session)? {
        Some(view) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&view)?);
            } else {
                print_plan(&view);
            }
            Ok(())
        }
        None => exit_not_found(&format!("User {} has no meal plan", session.user_id), json),
    }
}

pub(crate) fn cmd_meal_plan_create(
    svc: &NutritionService,
    session: &Session,
    json: bool,
) -> Result<()> {
    let plan = svc.ensure_meal_plan(session)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        println!("Meal plan '{}' (ID {}) ready", plan.plan_name, plan.id);
    }
    Ok(())
}

pub(crate) fn cmd_meal_plan_add_recipe(
    svc: &NutritionService,
    session: &Session,
    recipe_id: i64,
    meal_type: &str,
    day_of_week: &str,
    json: bool,
) -> Result<()> {
    let view = svc.add_to_my_meal_plan(session, recipe_id, meal_type, day_of_week)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        println!("Added recipe {recipe_id} to '{}'", view.plan.plan_name);
        print_plan(&view);
    }
    Ok(())
}

pub(crate) fn cmd_meal_plan_remove(
    svc: &NutritionService,
    session: &Session,
    item_id: i64,
    json: bool,
) -> Result<()> {
    let removed = svc.remove_from_my_meal_plan(session, item_id)?;
    if json {
        println!("{}", serde_json::json!({ "id": item_id, "rows": usize::from(removed) }));
    } else if removed {
        println!("Removed item {item_id}");
    } else {
        println!("No meal plan item {item_id}, nothing removed");
    }
    Ok(())
}
