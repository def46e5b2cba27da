use anyhow::Result;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use nutri_core::auth::Session;
use nutri_core::models::{NewIngredient, NewRecipe, NutritionFacts, Recipe};
use nutri_core::service::NutritionService;

use super::helpers::{opt_num, opt_text, print_deletion_report, truncate};

#[derive(Tabled)]
struct RecipeRow {
    #[tabled(rename = "ID")]
    id: i64,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Cuisine")]
    cuisine: String,
    #[tabled(rename = "Prep")]
    prep: String,
    #[tabled(rename = "Cook")]
    cook: String,
    #[tabled(rename = "Calories")]
    calories: String,
}

fn minutes(v: Option<i64>) -> String {
    v.map_or_else(|| "-".into(), |m| format!("{m} min"))
}

pub(crate) fn cmd_recipe_add(
    svc: &NutritionService,
    session: &Session,
    recipe: NewRecipe,
    json: bool,
) -> Result<()> {
    let recipe = svc.add_recipe(session, &recipe)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&recipe)?);
    } else {
        println!("Added recipe '{}' (ID {})", recipe.name, recipe.id);
    }
    Ok(())
}

pub(crate) fn cmd_recipe_list(svc: &NutritionService, json: bool) -> Result<()> {
    let recipes = svc.browse_recipes()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&recipes)?);
        return Ok(());
    }
    if recipes.is_empty() {
        println!("No recipes.");
        return Ok(());
    }

    let rows: Vec<RecipeRow> = recipes
        .iter()
        .map(|r| RecipeRow {
            id: r.id,
            name: truncate(&r.name, 35),
            cuisine: opt_text(r.cuisine_type.as_deref()),
            prep: minutes(r.preparation_time_minutes),
            cook: minutes(r.cooking_time_minutes),
            calories: opt_num(r.calories, 0),
        })
        .collect();
    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(3..6)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}

fn print_recipe_header(recipe: &Recipe) {
    println!("{} (ID {})", recipe.name, recipe.id);
    if let Some(ref d) = recipe.description {
        println!("  {d}");
    }
    if let Some(ref c) = recipe.cuisine_type {
        println!("  Cuisine:  {c}");
    }
    println!(
        "  Time:     {} prep, {} cooking",
        minutes(recipe.preparation_time_minutes),
        minutes(recipe.cooking_time_minutes)
    );
    println!("  Calories: {}", opt_num(recipe.calories, 0));
}

pub(crate) fn cmd_recipe_show(svc: &NutritionService, recipe_id: i64, json: bool) -> Result<()> {
    let recipe = svc.recipe(recipe_id)?;
    let ingredients = svc.recipe_ingredients(recipe_id)?;

    if json {
        #[derive(serde::Serialize)]
        struct RecipeDetail<'a> {
            #[serde(flatten)]
            recipe: &'a Recipe,
            ingredients: &'a [nutri_core::models::RecipeIngredient],
        }
        let detail = RecipeDetail {
            recipe: &recipe,
            ingredients: &ingredients,
        };
        println!("{}", serde_json::to_string_pretty(&detail)?);
        return Ok(());
    }

    print_recipe_header(&recipe);
    if ingredients.is_empty() {
        println!("\nNo ingredients yet.");
        return Ok(());
    }

    #[derive(Tabled)]
    struct IngredientRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Ingredient")]
        name: String,
        #[tabled(rename = "Quantity")]
        quantity: String,
    }

    let rows: Vec<IngredientRow> = ingredients
        .iter()
        .map(|ri| IngredientRow {
            id: ri.ingredient_id,
            name: opt_text(ri.ingredient_name.as_deref()),
            quantity: format!("{:.2}", ri.quantity),
        })
        .collect();
    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..3)).with(Alignment::right()))
        .to_string();
    println!("\n{table}");
    Ok(())
}

pub(crate) fn cmd_recipe_add_ingredient(
    svc: &NutritionService,
    session: &Session,
    recipe_id: i64,
    ingredient_id: i64,
    quantity: f64,
    json: bool,
) -> Result<()> {
    let added = svc.add_recipe_ingredient(session, recipe_id, ingredient_id, quantity)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&added)?);
    } else {
        println!(
            "Added {} x {} to recipe {}",
            added.quantity,
            added.ingredient_name.as_deref().unwrap_or("ingredient"),
            added.recipe_id
        );
    }
    Ok(())
}

pub(crate) fn cmd_recipe_delete(
    svc: &NutritionService,
    session: &Session,
    recipe_id: i64,
    json: bool,
) -> Result<()> {
    let report = svc.delete_recipe(session, recipe_id)?;
    print_deletion_report(&report, json)
}

// --- Ingredients ---

pub(crate) fn cmd_ingredient_add(
    svc: &NutritionService,
    session: &Session,
    name: String,
    unit: Option<String>,
    category: Option<String>,
    json: bool,
) -> Result<()> {
    let ingredient = svc.add_ingredient(
        session,
        &NewIngredient {
            name,
            unit_of_measure: unit,
            category,
        },
    )?;
    if json {
        println!("{}", serde_json::to_string_pretty(&ingredient)?);
    } else {
        println!("Added ingredient '{}' (ID {})", ingredient.name, ingredient.id);
    }
    Ok(())
}

pub(crate) fn cmd_ingredient_list(svc: &NutritionService, json: bool) -> Result<()> {
    let ingredients = svc.list_ingredients()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&ingredients)?);
        return Ok(());
    }
    if ingredients.is_empty() {
        println!("No ingredients.");
        return Ok(());
    }

    #[derive(Tabled)]
    struct Row {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Unit")]
        unit: String,
        #[tabled(rename = "Category")]
        category: String,
    }

    let rows: Vec<Row> = ingredients
        .iter()
        .map(|i| Row {
            id: i.id,
            name: truncate(&i.name, 35),
            unit: opt_text(i.unit_of_measure.as_deref()),
            category: opt_text(i.category.as_deref()),
        })
        .collect();
    println!("{}", Table::new(&rows).with(Style::rounded()));
    Ok(())
}

pub(crate) fn cmd_ingredient_nutrition(
    svc: &NutritionService,
    session: &Session,
    facts: NutritionFacts,
    json: bool,
) -> Result<()> {
    let facts = svc.set_nutrition(session, &facts)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&facts)?);
    } else {
        println!(
            "Ingredient {}: {:.0} cal, P {}g, C {}g, F {}g per unit",
            facts.ingredient_id,
            facts.calories,
            opt_num(facts.protein_g, 1),
            opt_num(facts.carbs_g, 1),
            opt_num(facts.fat_g, 1)
        );
    }
    Ok(())
}

pub(crate) fn cmd_ingredient_delete(
    svc: &NutritionService,
    session: &Session,
    ingredient_id: i64,
    json: bool,
) -> Result<()> {
    let report = svc.delete_ingredient(session, ingredient_id)?;
    print_deletion_report(&report, json)
}
