use std::fmt;
use std::io::Write;
use std::str::FromStr;

use anyhow::Result;
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DbError;

// --- Tabular results ---

/// Rows of a query with their column names, in select-list order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultTable {
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    #[must_use]
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.get(idx)
    }

    /// All values of one column, top to bottom.
    #[must_use]
    pub fn column(&self, name: &str) -> Vec<&Value> {
        match self.column_index(name) {
            Some(idx) => self.rows.iter().filter_map(|r| r.get(idx)).collect(),
            None => Vec::new(),
        }
    }

    /// Rows as JSON objects keyed by column name.
    #[must_use]
    pub fn to_records(&self) -> Vec<serde_json::Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(&self.columns)?;
        for row in &self.rows {
            wtr.write_record(row.iter().map(cell_text))?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// Plain-text rendering of a cell: strings unquoted, NULL as empty.
#[must_use]
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// --- Users ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            _ => Err(DbError::invalid(format!(
                "Invalid role '{s}'. Must be one of: user, admin"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub height_cm: Option<f64>,
    pub weight_kg: Option<f64>,
    pub bmi: Option<f64>,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    /// Plaintext; hashed before it reaches the database.
    pub password: String,
    pub role: Role,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileUpdate {
    pub name: String,
    pub height_cm: f64,
    pub weight_kg: f64,
}

// --- Recipes and ingredients ---

#[derive(Debug, Clone, Serialize)]
pub struct Recipe {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub cuisine_type: Option<String>,
    pub preparation_time_minutes: Option<i64>,
    pub cooking_time_minutes: Option<i64>,
    pub creator_user_id: Option<i64>,
    pub created_at: Option<String>,
    /// Filled by listings that join `GetRecipeCalories`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calories: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewRecipe {
    pub name: String,
    pub description: Option<String>,
    pub cuisine_type: Option<String>,
    #[serde(default)]
    pub preparation_time_minutes: i64,
    #[serde(default)]
    pub cooking_time_minutes: i64,
    pub creator_user_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Ingredient {
    pub id: i64,
    pub name: String,
    pub unit_of_measure: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewIngredient {
    pub name: String,
    pub unit_of_measure: Option<String>,
    pub category: Option<String>,
}

/// Nutrition per one unit of the ingredient's `Unit_Of_Measure`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NutritionFacts {
    pub ingredient_id: i64,
    pub calories: f64,
    pub protein_g: Option<f64>,
    pub carbs_g: Option<f64>,
    pub fat_g: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecipeIngredient {
    pub id: i64,
    pub recipe_id: i64,
    pub ingredient_id: i64,
    pub quantity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingredient_name: Option<String>,
}

// --- Meal plans ---

#[derive(Debug, Clone, Serialize)]
pub struct MealPlan {
    pub id: i64,
    pub user_id: i64,
    pub plan_name: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewMealPlan {
    pub user_id: i64,
    pub plan_name: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MealPlanItem {
    pub id: i64,
    pub recipe_id: i64,
    pub meal_type: String,
    pub day_of_week: String,
    pub recipe_name: String,
    pub cuisine_type: Option<String>,
    pub calories: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MealPlanView {
    pub plan: MealPlan,
    pub items: Vec<MealPlanItem>,
}

// --- Logs ---

#[derive(Debug, Clone, Serialize)]
pub struct DietLogEntry {
    pub id: i64,
    pub date: String,
    pub time: Option<String>,
    pub recipe_id: Option<i64>,
    pub recipe_name: Option<String>,
    pub portion_size: f64,
    pub notes: Option<String>,
    pub is_finished: bool,
}

#[derive(Debug, Clone)]
pub struct NewDietLogEntry {
    pub user_id: i64,
    pub recipe_id: i64,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub portion_size: f64,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WeightHistoryEntry {
    pub id: i64,
    pub user_id: i64,
    pub old_weight: Option<f64>,
    pub new_weight: f64,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Feedback {
    pub id: i64,
    pub user_id: i64,
    pub recipe_id: i64,
    pub rating: i64,
    pub comments: Option<String>,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewFeedback {
    pub user_id: i64,
    pub recipe_id: i64,
    pub rating: i64,
    pub comments: Option<String>,
}

// --- Validation ---

pub const MEAL_TYPES: &[&str] = &["Breakfast", "Lunch", "Dinner", "Snack"];

pub const DAYS_OF_WEEK: &[&str] = &[
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

pub const HEIGHT_RANGE_CM: (f64, f64) = (50.0, 250.0);
pub const WEIGHT_RANGE_KG: (f64, f64) = (20.0, 300.0);
pub const PORTION_RANGE: (f64, f64) = (0.5, 10.0);

fn canonical(value: &str, allowed: &[&str], what: &str) -> Result<String, DbError> {
    allowed
        .iter()
        .find(|a| a.eq_ignore_ascii_case(value.trim()))
        .map(|a| (*a).to_string())
        .ok_or_else(|| {
            DbError::invalid(format!(
                "Invalid {what} '{value}'. Must be one of: {}",
                allowed.join(", ")
            ))
        })
}

pub fn validate_meal_type(meal: &str) -> Result<String, DbError> {
    canonical(meal, MEAL_TYPES, "meal type")
}

pub fn validate_day_of_week(day: &str) -> Result<String, DbError> {
    canonical(day, DAYS_OF_WEEK, "day of week")
}

fn validate_range(value: f64, (lo, hi): (f64, f64), what: &str) -> Result<f64, DbError> {
    if value.is_finite() && (lo..=hi).contains(&value) {
        Ok(value)
    } else {
        Err(DbError::invalid(format!(
            "{what} must be between {lo} and {hi} (got {value})"
        )))
    }
}

pub fn validate_height_cm(height: f64) -> Result<f64, DbError> {
    validate_range(height, HEIGHT_RANGE_CM, "Height (cm)")
}

pub fn validate_weight_kg(weight: f64) -> Result<f64, DbError> {
    validate_range(weight, WEIGHT_RANGE_KG, "Weight (kg)")
}

pub fn validate_portion_size(portion: f64) -> Result<f64, DbError> {
    validate_range(portion, PORTION_RANGE, "Portion size")
}

pub fn validate_rating(rating: i64) -> Result<i64, DbError> {
    if (1..=5).contains(&rating) {
        Ok(rating)
    } else {
        Err(DbError::invalid(format!(
            "Rating must be between 1 and 5 (got {rating})"
        )))
    }
}

/// Entity ids handed to deletes and lookups are positive integers.
pub fn validate_id(id: i64, what: &str) -> Result<i64, DbError> {
    if id > 0 {
        Ok(id)
    } else {
        Err(DbError::invalid(format!(
            "{what} id must be a positive integer (got {id})"
        )))
    }
}

pub fn validate_required<'a>(value: &'a str, field: &str) -> Result<&'a str, DbError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(DbError::invalid(format!("{field} must not be empty")))
    } else {
        Ok(trimmed)
    }
}

pub fn validate_email(email: &str) -> Result<String, DbError> {
    let email = validate_required(email, "Email")?;
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {
            Ok(email.to_string())
        }
        _ => Err(DbError::invalid(format!("Invalid email address '{email}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meal_type_canonicalised() {
        assert_eq!(validate_meal_type("breakfast").unwrap(), "Breakfast");
        assert_eq!(validate_meal_type("SNACK").unwrap(), "Snack");
        assert!(validate_meal_type("brunch").is_err());
        assert!(validate_meal_type("").is_err());
    }

    #[test]
    fn test_day_of_week() {
        assert_eq!(validate_day_of_week("monday").unwrap(), "Monday");
        assert_eq!(validate_day_of_week(" Sunday ").unwrap(), "Sunday");
        assert!(validate_day_of_week("Funday").is_err());
    }

    #[test]
    fn test_ranges() {
        assert!(validate_height_cm(50.0).is_ok());
        assert!(validate_height_cm(250.0).is_ok());
        assert!(validate_height_cm(49.9).is_err());
        assert!(validate_weight_kg(f64::NAN).is_err());
        assert!(validate_weight_kg(300.1).is_err());
        assert!(validate_portion_size(0.5).is_ok());
        assert!(validate_portion_size(0.0).is_err());
    }

    #[test]
    fn test_rating_bounds() {
        assert!(validate_rating(1).is_ok());
        assert!(validate_rating(5).is_ok());
        assert!(validate_rating(0).is_err());
        assert!(validate_rating(6).is_err());
    }

    #[test]
    fn test_validate_id() {
        assert_eq!(validate_id(7, "User").unwrap(), 7);
        assert!(validate_id(0, "User").is_err());
        assert!(validate_id(-3, "Recipe").is_err());
    }

    #[test]
    fn test_validate_email() {
        assert_eq!(validate_email(" a@b.c ").unwrap(), "a@b.c");
        assert!(validate_email("nobody").is_err());
        assert!(validate_email("@b.c").is_err());
        assert!(validate_email("   ").is_err());
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("Admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert!("root".parse::<Role>().is_err());
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
    }

    #[test]
    fn test_result_table_accessors() {
        let table = ResultTable {
            columns: vec!["User_ID".into(), "Name".into()],
            rows: vec![
                vec![Value::from(1), Value::from("Ada")],
                vec![Value::from(2), Value::Null],
            ],
        };
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(0, "name"), Some(&Value::from("Ada")));
        assert_eq!(table.column("User_ID"), vec![&Value::from(1), &Value::from(2)]);
        assert!(table.column("missing").is_empty());

        let records = table.to_records();
        assert_eq!(records[1]["Name"], Value::Null);
    }

    #[test]
    fn test_result_table_csv() {
        let table = ResultTable {
            columns: vec!["Recipe_Name".into(), "Calories".into()],
            rows: vec![vec![Value::from("Dal, spicy"), Value::from(412.5)]],
        };
        let mut out = Vec::new();
        table.write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "Recipe_Name,Calories\n\"Dal, spicy\",412.5\n");
    }
}
