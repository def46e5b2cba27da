//! Stored routines: SQL functions registered on every connection, plus
//! procedures dispatched by name with named arguments.
//!
//! `CalculateBMI` is usable inside any SQL text (the BMI triggers call it).
//! Calorie totals live in the `Recipe_Calories` view, which is what
//! `GetRecipeCalories` reads.

use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use rusqlite::Connection;
use rusqlite::functions::FunctionFlags;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::db::{Database, SqlOutcome, fetch_on};
use crate::error::DbError;
use crate::models::{NewFeedback, ResultTable};

/// Named arguments of a routine call.
pub type Args = Map<String, Value>;

/// BMI for a height in centimetres and a weight in kilograms, rounded to two decimals.
#[must_use]
pub fn calculate_bmi(height_cm: f64, weight_kg: f64) -> Option<f64> {
    if !(height_cm.is_finite() && weight_kg.is_finite()) || height_cm <= 0.0 || weight_kg <= 0.0 {
        return None;
    }
    let metres = height_cm / 100.0;
    Some((weight_kg / (metres * metres) * 100.0).round() / 100.0)
}

pub(crate) fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "CalculateBMI",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let height = ctx.get::<Option<f64>>(0)?;
            let weight = ctx.get::<Option<f64>>(1)?;
            Ok(height.zip(weight).and_then(|(h, w)| calculate_bmi(h, w)))
        },
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Function {
    CalculateBmi,
    GetRecipeCalories,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Procedure {
    GetMealPlanSummary,
    AddFeedback,
    UpdateUserWeight,
}

impl Function {
    pub const ALL: [Function; 2] = [Function::CalculateBmi, Function::GetRecipeCalories];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Function::CalculateBmi => "CalculateBMI",
            Function::GetRecipeCalories => "GetRecipeCalories",
        }
    }

    #[must_use]
    pub const fn params(self) -> &'static [&'static str] {
        match self {
            Function::CalculateBmi => &["height_cm", "weight_kg"],
            Function::GetRecipeCalories => &["recipe_id"],
        }
    }
}

impl Procedure {
    pub const ALL: [Procedure; 3] = [
        Procedure::GetMealPlanSummary,
        Procedure::AddFeedback,
        Procedure::UpdateUserWeight,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Procedure::GetMealPlanSummary => "GetMealPlanSummary",
            Procedure::AddFeedback => "AddFeedback",
            Procedure::UpdateUserWeight => "UpdateUserWeight",
        }
    }

    #[must_use]
    pub const fn params(self) -> &'static [&'static str] {
        match self {
            Procedure::GetMealPlanSummary => &["user_id"],
            Procedure::AddFeedback => &["user_id", "recipe_id", "rating", "comments"],
            Procedure::UpdateUserWeight => &["user_id", "new_weight"],
        }
    }
}

macro_rules! routine_name_impls {
    ($ty:ident, $what:literal) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }

        impl FromStr for $ty {
            type Err = DbError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $ty::ALL
                    .into_iter()
                    .find(|r| r.name().eq_ignore_ascii_case(s.trim()))
                    .ok_or_else(|| {
                        DbError::invalid(format!(
                            "Unknown {} '{s}'. Must be one of: {}",
                            $what,
                            $ty::ALL.map($ty::name).join(", ")
                        ))
                    })
            }
        }
    };
}

routine_name_impls!(Function, "function");
routine_name_impls!(Procedure, "procedure");

// --- Argument helpers ---

fn missing(name: &str, routine: &str) -> DbError {
    DbError::invalid(format!("Missing parameter '{name}' for {routine}"))
}

fn arg_i64(args: &Args, name: &str, routine: &str) -> Result<i64, DbError> {
    match args.get(name) {
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| DbError::invalid(format!("Parameter '{name}' must be an integer"))),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| DbError::invalid(format!("Parameter '{name}' must be an integer"))),
        _ => Err(missing(name, routine)),
    }
}

fn arg_f64(args: &Args, name: &str, routine: &str) -> Result<f64, DbError> {
    match args.get(name) {
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| DbError::invalid(format!("Parameter '{name}' must be a number"))),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| DbError::invalid(format!("Parameter '{name}' must be a number"))),
        _ => Err(missing(name, routine)),
    }
}

fn arg_opt_str(args: &Args, name: &str) -> Option<String> {
    match args.get(name) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    }
}

/// Parse `key=value` pairs into named arguments; numeric-looking values become numbers.
pub fn parse_args<'a>(pairs: impl IntoIterator<Item = &'a str>) -> Result<Args, DbError> {
    let mut args = Args::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| DbError::invalid(format!("Expected key=value, got '{pair}'")))?;
        let value = if let Ok(i) = value.parse::<i64>() {
            Value::from(i)
        } else if let Some(n) = value.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
            Value::Number(n)
        } else {
            Value::from(value)
        };
        args.insert(key.trim().to_string(), value);
    }
    Ok(args)
}

impl Database {
    pub fn recipe_calories(&self, recipe_id: i64) -> Result<f64> {
        self.conn()
            .query_row(
                "SELECT Calories FROM Recipe_Calories WHERE Recipe_ID = ?1",
                [recipe_id],
                |row| row.get(0),
            )
            .context("Recipe not found")
    }

    /// Every planned meal of a user's plans with its calories.
    pub fn meal_plan_summary(&self, user_id: i64) -> Result<ResultTable> {
        Ok(fetch_on(
            self.conn(),
            "SELECT mp.MealPlan_ID, mp.Plan_Name, mpr.Day_Of_Week, mpr.Meal_Type,
                    r.Recipe_Name, COALESCE(rc.Calories, 0) AS Calories
             FROM Meal_Plan mp
             JOIN MealPlan_Recipes mpr ON mpr.MealPlan_ID = mp.MealPlan_ID
             JOIN Recipe r ON r.Recipe_ID = mpr.Recipe_ID
             LEFT JOIN Recipe_Calories rc ON rc.Recipe_ID = r.Recipe_ID
             WHERE mp.User_ID = ?1
             ORDER BY mp.MealPlan_ID,
                      CASE mpr.Day_Of_Week
                        WHEN 'Monday' THEN 1 WHEN 'Tuesday' THEN 2 WHEN 'Wednesday' THEN 3
                        WHEN 'Thursday' THEN 4 WHEN 'Friday' THEN 5 WHEN 'Saturday' THEN 6
                        ELSE 7 END,
                      mpr.MPR_ID",
            [user_id],
        )?)
    }

    /// Set a user's weight; the triggers log the change and recompute BMI.
    /// Returns the rows changed, zero for an unknown user.
    pub fn update_user_weight(&self, user_id: i64, new_weight: f64) -> Result<usize> {
        Ok(usize::from(self.set_user_weight(user_id, new_weight)?))
    }

    pub fn call_function(&self, function: Function, args: &Args) -> Result<Value> {
        debug!(function = function.name(), "calling function");
        let name = function.name();
        let value = match function {
            Function::CalculateBmi => {
                let height = arg_f64(args, "height_cm", name)?;
                let weight = arg_f64(args, "weight_kg", name)?;
                let bmi: Option<f64> = self.conn().query_row(
                    "SELECT CalculateBMI(?1, ?2)",
                    rusqlite::params![height, weight],
                    |row| row.get(0),
                )?;
                bmi.map_or(Value::Null, Value::from)
            }
            Function::GetRecipeCalories => {
                let recipe_id = arg_i64(args, "recipe_id", name)?;
                Value::from(self.recipe_calories(recipe_id)?)
            }
        };
        Ok(value)
    }

    pub fn call_procedure(&self, procedure: Procedure, args: &Args) -> Result<SqlOutcome> {
        debug!(procedure = procedure.name(), "calling procedure");
        let name = procedure.name();
        match procedure {
            Procedure::GetMealPlanSummary => {
                let user_id = arg_i64(args, "user_id", name)?;
                Ok(SqlOutcome::Rows(self.meal_plan_summary(user_id)?))
            }
            Procedure::AddFeedback => {
                let feedback = NewFeedback {
                    user_id: arg_i64(args, "user_id", name)?,
                    recipe_id: arg_i64(args, "recipe_id", name)?,
                    rating: arg_i64(args, "rating", name)?,
                    comments: arg_opt_str(args, "comments"),
                };
                self.insert_feedback(&feedback)?;
                Ok(SqlOutcome::Affected { rows: 1 })
            }
            Procedure::UpdateUserWeight => {
                let user_id = arg_i64(args, "user_id", name)?;
                let new_weight = arg_f64(args, "new_weight", name)?;
                let rows = self.update_user_weight(user_id, new_weight)?;
                Ok(SqlOutcome::Affected { rows })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, classify};
    use crate::models::Role;
    use serde_json::json;

    fn args(value: Value) -> Args {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_calculate_bmi() {
        assert_eq!(calculate_bmi(180.0, 81.0), Some(25.0));
        assert_eq!(calculate_bmi(165.0, 60.0), Some(22.04));
        assert_eq!(calculate_bmi(0.0, 60.0), None);
        assert_eq!(calculate_bmi(170.0, f64::NAN), None);
    }

    #[test]
    fn test_bmi_function_in_sql() {
        let db = Database::open_in_memory().unwrap();
        let table = db
            .fetch("SELECT CalculateBMI(180, 81) AS bmi, CalculateBMI(NULL, 81) AS missing", [])
            .unwrap();
        assert_eq!(table.get(0, "bmi"), Some(&json!(25.0)));
        assert_eq!(table.get(0, "missing"), Some(&Value::Null));
    }

    #[test]
    fn test_routine_names_parse() {
        assert_eq!("calculatebmi".parse::<Function>().unwrap(), Function::CalculateBmi);
        assert_eq!(
            "UpdateUserWeight".parse::<Procedure>().unwrap(),
            Procedure::UpdateUserWeight
        );
        assert!("DropEverything".parse::<Procedure>().is_err());
    }

    #[test]
    fn test_parse_args() {
        let parsed = parse_args(["user_id=7", "new_weight=72.5", "comments=so good"]).unwrap();
        assert_eq!(parsed["user_id"], json!(7));
        assert_eq!(parsed["new_weight"], json!(72.5));
        assert_eq!(parsed["comments"], json!("so good"));
        assert!(parse_args(["oops"]).is_err());
    }

    #[test]
    fn test_call_function() {
        let db = Database::open_in_memory().unwrap();
        let bmi = db
            .call_function(
                Function::CalculateBmi,
                &args(json!({"height_cm": 180, "weight_kg": 81})),
            )
            .unwrap();
        assert_eq!(bmi, json!(25.0));

        let err = db
            .call_function(Function::CalculateBmi, &args(json!({"height_cm": 180})))
            .unwrap_err();
        assert_eq!(classify(&err), ErrorKind::Invalid);

        let err = db
            .call_function(Function::GetRecipeCalories, &args(json!({"recipe_id": 99})))
            .unwrap_err();
        assert_eq!(classify(&err), ErrorKind::NotFound);
    }

    #[test]
    fn test_procedures() {
        let db = Database::open_in_memory().unwrap();
        let user = db
            .insert_user("Ada", "ada@example.com", "x", Role::User)
            .unwrap();
        db.execute_batch(
            "INSERT INTO Recipe (Recipe_ID, Recipe_Name) VALUES (3, 'Dal');
             INSERT INTO Meal_Plan (MealPlan_ID, User_ID, Plan_Name) VALUES (1, 1, 'Week');
             INSERT INTO MealPlan_Recipes (MealPlan_ID, Recipe_ID, Meal_Type, Day_Of_Week)
                VALUES (1, 3, 'Dinner', 'Friday'), (1, 3, 'Lunch', 'Monday');",
        )
        .unwrap();

        let outcome = db
            .call_procedure(Procedure::GetMealPlanSummary, &args(json!({"user_id": user.id})))
            .unwrap();
        let SqlOutcome::Rows(summary) = outcome else {
            panic!("expected rows");
        };
        assert_eq!(summary.len(), 2);
        assert_eq!(summary.get(0, "Day_Of_Week"), Some(&json!("Monday")));

        db.call_procedure(
            Procedure::AddFeedback,
            &args(json!({"user_id": user.id, "recipe_id": 3, "rating": 4, "comments": "nice"})),
        )
        .unwrap();
        assert_eq!(db.list_feedback(Some(3)).unwrap()[0].rating, 4);

        db.call_procedure(
            Procedure::UpdateUserWeight,
            &args(json!({"user_id": user.id, "new_weight": "70.5"})),
        )
        .unwrap();
        assert_eq!(db.get_user(user.id).unwrap().weight_kg, Some(70.5));
        assert_eq!(db.weight_history(user.id).unwrap().len(), 1);

        let outcome = db
            .call_procedure(
                Procedure::UpdateUserWeight,
                &args(json!({"user_id": 404, "new_weight": 70})),
            )
            .unwrap();
        assert_eq!(outcome, SqlOutcome::Affected { rows: 0 });
        assert_eq!(db.weight_history(404).unwrap().len(), 0);
    }
}
