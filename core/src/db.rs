use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;
use rusqlite::types::{Type, ValueRef};
use rusqlite::{Batch, Connection, OptionalExtension, Params, Transaction, params};
use serde_json::Value;

use crate::error::DbError;
use crate::models::{
    DietLogEntry, Feedback, Ingredient, MealPlan, MealPlanItem, NewDietLogEntry, NewFeedback,
    NewIngredient, NewMealPlan, NewRecipe, NutritionFacts, ProfileUpdate, Recipe,
    RecipeIngredient, ResultTable, Role, User, WeightHistoryEntry, validate_day_of_week,
    validate_email, validate_height_cm, validate_meal_type, validate_portion_size,
    validate_rating, validate_required, validate_weight_kg,
};
use crate::routines;
use crate::schema::Table;

pub struct Database {
    conn: Connection,
}

/// Outcome of a free-form statement: rows for queries, a count for everything else.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SqlOutcome {
    Rows(ResultTable),
    Affected { rows: usize },
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        routines::register_functions(&conn).context("Failed to register SQL functions")?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    #[allow(clippy::too_many_lines)]
    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS User (
                    User_ID INTEGER PRIMARY KEY AUTOINCREMENT,
                    Name TEXT NOT NULL,
                    Email TEXT NOT NULL UNIQUE,
                    Password TEXT NOT NULL,
                    role TEXT NOT NULL DEFAULT 'user' CHECK (role IN ('user', 'admin')),
                    Height_cm REAL,
                    Weight_kg REAL,
                    BMI REAL,
                    Created_At TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now'))
                );

                CREATE TABLE IF NOT EXISTS Recipe (
                    Recipe_ID INTEGER PRIMARY KEY AUTOINCREMENT,
                    Recipe_Name TEXT NOT NULL,
                    Description TEXT,
                    Cuisine_Type TEXT,
                    Preparation_Time_minutes INTEGER,
                    Cooking_Time_minutes INTEGER,
                    Creator_User_ID INTEGER REFERENCES User(User_ID),
                    Created_At TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now'))
                );

                CREATE TABLE IF NOT EXISTS Ingredient (
                    Ingredient_ID INTEGER PRIMARY KEY AUTOINCREMENT,
                    Ingredient_Name TEXT NOT NULL,
                    Unit_Of_Measure TEXT,
                    Category TEXT
                );

                CREATE TABLE IF NOT EXISTS Recipe_Ingredient (
                    Recipe_Ingredient_ID INTEGER PRIMARY KEY AUTOINCREMENT,
                    Recipe_ID INTEGER NOT NULL REFERENCES Recipe(Recipe_ID),
                    Ingredient_ID INTEGER NOT NULL REFERENCES Ingredient(Ingredient_ID),
                    Quantity REAL NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS Nutrition (
                    Nutrition_ID INTEGER PRIMARY KEY AUTOINCREMENT,
                    Ingredient_ID INTEGER NOT NULL UNIQUE REFERENCES Ingredient(Ingredient_ID),
                    Calories REAL NOT NULL DEFAULT 0,
                    Protein_g REAL,
                    Carbs_g REAL,
                    Fat_g REAL
                );

                CREATE TABLE IF NOT EXISTS Meal_Plan (
                    MealPlan_ID INTEGER PRIMARY KEY AUTOINCREMENT,
                    User_ID INTEGER NOT NULL REFERENCES User(User_ID),
                    Plan_Name TEXT NOT NULL,
                    Start_Date TEXT,
                    End_Date TEXT,
                    Notes TEXT
                );

                CREATE TABLE IF NOT EXISTS MealPlan_Recipes (
                    MPR_ID INTEGER PRIMARY KEY AUTOINCREMENT,
                    MealPlan_ID INTEGER NOT NULL REFERENCES Meal_Plan(MealPlan_ID),
                    Recipe_ID INTEGER NOT NULL REFERENCES Recipe(Recipe_ID),
                    Meal_Type TEXT NOT NULL
                        CHECK (Meal_Type IN ('Breakfast', 'Lunch', 'Dinner', 'Snack')),
                    Day_Of_Week TEXT NOT NULL
                        CHECK (Day_Of_Week IN ('Monday', 'Tuesday', 'Wednesday', 'Thursday',
                                               'Friday', 'Saturday', 'Sunday'))
                );

                CREATE TABLE IF NOT EXISTS User_Diet_Log (
                    Log_ID INTEGER PRIMARY KEY AUTOINCREMENT,
                    User_ID INTEGER NOT NULL REFERENCES User(User_ID),
                    Recipe_ID INTEGER REFERENCES Recipe(Recipe_ID),
                    Date TEXT NOT NULL,
                    Time TEXT,
                    Portion_Size REAL NOT NULL DEFAULT 1,
                    Notes TEXT,
                    is_finished INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS User_Weight_History (
                    History_ID INTEGER PRIMARY KEY AUTOINCREMENT,
                    User_ID INTEGER NOT NULL REFERENCES User(User_ID),
                    Old_Weight REAL,
                    New_Weight REAL NOT NULL,
                    Updated_At TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
                );

                CREATE TABLE IF NOT EXISTS Feedback (
                    Feedback_ID INTEGER PRIMARY KEY AUTOINCREMENT,
                    User_ID INTEGER NOT NULL REFERENCES User(User_ID),
                    Recipe_ID INTEGER NOT NULL REFERENCES Recipe(Recipe_ID),
                    Rating INTEGER NOT NULL CHECK (Rating BETWEEN 1 AND 5),
                    Comments TEXT,
                    Created_At TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now'))
                );

                CREATE TABLE IF NOT EXISTS Recipe_Log (
                    Log_ID INTEGER PRIMARY KEY AUTOINCREMENT,
                    Recipe_ID INTEGER REFERENCES Recipe(Recipe_ID),
                    Action TEXT NOT NULL,
                    Created_By INTEGER REFERENCES User(User_ID),
                    Logged_At TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
                );

                CREATE INDEX IF NOT EXISTS idx_recipe_creator ON Recipe(Creator_User_ID);
                CREATE INDEX IF NOT EXISTS idx_meal_plan_user ON Meal_Plan(User_ID);
                CREATE INDEX IF NOT EXISTS idx_mpr_plan ON MealPlan_Recipes(MealPlan_ID);
                CREATE INDEX IF NOT EXISTS idx_mpr_recipe ON MealPlan_Recipes(Recipe_ID);
                CREATE INDEX IF NOT EXISTS idx_diet_log_user ON User_Diet_Log(User_ID);
                CREATE INDEX IF NOT EXISTS idx_weight_history_user ON User_Weight_History(User_ID);
                CREATE INDEX IF NOT EXISTS idx_feedback_recipe ON Feedback(Recipe_ID);
                CREATE INDEX IF NOT EXISTS idx_recipe_ingredient_recipe ON Recipe_Ingredient(Recipe_ID);

                PRAGMA user_version = 1;",
            )?;
        }

        if version < 2 {
            // Routines kept inside the database: calorie view and the three triggers.
            self.conn.execute_batch(
                "CREATE VIEW IF NOT EXISTS Recipe_Calories AS
                    SELECT r.Recipe_ID AS Recipe_ID,
                           COALESCE(SUM(ri.Quantity * n.Calories), 0) AS Calories
                    FROM Recipe r
                    LEFT JOIN Recipe_Ingredient ri ON ri.Recipe_ID = r.Recipe_ID
                    LEFT JOIN Nutrition n ON n.Ingredient_ID = ri.Ingredient_ID
                    GROUP BY r.Recipe_ID;

                CREATE TRIGGER IF NOT EXISTS trg_user_weight_history
                AFTER UPDATE OF Weight_kg ON User
                WHEN NEW.Weight_kg IS NOT NULL AND NEW.Weight_kg IS NOT OLD.Weight_kg
                BEGIN
                    INSERT INTO User_Weight_History (User_ID, Old_Weight, New_Weight)
                    VALUES (NEW.User_ID, OLD.Weight_kg, NEW.Weight_kg);
                END;

                CREATE TRIGGER IF NOT EXISTS trg_user_bmi_update
                AFTER UPDATE OF Height_cm, Weight_kg ON User
                BEGIN
                    UPDATE User SET BMI = CalculateBMI(NEW.Height_cm, NEW.Weight_kg)
                    WHERE User_ID = NEW.User_ID;
                END;

                CREATE TRIGGER IF NOT EXISTS trg_user_bmi_insert
                AFTER INSERT ON User
                WHEN NEW.Height_cm IS NOT NULL AND NEW.Weight_kg IS NOT NULL
                BEGIN
                    UPDATE User SET BMI = CalculateBMI(NEW.Height_cm, NEW.Weight_kg)
                    WHERE User_ID = NEW.User_ID;
                END;

                CREATE TRIGGER IF NOT EXISTS trg_recipe_insert_log
                AFTER INSERT ON Recipe
                BEGIN
                    INSERT INTO Recipe_Log (Recipe_ID, Action, Created_By)
                    VALUES (NEW.Recipe_ID, 'INSERT', NEW.Creator_User_ID);
                END;

                PRAGMA user_version = 2;",
            )?;
        }

        Ok(())
    }

    // --- Gateway ---

    /// Run one mutating statement in its own transaction; returns rows affected.
    pub fn execute<P: Params>(&self, statement: &str, params: P) -> Result<usize, DbError> {
        let tx = self.conn.unchecked_transaction()?;
        let rows = tx.execute(statement, params)?;
        tx.commit()?;
        Ok(rows)
    }

    /// Run verbatim SQL text, possibly several statements, without parameters.
    pub fn execute_batch(&self, sql: &str) -> Result<(), DbError> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    pub fn fetch<P: Params>(&self, query: &str, params: P) -> Result<ResultTable, DbError> {
        fetch_on(&self.conn, query, params)
    }

    /// Every row of a known table, ordered by primary key.
    pub fn load_table(&self, table: Table) -> Result<ResultTable, DbError> {
        self.fetch(
            &format!(
                "SELECT * FROM {} ORDER BY {}",
                table.name(),
                table.primary_key()
            ),
            [],
        )
    }

    /// Run `f` inside one transaction: committed on `Ok`, rolled back on `Err`.
    pub fn transaction<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let tx = self.conn.unchecked_transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Run `f` inside a transaction that is always rolled back.
    pub fn rehearse<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let tx = self.conn.unchecked_transaction()?;
        let out = f(&tx);
        tx.rollback()?;
        out
    }

    /// Single statement of unknown shape: queries return rows, anything else a count.
    /// Text holding more than one statement is refused before anything runs.
    pub fn run_sql(&self, sql: &str) -> Result<SqlOutcome, DbError> {
        let mut batch = Batch::new(&self.conn, sql);
        let Some(returns_rows) = batch.next()?.map(|stmt| stmt.column_count() > 0) else {
            return Err(DbError::invalid("SQL statement is empty"));
        };
        if batch.next()?.is_some() {
            return Err(DbError::invalid("Run one statement at a time"));
        }
        if returns_rows {
            Ok(SqlOutcome::Rows(self.fetch(sql, [])?))
        } else {
            Ok(SqlOutcome::Affected {
                rows: self.execute(sql, [])?,
            })
        }
    }

    pub fn list_tables(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    pub fn list_triggers(&self) -> Result<ResultTable> {
        Ok(self.fetch(
            "SELECT name AS Trigger_Name, tbl_name AS Table_Name, sql AS Statement
             FROM sqlite_master WHERE type = 'trigger' ORDER BY name",
            [],
        )?)
    }

    pub fn list_views(&self) -> Result<ResultTable> {
        Ok(self.fetch(
            "SELECT name AS View_Name, sql AS Statement
             FROM sqlite_master WHERE type = 'view' ORDER BY name",
            [],
        )?)
    }

    // --- Row mapping helpers ---

    fn user_from_row(row: &rusqlite::Row) -> rusqlite::Result<User> {
        let role: String = row.get(3)?;
        let role = role
            .parse::<Role>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;
        Ok(User {
            id: row.get(0)?,
            name: row.get(1)?,
            email: row.get(2)?,
            role,
            height_cm: row.get(4)?,
            weight_kg: row.get(5)?,
            bmi: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    // Expects RECIPE_SELECT column order; column 8 is the joined calorie total.
    fn recipe_from_row(row: &rusqlite::Row) -> rusqlite::Result<Recipe> {
        Ok(Recipe {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            cuisine_type: row.get(3)?,
            preparation_time_minutes: row.get(4)?,
            cooking_time_minutes: row.get(5)?,
            creator_user_id: row.get(6)?,
            created_at: row.get(7)?,
            calories: row.get(8)?,
        })
    }

    fn ingredient_from_row(row: &rusqlite::Row) -> rusqlite::Result<Ingredient> {
        Ok(Ingredient {
            id: row.get(0)?,
            name: row.get(1)?,
            unit_of_measure: row.get(2)?,
            category: row.get(3)?,
        })
    }

    fn meal_plan_from_row(row: &rusqlite::Row) -> rusqlite::Result<MealPlan> {
        Ok(MealPlan {
            id: row.get(0)?,
            user_id: row.get(1)?,
            plan_name: row.get(2)?,
            start_date: row.get(3)?,
            end_date: row.get(4)?,
            notes: row.get(5)?,
        })
    }

    fn diet_log_from_row(row: &rusqlite::Row) -> rusqlite::Result<DietLogEntry> {
        Ok(DietLogEntry {
            id: row.get(0)?,
            date: row.get(1)?,
            time: row.get(2)?,
            recipe_id: row.get(3)?,
            recipe_name: row.get(4)?,
            portion_size: row.get(5)?,
            notes: row.get(6)?,
            is_finished: row.get(7)?,
        })
    }

    fn feedback_from_row(row: &rusqlite::Row) -> rusqlite::Result<Feedback> {
        Ok(Feedback {
            id: row.get(0)?,
            user_id: row.get(1)?,
            recipe_id: row.get(2)?,
            rating: row.get(3)?,
            comments: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    // --- Users ---

    /// Insert a user whose password has already been hashed.
    pub fn insert_user(
        &self,
        name: &str,
        email: &str,
        password_hash: &str,
        role: Role,
    ) -> Result<User> {
        let name = validate_required(name, "Name")?;
        let email = validate_email(email)?;
        self.conn.execute(
            "INSERT INTO User (Name, Email, Password, role) VALUES (?1, ?2, ?3, ?4)",
            params![name, email, password_hash, role.as_str()],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_user(id)
    }

    pub fn get_user(&self, id: i64) -> Result<User> {
        self.conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM User WHERE User_ID = ?1"),
                params![id],
                Self::user_from_row,
            )
            .context("User not found")
    }

    /// The user with this email together with the stored password column.
    pub fn find_credentials(&self, email: &str) -> Result<Option<(User, String)>> {
        let found = self
            .conn
            .query_row(
                &format!("SELECT {USER_COLUMNS}, Password FROM User WHERE Email = ?1"),
                params![email.trim()],
                |row| Ok((Self::user_from_row(row)?, row.get(8)?)),
            )
            .optional()?;
        Ok(found)
    }

    pub fn email_exists(&self, email: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM User WHERE Email = ?1",
            params![email.trim()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {USER_COLUMNS} FROM User ORDER BY User_ID"))?;
        let users = stmt
            .query_map([], Self::user_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    /// Name, height and weight in one statement; the triggers recompute BMI
    /// and log the weight change. `None` when no user has that id.
    pub fn update_profile(&self, user_id: i64, update: &ProfileUpdate) -> Result<Option<User>> {
        let name = validate_required(&update.name, "Name")?;
        let height = validate_height_cm(update.height_cm)?;
        let weight = validate_weight_kg(update.weight_kg)?;
        let rows = self.execute(
            "UPDATE User SET Name = ?1, Height_cm = ?2, Weight_kg = ?3 WHERE User_ID = ?4",
            params![name, height, weight, user_id],
        )?;
        if rows == 0 {
            return Ok(None);
        }
        self.get_user(user_id).map(Some)
    }

    pub fn set_user_weight(&self, user_id: i64, weight_kg: f64) -> Result<bool> {
        let weight = validate_weight_kg(weight_kg)?;
        let rows = self.execute(
            "UPDATE User SET Weight_kg = ?1 WHERE User_ID = ?2",
            params![weight, user_id],
        )?;
        Ok(rows > 0)
    }

    pub fn set_password(&self, user_id: i64, password_hash: &str) -> Result<usize> {
        Ok(self.execute(
            "UPDATE User SET Password = ?1 WHERE User_ID = ?2",
            params![password_hash, user_id],
        )?)
    }

    /// `(User_ID, Password)` for every user, used by the password upgrade.
    pub fn stored_passwords(&self) -> Result<Vec<(i64, String)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT User_ID, Password FROM User ORDER BY User_ID")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // --- Recipes ---

    pub fn insert_recipe(&self, recipe: &NewRecipe) -> Result<Recipe> {
        let name = validate_required(&recipe.name, "Recipe name")?;
        self.conn.execute(
            "INSERT INTO Recipe (Recipe_Name, Description, Cuisine_Type,
                                 Preparation_Time_minutes, Cooking_Time_minutes, Creator_User_ID)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                name,
                recipe.description,
                recipe.cuisine_type,
                recipe.preparation_time_minutes,
                recipe.cooking_time_minutes,
                recipe.creator_user_id,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_recipe(id)
    }

    pub fn get_recipe(&self, id: i64) -> Result<Recipe> {
        self.conn
            .query_row(
                &format!("{RECIPE_SELECT} WHERE r.Recipe_ID = ?1"),
                params![id],
                Self::recipe_from_row,
            )
            .context("Recipe not found")
    }

    /// All recipes with their calorie totals.
    pub fn list_recipes(&self) -> Result<Vec<Recipe>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{RECIPE_SELECT} ORDER BY r.Recipe_ID"))?;
        let recipes = stmt
            .query_map([], Self::recipe_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(recipes)
    }

    pub fn add_recipe_ingredient(
        &self,
        recipe_id: i64,
        ingredient_id: i64,
        quantity: f64,
    ) -> Result<RecipeIngredient> {
        if !(quantity.is_finite() && quantity > 0.0) {
            return Err(DbError::invalid(format!("Quantity must be positive (got {quantity})")).into());
        }
        self.conn.execute(
            "INSERT INTO Recipe_Ingredient (Recipe_ID, Ingredient_ID, Quantity) VALUES (?1, ?2, ?3)",
            params![recipe_id, ingredient_id, quantity],
        )?;
        Ok(RecipeIngredient {
            id: self.conn.last_insert_rowid(),
            recipe_id,
            ingredient_id,
            quantity,
            ingredient_name: None,
        })
    }

    pub fn recipe_ingredients(&self, recipe_id: i64) -> Result<Vec<RecipeIngredient>> {
        let mut stmt = self.conn.prepare(
            "SELECT ri.Recipe_Ingredient_ID, ri.Recipe_ID, ri.Ingredient_ID, ri.Quantity, i.Ingredient_Name
             FROM Recipe_Ingredient ri
             JOIN Ingredient i ON i.Ingredient_ID = ri.Ingredient_ID
             WHERE ri.Recipe_ID = ?1
             ORDER BY ri.Recipe_Ingredient_ID",
        )?;
        let items = stmt
            .query_map(params![recipe_id], |row| {
                Ok(RecipeIngredient {
                    id: row.get(0)?,
                    recipe_id: row.get(1)?,
                    ingredient_id: row.get(2)?,
                    quantity: row.get(3)?,
                    ingredient_name: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    // --- Ingredients ---

    pub fn insert_ingredient(&self, ingredient: &NewIngredient) -> Result<Ingredient> {
        let name = validate_required(&ingredient.name, "Ingredient name")?;
        self.conn.execute(
            "INSERT INTO Ingredient (Ingredient_Name, Unit_Of_Measure, Category) VALUES (?1, ?2, ?3)",
            params![name, ingredient.unit_of_measure, ingredient.category],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_ingredient(id)
    }

    pub fn get_ingredient(&self, id: i64) -> Result<Ingredient> {
        self.conn
            .query_row(
                "SELECT Ingredient_ID, Ingredient_Name, Unit_Of_Measure, Category
                 FROM Ingredient WHERE Ingredient_ID = ?1",
                params![id],
                Self::ingredient_from_row,
            )
            .context("Ingredient not found")
    }

    pub fn list_ingredients(&self) -> Result<Vec<Ingredient>> {
        let mut stmt = self.conn.prepare(
            "SELECT Ingredient_ID, Ingredient_Name, Unit_Of_Measure, Category
             FROM Ingredient ORDER BY Ingredient_Name",
        )?;
        let items = stmt
            .query_map([], Self::ingredient_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    /// Insert or replace the nutrition row of an ingredient.
    pub fn set_nutrition(&self, facts: &NutritionFacts) -> Result<NutritionFacts> {
        if !(facts.calories.is_finite() && facts.calories >= 0.0) {
            return Err(DbError::invalid("Calories must be zero or more").into());
        }
        self.conn.execute(
            "INSERT INTO Nutrition (Ingredient_ID, Calories, Protein_g, Carbs_g, Fat_g)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(Ingredient_ID) DO UPDATE SET
                Calories = excluded.Calories,
                Protein_g = excluded.Protein_g,
                Carbs_g = excluded.Carbs_g,
                Fat_g = excluded.Fat_g",
            params![
                facts.ingredient_id,
                facts.calories,
                facts.protein_g,
                facts.carbs_g,
                facts.fat_g,
            ],
        )?;
        self.get_nutrition(facts.ingredient_id)?
            .context("Nutrition not found after upsert")
    }

    pub fn get_nutrition(&self, ingredient_id: i64) -> Result<Option<NutritionFacts>> {
        let facts = self
            .conn
            .query_row(
                "SELECT Ingredient_ID, Calories, Protein_g, Carbs_g, Fat_g
                 FROM Nutrition WHERE Ingredient_ID = ?1",
                params![ingredient_id],
                |row| {
                    Ok(NutritionFacts {
                        ingredient_id: row.get(0)?,
                        calories: row.get(1)?,
                        protein_g: row.get(2)?,
                        carbs_g: row.get(3)?,
                        fat_g: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(facts)
    }

    // --- Meal Plans ---

    pub fn insert_meal_plan(&self, plan: &NewMealPlan) -> Result<MealPlan> {
        let name = validate_required(&plan.plan_name, "Plan name")?;
        if let (Some(start), Some(end)) = (plan.start_date, plan.end_date) {
            if end < start {
                return Err(DbError::invalid("End date must not be before start date").into());
            }
        }
        self.conn.execute(
            "INSERT INTO Meal_Plan (User_ID, Plan_Name, Start_Date, End_Date, Notes)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                plan.user_id,
                name,
                plan.start_date.map(|d| d.format("%Y-%m-%d").to_string()),
                plan.end_date.map(|d| d.format("%Y-%m-%d").to_string()),
                plan.notes,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_meal_plan(id)
    }

    pub fn get_meal_plan(&self, id: i64) -> Result<MealPlan> {
        self.conn
            .query_row(
                &format!("SELECT {MEAL_PLAN_COLUMNS} FROM Meal_Plan WHERE MealPlan_ID = ?1"),
                params![id],
                Self::meal_plan_from_row,
            )
            .context("Meal plan not found")
    }

    pub fn list_meal_plans(&self, user_id: Option<i64>) -> Result<Vec<MealPlan>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {MEAL_PLAN_COLUMNS} FROM Meal_Plan
             WHERE ?1 IS NULL OR User_ID = ?1
             ORDER BY MealPlan_ID"
        ))?;
        let plans = stmt
            .query_map(params![user_id], Self::meal_plan_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(plans)
    }

    /// The user's oldest meal plan, if any.
    pub fn first_meal_plan(&self, user_id: i64) -> Result<Option<MealPlan>> {
        let plan = self
            .conn
            .query_row(
                &format!(
                    "SELECT {MEAL_PLAN_COLUMNS} FROM Meal_Plan
                     WHERE User_ID = ?1 ORDER BY MealPlan_ID LIMIT 1"
                ),
                params![user_id],
                Self::meal_plan_from_row,
            )
            .optional()?;
        Ok(plan)
    }

    pub fn add_meal_plan_item(
        &self,
        meal_plan_id: i64,
        recipe_id: i64,
        meal_type: &str,
        day_of_week: &str,
    ) -> Result<i64> {
        let meal_type = validate_meal_type(meal_type)?;
        let day = validate_day_of_week(day_of_week)?;
        self.conn.execute(
            "INSERT INTO MealPlan_Recipes (MealPlan_ID, Recipe_ID, Meal_Type, Day_Of_Week)
             VALUES (?1, ?2, ?3, ?4)",
            params![meal_plan_id, recipe_id, meal_type, day],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Items of a plan, Monday first, then in insertion order.
    pub fn meal_plan_items(&self, meal_plan_id: i64) -> Result<Vec<MealPlanItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT mpr.MPR_ID, mpr.Recipe_ID, mpr.Meal_Type, mpr.Day_Of_Week,
                    r.Recipe_Name, r.Cuisine_Type, COALESCE(rc.Calories, 0)
             FROM MealPlan_Recipes mpr
             JOIN Recipe r ON r.Recipe_ID = mpr.Recipe_ID
             LEFT JOIN Recipe_Calories rc ON rc.Recipe_ID = mpr.Recipe_ID
             WHERE mpr.MealPlan_ID = ?1
             ORDER BY CASE mpr.Day_Of_Week
                        WHEN 'Monday' THEN 1 WHEN 'Tuesday' THEN 2 WHEN 'Wednesday' THEN 3
                        WHEN 'Thursday' THEN 4 WHEN 'Friday' THEN 5 WHEN 'Saturday' THEN 6
                        ELSE 7 END,
                      mpr.MPR_ID",
        )?;
        let items = stmt
            .query_map(params![meal_plan_id], |row| {
                Ok(MealPlanItem {
                    id: row.get(0)?,
                    recipe_id: row.get(1)?,
                    meal_type: row.get(2)?,
                    day_of_week: row.get(3)?,
                    recipe_name: row.get(4)?,
                    cuisine_type: row.get(5)?,
                    calories: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    pub fn delete_meal_plan_item(&self, meal_plan_id: i64, item_id: i64) -> Result<bool> {
        let rows = self.execute(
            "DELETE FROM MealPlan_Recipes WHERE MPR_ID = ?1 AND MealPlan_ID = ?2",
            params![item_id, meal_plan_id],
        )?;
        Ok(rows > 0)
    }

    // --- Diet Log ---

    pub fn insert_diet_log(&self, entry: &NewDietLogEntry) -> Result<DietLogEntry> {
        let portion = validate_portion_size(entry.portion_size)?;
        self.conn.execute(
            "INSERT INTO User_Diet_Log (User_ID, Recipe_ID, Date, Time, Portion_Size, Notes, is_finished)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
            params![
                entry.user_id,
                entry.recipe_id,
                entry.date.format("%Y-%m-%d").to_string(),
                entry.time.format("%H:%M:%S").to_string(),
                portion,
                entry.notes,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.conn
            .query_row(
                &format!("{DIET_LOG_SELECT} WHERE l.Log_ID = ?1"),
                params![id],
                Self::diet_log_from_row,
            )
            .context("Diet log entry not found")
    }

    /// A user's diet log, newest first.
    pub fn diet_log(&self, user_id: i64) -> Result<Vec<DietLogEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "{DIET_LOG_SELECT} WHERE l.User_ID = ?1
             ORDER BY l.Date DESC, l.Time DESC, l.Log_ID DESC"
        ))?;
        let entries = stmt
            .query_map(params![user_id], Self::diet_log_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn set_diet_log_finished(&self, user_id: i64, log_id: i64, finished: bool) -> Result<bool> {
        let rows = self.execute(
            "UPDATE User_Diet_Log SET is_finished = ?1 WHERE Log_ID = ?2 AND User_ID = ?3",
            params![finished, log_id, user_id],
        )?;
        Ok(rows > 0)
    }

    pub fn delete_diet_log(&self, user_id: i64, log_id: i64) -> Result<bool> {
        let rows = self.execute(
            "DELETE FROM User_Diet_Log WHERE Log_ID = ?1 AND User_ID = ?2",
            params![log_id, user_id],
        )?;
        Ok(rows > 0)
    }

    // --- Weight History ---

    /// Oldest change first.
    pub fn weight_history(&self, user_id: i64) -> Result<Vec<WeightHistoryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT History_ID, User_ID, Old_Weight, New_Weight, Updated_At
             FROM User_Weight_History WHERE User_ID = ?1
             ORDER BY Updated_At ASC, History_ID ASC",
        )?;
        let entries = stmt
            .query_map(params![user_id], |row| {
                Ok(WeightHistoryEntry {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    old_weight: row.get(2)?,
                    new_weight: row.get(3)?,
                    updated_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    // --- Feedback ---

    pub fn insert_feedback(&self, feedback: &NewFeedback) -> Result<Feedback> {
        let rating = validate_rating(feedback.rating)?;
        let comments = feedback
            .comments
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty());
        self.conn.execute(
            "INSERT INTO Feedback (User_ID, Recipe_ID, Rating, Comments, Created_At)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                feedback.user_id,
                feedback.recipe_id,
                rating,
                comments,
                Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.conn
            .query_row(
                &format!("SELECT {FEEDBACK_COLUMNS} FROM Feedback WHERE Feedback_ID = ?1"),
                params![id],
                Self::feedback_from_row,
            )
            .context("Feedback not found")
    }

    pub fn list_feedback(&self, recipe_id: Option<i64>) -> Result<Vec<Feedback>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {FEEDBACK_COLUMNS} FROM Feedback
             WHERE ?1 IS NULL OR Recipe_ID = ?1
             ORDER BY Feedback_ID DESC"
        ))?;
        let items = stmt
            .query_map(params![recipe_id], Self::feedback_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    /// Raw connection for the routine and cascade modules.
    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }
}

const USER_COLUMNS: &str = "User_ID, Name, Email, role, Height_cm, Weight_kg, BMI, Created_At";

const RECIPE_SELECT: &str = "SELECT r.Recipe_ID, r.Recipe_Name, r.Description, r.Cuisine_Type,
        r.Preparation_Time_minutes, r.Cooking_Time_minutes, r.Creator_User_ID, r.Created_At,
        rc.Calories
     FROM Recipe r
     LEFT JOIN Recipe_Calories rc ON rc.Recipe_ID = r.Recipe_ID";

const MEAL_PLAN_COLUMNS: &str = "MealPlan_ID, User_ID, Plan_Name, Start_Date, End_Date, Notes";

const DIET_LOG_SELECT: &str = "SELECT l.Log_ID, l.Date, l.Time, l.Recipe_ID, r.Recipe_Name,
        l.Portion_Size, l.Notes, l.is_finished
     FROM User_Diet_Log l
     LEFT JOIN Recipe r ON r.Recipe_ID = l.Recipe_ID";

const FEEDBACK_COLUMNS: &str = "Feedback_ID, User_ID, Recipe_ID, Rating, Comments, Created_At";

/// Run a read statement on any connection (including an open transaction).
pub(crate) fn fetch_on<P: Params>(
    conn: &Connection,
    query: &str,
    params: P,
) -> Result<ResultTable, DbError> {
    let mut stmt = conn.prepare(query)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();
    let mut rows = stmt.query(params)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut cells = Vec::with_capacity(width);
        for idx in 0..width {
            cells.push(cell_value(row.get_ref(idx)?));
        }
        out.push(cells);
    }
    Ok(ResultTable { columns, rows: out })
}

fn cell_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(format!("<{} bytes>", b.len())),
    }
}
