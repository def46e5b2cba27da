use std::path::Path;

use anyhow::{Context, Result};
use chrono::{Days, Local, NaiveDate, NaiveTime};
use rusqlite::Params;
use serde::Serialize;

use crate::auth::{RehashSummary, Session};
use crate::cascade::DeletionReport;
use crate::db::{Database, SqlOutcome, fetch_on};
use crate::models::{
    DietLogEntry, Feedback, Ingredient, MealPlan, MealPlanView, NewDietLogEntry, NewFeedback,
    NewIngredient, NewMealPlan, NewRecipe, NewUser, NutritionFacts, ProfileUpdate, Recipe,
    RecipeIngredient, ResultTable, User, WeightHistoryEntry,
};
use crate::routines::{Args, Function, Procedure};
use crate::schema::Table;

pub const DEFAULT_PLAN_NAME: &str = "My Meal Plan";
pub const DEFAULT_PLAN_NOTE: &str = "Auto-created";
const DEFAULT_PLAN_DAYS: u64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerCheck {
    /// Insert a throwaway recipe and show the `Recipe_Log` row it produced.
    RecipeInsertLog,
    /// Add 1 kg to a user's weight and show the history row and new BMI.
    WeightHistory { user_id: i64 },
}

#[derive(Debug, Clone, Serialize)]
pub struct RoutineInfo {
    pub kind: &'static str,
    pub name: &'static str,
    pub params: &'static [&'static str],
}

/// Read/write facade over the database, with the user and admin portal
/// operations. Admin operations take the caller's session and refuse
/// non-admin callers.
pub struct NutritionService {
    db: Database,
}

impl NutritionService {
    pub fn new(db_path: &Path) -> Result<Self> {
        let db = Database::open(db_path)?;
        Ok(Self { db })
    }

    pub fn new_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self { db })
    }

    #[must_use]
    pub fn db(&self) -> &Database {
        &self.db
    }

    // --- Generic access ---

    /// Every row of the named table; the name must be one of the known tables.
    pub fn load_data(&self, table_name: &str) -> Result<ResultTable> {
        let table = Table::from_name(table_name)?;
        self.db
            .load_table(table)
            .with_context(|| format!("Failed to load {table}"))
    }

    pub fn run_query<P: Params>(&self, statement: &str, params: P) -> Result<usize> {
        Ok(self.db.execute(statement, params)?)
    }

    pub fn fetch<P: Params>(&self, query: &str, params: P) -> Result<ResultTable> {
        Ok(self.db.fetch(query, params)?)
    }

    // --- Sessions ---

    pub fn login(&self, email: &str, password: &str) -> Result<Session> {
        self.db.login(email, password)
    }

    pub fn admin_login(&self, email: &str, password: &str) -> Result<Session> {
        self.db.admin_login(email, password)
    }

    pub fn register(&self, name: &str, email: &str, password: &str) -> Result<Session> {
        self.db.register(name, email, password)
    }

    /// Act as an existing user without a password; for trusted local front ends.
    pub fn session_for(&self, user_id: i64) -> Result<Session> {
        let user = self.db.get_user(user_id)?;
        Ok(Session::for_user(&user))
    }

    // --- User portal ---

    pub fn profile(&self, session: &Session) -> Result<User> {
        self.db.get_user(session.user_id)
    }

    /// The updated profile, or `None` when the session's user no longer exists.
    pub fn update_profile(&self, session: &Session, update: &ProfileUpdate) -> Result<Option<User>> {
        self.db.update_profile(session.user_id, update)
    }

    /// The caller's first meal plan with its items, if they have one.
    pub fn my_meal_plan(&self, session: &Session) -> Result<Option<MealPlanView>> {
        let Some(plan) = self.db.first_meal_plan(session.user_id)? else {
            return Ok(None);
        };
        let items = self.db.meal_plan_items(plan.id)?;
        Ok(Some(MealPlanView { plan, items }))
    }

    /// The caller's first meal plan, creating the default week-long plan if none exists.
    pub fn ensure_meal_plan(&self, session: &Session) -> Result<MealPlan> {
        if let Some(plan) = self.db.first_meal_plan(session.user_id)? {
            return Ok(plan);
        }
        let today = Local::now().date_naive();
        self.db.insert_meal_plan(&NewMealPlan {
            user_id: session.user_id,
            plan_name: DEFAULT_PLAN_NAME.to_string(),
            start_date: Some(today),
            end_date: today.checked_add_days(Days::new(DEFAULT_PLAN_DAYS)),
            notes: Some(DEFAULT_PLAN_NOTE.to_string()),
        })
    }

    pub fn add_to_my_meal_plan(
        &self,
        session: &Session,
        recipe_id: i64,
        meal_type: &str,
        day_of_week: &str,
    ) -> Result<MealPlanView> {
        let plan = self.ensure_meal_plan(session)?;
        self.db
            .add_meal_plan_item(plan.id, recipe_id, meal_type, day_of_week)?;
        let items = self.db.meal_plan_items(plan.id)?;
        Ok(MealPlanView { plan, items })
    }

    pub fn remove_from_my_meal_plan(&self, session: &Session, item_id: i64) -> Result<bool> {
        match self.db.first_meal_plan(session.user_id)? {
            Some(plan) => self.db.delete_meal_plan_item(plan.id, item_id),
            None => Ok(false),
        }
    }

    pub fn browse_recipes(&self) -> Result<Vec<Recipe>> {
        self.db.list_recipes()
    }

    pub fn recipe(&self, recipe_id: i64) -> Result<Recipe> {
        self.db.get_recipe(recipe_id)
    }

    pub fn weight_history(&self, session: &Session) -> Result<Vec<WeightHistoryEntry>> {
        self.db.weight_history(session.user_id)
    }

    pub fn update_weight(&self, session: &Session, new_weight: f64) -> Result<Vec<WeightHistoryEntry>> {
        self.db.update_user_weight(session.user_id, new_weight)?;
        self.db.weight_history(session.user_id)
    }

    pub fn diet_log(&self, session: &Session) -> Result<Vec<DietLogEntry>> {
        self.db.diet_log(session.user_id)
    }

    pub fn log_meal(
        &self,
        session: &Session,
        recipe_id: i64,
        date: NaiveDate,
        time: NaiveTime,
        portion_size: f64,
        notes: Option<String>,
    ) -> Result<DietLogEntry> {
        self.db.insert_diet_log(&NewDietLogEntry {
            user_id: session.user_id,
            recipe_id,
            date,
            time,
            portion_size,
            notes: notes.filter(|n| !n.trim().is_empty()),
        })
    }

    pub fn set_meal_finished(&self, session: &Session, log_id: i64, finished: bool) -> Result<bool> {
        self.db.set_diet_log_finished(session.user_id, log_id, finished)
    }

    pub fn delete_diet_log(&self, session: &Session, log_id: i64) -> Result<bool> {
        self.db.delete_diet_log(session.user_id, log_id)
    }

    pub fn submit_feedback(
        &self,
        session: &Session,
        recipe_id: i64,
        rating: i64,
        comments: Option<String>,
    ) -> Result<Feedback> {
        self.db.insert_feedback(&NewFeedback {
            user_id: session.user_id,
            recipe_id,
            rating,
            comments,
        })
    }

    pub fn list_feedback(&self, recipe_id: Option<i64>) -> Result<Vec<Feedback>> {
        self.db.list_feedback(recipe_id)
    }

    // --- Admin portal ---

    pub fn list_users(&self, session: &Session) -> Result<Vec<User>> {
        session.require_admin()?;
        self.db.list_users()
    }

    pub fn add_user(&self, session: &Session, user: &NewUser) -> Result<User> {
        session.require_admin()?;
        self.db.create_user(user)
    }

    pub fn delete_user(&self, session: &Session, user_id: i64) -> Result<DeletionReport> {
        session.require_admin()?;
        self.db.delete_user(user_id)
    }

    pub fn add_recipe(&self, session: &Session, recipe: &NewRecipe) -> Result<Recipe> {
        session.require_admin()?;
        self.db.insert_recipe(recipe)
    }

    pub fn delete_recipe(&self, session: &Session, recipe_id: i64) -> Result<DeletionReport> {
        session.require_admin()?;
        self.db.delete_recipe(recipe_id)
    }

    pub fn add_recipe_ingredient(
        &self,
        session: &Session,
        recipe_id: i64,
        ingredient_id: i64,
        quantity: f64,
    ) -> Result<RecipeIngredient> {
        session.require_admin()?;
        self.db.add_recipe_ingredient(recipe_id, ingredient_id, quantity)
    }

    pub fn recipe_ingredients(&self, recipe_id: i64) -> Result<Vec<RecipeIngredient>> {
        self.db.recipe_ingredients(recipe_id)
    }

    pub fn list_ingredients(&self) -> Result<Vec<Ingredient>> {
        self.db.list_ingredients()
    }

    pub fn add_ingredient(&self, session: &Session, ingredient: &NewIngredient) -> Result<Ingredient> {
        session.require_admin()?;
        self.db.insert_ingredient(ingredient)
    }

    pub fn set_nutrition(&self, session: &Session, facts: &NutritionFacts) -> Result<NutritionFacts> {
        session.require_admin()?;
        self.db.set_nutrition(facts)
    }

    pub fn delete_ingredient(&self, session: &Session, ingredient_id: i64) -> Result<DeletionReport> {
        session.require_admin()?;
        self.db.delete_ingredient(ingredient_id)
    }

    pub fn add_meal_plan(&self, session: &Session, plan: &NewMealPlan) -> Result<MealPlan> {
        session.require_admin()?;
        self.db.insert_meal_plan(plan)
    }

    pub fn list_meal_plans(&self, session: &Session, user_id: Option<i64>) -> Result<Vec<MealPlan>> {
        session.require_admin()?;
        self.db.list_meal_plans(user_id)
    }

    // --- Database tools ---

    pub fn list_tables(&self) -> Result<Vec<String>> {
        self.db.list_tables()
    }

    pub fn list_triggers(&self, session: &Session) -> Result<ResultTable> {
        session.require_admin()?;
        self.db.list_triggers()
    }

    #[must_use]
    pub fn list_routines(&self) -> Vec<RoutineInfo> {
        let functions = Function::ALL.into_iter().map(|f| RoutineInfo {
            kind: "function",
            name: f.name(),
            params: f.params(),
        });
        let procedures = Procedure::ALL.into_iter().map(|p| RoutineInfo {
            kind: "procedure",
            name: p.name(),
            params: p.params(),
        });
        functions.chain(procedures).collect()
    }

    pub fn call_function(&self, function: Function, args: &Args) -> Result<serde_json::Value> {
        self.db.call_function(function, args)
    }

    pub fn call_procedure(&self, procedure: Procedure, args: &Args) -> Result<SqlOutcome> {
        self.db.call_procedure(procedure, args)
    }

    /// Execute operator-supplied SQL verbatim.
    pub fn raw_sql(&self, session: &Session, sql: &str) -> Result<SqlOutcome> {
        session.require_admin()?;
        tracing::info!(admin = session.user_id, "raw SQL");
        Ok(self.db.run_sql(sql)?)
    }

    /// Fire a trigger against throwaway data and report what it wrote; nothing is kept.
    pub fn check_trigger(&self, session: &Session, check: TriggerCheck) -> Result<ResultTable> {
        session.require_admin()?;
        self.db.rehearse(|tx| match check {
            TriggerCheck::RecipeInsertLog => {
                tx.execute(
                    "INSERT INTO Recipe (Recipe_Name, Description) VALUES ('Trigger check', 'rolled back')",
                    [],
                )?;
                let recipe_id = tx.last_insert_rowid();
                Ok(fetch_on(
                    tx,
                    "SELECT Log_ID, Recipe_ID, Action, Created_By, Logged_At
                     FROM Recipe_Log WHERE Recipe_ID = ?1",
                    [recipe_id],
                )?)
            }
            TriggerCheck::WeightHistory { user_id } => {
                let rows = tx.execute(
                    "UPDATE User SET Weight_kg = COALESCE(Weight_kg, 70) + 1 WHERE User_ID = ?1",
                    [user_id],
                )?;
                if rows == 0 {
                    return Err(crate::error::DbError::NotFound("User".into()).into());
                }
                Ok(fetch_on(
                    tx,
                    "SELECT h.History_ID, h.Old_Weight, h.New_Weight, u.BMI, h.Updated_At
                     FROM User_Weight_History h JOIN User u ON u.User_ID = h.User_ID
                     WHERE h.User_ID = ?1
                     ORDER BY h.History_ID DESC LIMIT 1",
                    [user_id],
                )?)
            }
        })
    }

    pub fn rehash_plaintext_passwords(&self, session: &Session) -> Result<RehashSummary> {
        session.require_admin()?;
        self.db.rehash_plaintext_passwords()
    }

    pub fn reset_password(&self, session: &Session, user_id: i64, password: &str) -> Result<usize> {
        session.require_admin()?;
        self.db.reset_password(user_id, password)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, classify};
    use crate::models::Role;

    fn service_with_users() -> (NutritionService, Session, Session) {
        let svc = NutritionService::new_in_memory().unwrap();
        let admin = svc
            .db()
            .create_admin("Root", "root@example.com", "pw", "pw")
            .unwrap();
        let user = svc.register("Ada", "ada@example.com", "pw").unwrap();
        (svc, Session::for_user(&admin), user)
    }

    #[test]
    fn test_load_data_validates_table_name() {
        let (svc, _, _) = service_with_users();
        let users = svc.load_data("user").unwrap();
        assert_eq!(users.len(), 2);

        let err = svc.load_data("User; DROP TABLE User").unwrap_err();
        assert_eq!(classify(&err), ErrorKind::Invalid);
        assert_eq!(svc.load_data("User").unwrap().len(), 2);
    }

    #[test]
    fn test_run_query_and_fetch() {
        let (svc, _, user) = service_with_users();
        let rows = svc
            .run_query(
                "UPDATE User SET Height_cm = ?1 WHERE User_ID = ?2",
                rusqlite::params![170.0, user.user_id],
            )
            .unwrap();
        assert_eq!(rows, 1);
        let table = svc
            .fetch("SELECT Height_cm FROM User WHERE User_ID = ?1", [user.user_id])
            .unwrap();
        assert_eq!(table.rows[0][0], serde_json::json!(170.0));
    }

    #[test]
    fn test_admin_operations_require_admin() {
        let (svc, _, user) = service_with_users();
        let err = svc.list_users(&user).unwrap_err();
        assert_eq!(classify(&err), ErrorKind::Forbidden);
        let err = svc.raw_sql(&user, "DELETE FROM User").unwrap_err();
        assert_eq!(classify(&err), ErrorKind::Forbidden);
        let err = svc.delete_user(&user, user.user_id).unwrap_err();
        assert_eq!(classify(&err), ErrorKind::Forbidden);
        assert_eq!(svc.load_data("User").unwrap().len(), 2);
    }

    #[test]
    fn test_admin_adds_user_with_role() {
        let (svc, admin, _) = service_with_users();
        let created = svc
            .add_user(
                &admin,
                &NewUser {
                    name: "Second admin".into(),
                    email: "second@example.com".into(),
                    password: "pw2".into(),
                    role: Role::Admin,
                },
            )
            .unwrap();
        assert_eq!(created.role, Role::Admin);
        assert!(svc.admin_login("second@example.com", "pw2").is_ok());
    }

    #[test]
    fn test_my_meal_plan_auto_created() {
        let (svc, admin, user) = service_with_users();
        assert!(svc.my_meal_plan(&user).unwrap().is_none());

        let recipe = svc
            .add_recipe(
                &admin,
                &NewRecipe {
                    name: "Porridge".into(),
                    description: None,
                    cuisine_type: None,
                    preparation_time_minutes: 5,
                    cooking_time_minutes: 10,
                    creator_user_id: Some(admin.user_id),
                },
            )
            .unwrap();
        let view = svc
            .add_to_my_meal_plan(&user, recipe.id, "breakfast", "tuesday")
            .unwrap();
        assert_eq!(view.plan.plan_name, DEFAULT_PLAN_NAME);
        assert_eq!(view.plan.notes.as_deref(), Some(DEFAULT_PLAN_NOTE));
        let start = NaiveDate::parse_from_str(view.plan.start_date.as_deref().unwrap(), "%Y-%m-%d").unwrap();
        let end = NaiveDate::parse_from_str(view.plan.end_date.as_deref().unwrap(), "%Y-%m-%d").unwrap();
        assert_eq!((end - start).num_days(), 7);
        assert_eq!(view.items.len(), 1);
        assert_eq!(view.items[0].meal_type, "Breakfast");

        // A second add reuses the same plan.
        let again = svc
            .add_to_my_meal_plan(&user, recipe.id, "Dinner", "Monday")
            .unwrap();
        assert_eq!(again.plan.id, view.plan.id);
        assert_eq!(again.items[0].day_of_week, "Monday");

        assert!(svc.remove_from_my_meal_plan(&user, again.items[0].id).unwrap());
        assert_eq!(svc.my_meal_plan(&user).unwrap().unwrap().items.len(), 1);
    }

    #[test]
    fn test_missing_rows_change_nothing() {
        let (svc, _, user) = service_with_users();
        assert!(!svc.remove_from_my_meal_plan(&user, 999_999).unwrap());
        assert!(!svc.set_meal_finished(&user, 999_999, true).unwrap());
        assert!(!svc.delete_diet_log(&user, 999_999).unwrap());

        let gone = Session {
            user_id: 404,
            ..user.clone()
        };
        let update = ProfileUpdate {
            name: "Ghost".into(),
            height_cm: 170.0,
            weight_kg: 70.0,
        };
        assert!(svc.update_profile(&gone, &update).unwrap().is_none());
        assert!(svc.update_weight(&gone, 70.0).unwrap().is_empty());
        assert_eq!(svc.load_data("User_Weight_History").unwrap().len(), 0);
    }

    #[test]
    fn test_admin_resets_password() {
        let (svc, admin, user) = service_with_users();
        let err = svc.reset_password(&user, user.user_id, "new").unwrap_err();
        assert_eq!(classify(&err), ErrorKind::Forbidden);

        assert_eq!(svc.reset_password(&admin, user.user_id, "new").unwrap(), 1);
        assert!(svc.login("ada@example.com", "pw").is_err());
        assert!(svc.login("ada@example.com", "new").is_ok());
        assert_eq!(svc.reset_password(&admin, 404, "new").unwrap(), 0);
    }

    #[test]
    fn test_update_weight_returns_history() {
        let (svc, _, user) = service_with_users();
        svc.update_weight(&user, 80.0).unwrap();
        let history = svc.update_weight(&user, 78.5).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].new_weight, 78.5);
    }

    #[test]
    fn test_check_trigger_rolls_back() {
        let (svc, admin, user) = service_with_users();
        let log = svc.check_trigger(&admin, TriggerCheck::RecipeInsertLog).unwrap();
        assert_eq!(log.get(0, "Action"), Some(&serde_json::json!("INSERT")));
        assert!(svc.browse_recipes().unwrap().is_empty());

        let row = svc
            .check_trigger(&admin, TriggerCheck::WeightHistory { user_id: user.user_id })
            .unwrap();
        assert_eq!(row.get(0, "New_Weight"), Some(&serde_json::json!(71.0)));
        assert!(svc.weight_history(&user).unwrap().is_empty());

        let err = svc
            .check_trigger(&admin, TriggerCheck::WeightHistory { user_id: 999 })
            .unwrap_err();
        assert_eq!(classify(&err), ErrorKind::NotFound);
    }

    #[test]
    fn test_list_routines() {
        let svc = NutritionService::new_in_memory().unwrap();
        let names: Vec<&str> = svc.list_routines().iter().map(|r| r.name).collect();
        assert_eq!(names, vec![
            "CalculateBMI",
            "GetRecipeCalories",
            "GetMealPlanSummary",
            "AddFeedback",
            "UpdateUserWeight"
        ]);
    }
}
