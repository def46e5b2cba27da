//! Deletion of composite roots (users, recipes, ingredients) together with
//! every row that references them.
//!
//! Each root type has one fixed plan: an ordered list of single-table deletes
//! that removes children before parents and the root itself last. A plan runs
//! inside one transaction, so either the whole closure of rows disappears or
//! nothing changes.

use std::fmt;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use crate::db::Database;
use crate::models::validate_id;
use crate::schema::Table;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CascadeRoot {
    User,
    Recipe,
    Ingredient,
}

/// One `DELETE FROM <table> WHERE <filter>`; the filter binds the root id as `?1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CascadeStep {
    pub table: Table,
    pub filter: &'static str,
}

const fn step(table: Table, filter: &'static str) -> CascadeStep {
    CascadeStep { table, filter }
}

const AUTHORED_RECIPES: &str = "Recipe_ID IN (SELECT Recipe_ID FROM Recipe WHERE Creator_User_ID = ?1)";

const USER_PLAN: &[CascadeStep] = &[
    step(Table::UserWeightHistory, "User_ID = ?1"),
    step(Table::UserDietLog, "User_ID = ?1"),
    step(Table::Feedback, "User_ID = ?1"),
    step(
        Table::MealPlanRecipes,
        "MealPlan_ID IN (SELECT MealPlan_ID FROM Meal_Plan WHERE User_ID = ?1)",
    ),
    step(Table::MealPlan, "User_ID = ?1"),
    // Rows owned by others that point at recipes this user created.
    step(Table::MealPlanRecipes, AUTHORED_RECIPES),
    step(Table::UserDietLog, AUTHORED_RECIPES),
    step(Table::Feedback, AUTHORED_RECIPES),
    step(Table::RecipeIngredient, AUTHORED_RECIPES),
    step(Table::RecipeLog, AUTHORED_RECIPES),
    step(Table::RecipeLog, "Created_By = ?1"),
    step(Table::Recipe, "Creator_User_ID = ?1"),
    step(Table::User, "User_ID = ?1"),
];

const RECIPE_PLAN: &[CascadeStep] = &[
    step(Table::MealPlanRecipes, "Recipe_ID = ?1"),
    step(Table::UserDietLog, "Recipe_ID = ?1"),
    step(Table::Feedback, "Recipe_ID = ?1"),
    step(Table::RecipeIngredient, "Recipe_ID = ?1"),
    step(Table::RecipeLog, "Recipe_ID = ?1"),
    step(Table::Recipe, "Recipe_ID = ?1"),
];

const INGREDIENT_PLAN: &[CascadeStep] = &[
    step(Table::RecipeIngredient, "Ingredient_ID = ?1"),
    step(Table::Nutrition, "Ingredient_ID = ?1"),
    step(Table::Ingredient, "Ingredient_ID = ?1"),
];

impl CascadeRoot {
    pub const ALL: [CascadeRoot; 3] = [CascadeRoot::User, CascadeRoot::Recipe, CascadeRoot::Ingredient];

    #[must_use]
    pub const fn table(self) -> Table {
        match self {
            CascadeRoot::User => Table::User,
            CascadeRoot::Recipe => Table::Recipe,
            CascadeRoot::Ingredient => Table::Ingredient,
        }
    }

    #[must_use]
    pub const fn plan(self) -> &'static [CascadeStep] {
        match self {
            CascadeRoot::User => USER_PLAN,
            CascadeRoot::Recipe => RECIPE_PLAN,
            CascadeRoot::Ingredient => INGREDIENT_PLAN,
        }
    }

    /// Problems with the plan's ordering against the foreign-key graph; empty when sound.
    ///
    /// A table may only be deleted from once every table referencing it has
    /// already been visited by an earlier step, and the root table comes last.
    #[must_use]
    pub fn plan_violations(self) -> Vec<String> {
        let plan = self.plan();
        let mut problems = Vec::new();

        match plan.last() {
            Some(last) if last.table == self.table() => {}
            _ => problems.push(format!("{self} plan must end with {}", self.table())),
        }

        for (idx, current) in plan.iter().enumerate() {
            let earlier = &plan[..idx];
            for dependent in current.table.dependents() {
                if !earlier.iter().any(|s| s.table == dependent) {
                    problems.push(format!(
                        "{self} plan deletes {} before its dependent {dependent}",
                        current.table
                    ));
                }
            }
        }
        problems
    }
}

impl fmt::Display for CascadeRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table().name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    pub table: Table,
    pub rows: usize,
}

/// Rows removed by each step of a cascade, in execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletionReport {
    pub root: CascadeRoot,
    pub id: i64,
    pub steps: Vec<StepOutcome>,
}

impl DeletionReport {
    /// Whether the root row itself existed and was removed.
    #[must_use]
    pub fn root_deleted(&self) -> bool {
        self.steps
            .last()
            .is_some_and(|s| s.table == self.root.table() && s.rows > 0)
    }

    #[must_use]
    pub fn total_rows(&self) -> usize {
        self.steps.iter().map(|s| s.rows).sum()
    }
}

impl Database {
    pub fn delete_user(&self, user_id: i64) -> Result<DeletionReport> {
        self.cascade_delete(CascadeRoot::User, user_id)
    }

    pub fn delete_recipe(&self, recipe_id: i64) -> Result<DeletionReport> {
        self.cascade_delete(CascadeRoot::Recipe, recipe_id)
    }

    pub fn delete_ingredient(&self, ingredient_id: i64) -> Result<DeletionReport> {
        self.cascade_delete(CascadeRoot::Ingredient, ingredient_id)
    }

    /// Run the root's plan in one transaction. A missing id is not an error:
    /// every step simply removes zero rows.
    pub fn cascade_delete(&self, root: CascadeRoot, id: i64) -> Result<DeletionReport> {
        let id = validate_id(id, root.table().name())?;
        let steps = self.transaction(|tx| {
            let mut steps = Vec::with_capacity(root.plan().len());
            for (idx, step) in root.plan().iter().enumerate() {
                let sql = format!("DELETE FROM {} WHERE {}", step.table.name(), step.filter);
                let rows = tx.execute(&sql, [id]).with_context(|| {
                    format!(
                        "Failed to delete {} {id}: step {} ({})",
                        root,
                        idx + 1,
                        step.table
                    )
                })?;
                debug!(root = %root, id, table = %step.table, rows, "cascade step");
                steps.push(StepOutcome {
                    table: step.table,
                    rows,
                });
            }
            Ok(steps)
        })?;

        let report = DeletionReport { root, id, steps };
        info!(
            root = %root,
            id,
            rows = report.total_rows(),
            deleted = report.root_deleted(),
            "cascade delete finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, classify};

    fn count(db: &Database, sql: &str) -> i64 {
        db.conn().query_row(sql, [], |row| row.get(0)).unwrap()
    }

    /// Two users: 7 owns recipe 3 and a meal plan; 8 references recipe 3 everywhere.
    fn seeded() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.execute_batch(
            "INSERT INTO User (User_ID, Name, Email, Password) VALUES
                (7, 'Seven', 'seven@example.com', 'x'),
                (8, 'Eight', 'eight@example.com', 'x');
             INSERT INTO Ingredient (Ingredient_ID, Ingredient_Name) VALUES (5, 'Lentils'), (6, 'Rice');
             INSERT INTO Nutrition (Ingredient_ID, Calories) VALUES (5, 3.5), (6, 1.3);
             INSERT INTO Recipe (Recipe_ID, Recipe_Name, Creator_User_ID) VALUES
                (3, 'Dal', 7),
                (4, 'Rice', 8);
             INSERT INTO Recipe_Ingredient (Recipe_ID, Ingredient_ID, Quantity) VALUES
                (3, 5, 100), (3, 6, 50), (4, 6, 200);
             INSERT INTO Meal_Plan (MealPlan_ID, User_ID, Plan_Name) VALUES (1, 7, 'Seven week'), (2, 8, 'Eight week');
             INSERT INTO MealPlan_Recipes (MealPlan_ID, Recipe_ID, Meal_Type, Day_Of_Week) VALUES
                (1, 3, 'Dinner', 'Monday'),
                (1, 4, 'Lunch', 'Monday'),
                (2, 3, 'Dinner', 'Friday'),
                (2, 4, 'Lunch', 'Friday');
             INSERT INTO User_Diet_Log (User_ID, Recipe_ID, Date) VALUES
                (7, 3, '2025-01-01'), (7, 4, '2025-01-01'), (8, 3, '2025-01-02'), (8, 4, '2025-01-02');
             INSERT INTO Feedback (User_ID, Recipe_ID, Rating) VALUES
                (7, 4, 5), (8, 3, 4), (8, 4, 3);
             INSERT INTO User_Weight_History (User_ID, New_Weight) VALUES (7, 80), (7, 79), (8, 60);",
        )
        .unwrap();
        db
    }

    fn dangling_references(db: &Database) -> i64 {
        let mut total = 0;
        for table in Table::ALL {
            for key in table.foreign_keys() {
                total += count(
                    db,
                    &format!(
                        "SELECT COUNT(*) FROM {child} WHERE {col} IS NOT NULL
                         AND {col} NOT IN (SELECT {pcol} FROM {parent})",
                        child = table.name(),
                        col = key.column,
                        pcol = key.parent_column,
                        parent = key.parent.name(),
                    ),
                );
            }
        }
        total
    }

    #[test]
    fn test_plans_respect_foreign_keys() {
        for root in CascadeRoot::ALL {
            assert_eq!(root.plan_violations(), Vec::<String>::new(), "{root}");
        }
    }

    #[test]
    fn test_recipe_plan_covers_every_dependent() {
        let tables: Vec<Table> = CascadeRoot::Recipe.plan().iter().map(|s| s.table).collect();
        for dependent in Table::Recipe.dependents() {
            assert!(tables.contains(&dependent), "missing {dependent}");
        }
    }

    #[test]
    fn test_delete_recipe_scenario() {
        let db = seeded();
        let report = db.delete_recipe(3).unwrap();
        assert!(report.root_deleted());

        for table in ["MealPlan_Recipes", "User_Diet_Log", "Feedback", "Recipe_Ingredient", "Recipe_Log"] {
            assert_eq!(
                count(&db, &format!("SELECT COUNT(*) FROM {table} WHERE Recipe_ID = 3")),
                0,
                "{table}"
            );
        }
        assert_eq!(count(&db, "SELECT COUNT(*) FROM Recipe WHERE Recipe_ID = 3"), 0);
        // Unrelated rows survive.
        assert_eq!(count(&db, "SELECT COUNT(*) FROM Recipe WHERE Recipe_ID = 4"), 1);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM MealPlan_Recipes"), 2);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM User"), 2);
        assert_eq!(dangling_references(&db), 0);

        let steps: Vec<(Table, usize)> = report.steps.iter().map(|s| (s.table, s.rows)).collect();
        assert_eq!(steps, vec![
            (Table::MealPlanRecipes, 2),
            (Table::UserDietLog, 2),
            (Table::Feedback, 1),
            (Table::RecipeIngredient, 2),
            (Table::RecipeLog, 1),
            (Table::Recipe, 1),
        ]);
    }

    #[test]
    fn test_delete_user_closure() {
        let db = seeded();
        let report = db.delete_user(7).unwrap();
        assert!(report.root_deleted());

        for sql in [
            "SELECT COUNT(*) FROM User WHERE User_ID = 7",
            "SELECT COUNT(*) FROM User_Weight_History WHERE User_ID = 7",
            "SELECT COUNT(*) FROM User_Diet_Log WHERE User_ID = 7",
            "SELECT COUNT(*) FROM Feedback WHERE User_ID = 7",
            "SELECT COUNT(*) FROM Meal_Plan WHERE User_ID = 7",
            "SELECT COUNT(*) FROM MealPlan_Recipes WHERE MealPlan_ID = 1",
            "SELECT COUNT(*) FROM Recipe WHERE Creator_User_ID = 7",
            "SELECT COUNT(*) FROM Recipe_Log WHERE Created_By = 7",
        ] {
            assert_eq!(count(&db, sql), 0, "{sql}");
        }
        assert_eq!(dangling_references(&db), 0);

        // User 8 keeps everything not tied to user 7's recipe.
        assert_eq!(count(&db, "SELECT COUNT(*) FROM User WHERE User_ID = 8"), 1);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM MealPlan_Recipes WHERE MealPlan_ID = 2"), 1);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM User_Diet_Log WHERE User_ID = 8"), 1);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM User_Weight_History WHERE User_ID = 8"), 1);
    }

    #[test]
    fn test_delete_ingredient_scenario() {
        let db = seeded();
        let report = db.delete_ingredient(5).unwrap();
        assert!(report.root_deleted());
        assert_eq!(count(&db, "SELECT COUNT(*) FROM Recipe_Ingredient WHERE Ingredient_ID = 5"), 0);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM Nutrition WHERE Ingredient_ID = 5"), 0);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM Ingredient WHERE Ingredient_ID = 5"), 0);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM Recipe_Ingredient"), 2);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM Recipe WHERE Recipe_ID = 3"), 1);
        assert_eq!(dangling_references(&db), 0);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let db = seeded();
        db.delete_recipe(3).unwrap();
        let again = db.delete_recipe(3).unwrap();
        assert!(!again.root_deleted());
        assert_eq!(again.total_rows(), 0);
    }

    fn row_counts(db: &Database) -> Vec<(Table, usize)> {
        Table::ALL
            .iter()
            .map(|&table| (table, db.load_table(table).unwrap().len()))
            .collect()
    }

    #[test]
    fn test_delete_user_is_idempotent() {
        let db = seeded();
        assert!(db.delete_user(7).unwrap().root_deleted());
        let after_first = row_counts(&db);

        let again = db.delete_user(7).unwrap();
        assert!(!again.root_deleted());
        assert_eq!(again.total_rows(), 0);
        assert_eq!(again.steps.len(), CascadeRoot::User.plan().len());
        assert_eq!(row_counts(&db), after_first);
        assert_eq!(dangling_references(&db), 0);
    }

    #[test]
    fn test_missing_id_is_noop() {
        let db = seeded();
        let before = count(&db, "SELECT COUNT(*) FROM Recipe_Ingredient");
        for root in CascadeRoot::ALL {
            let report = db.cascade_delete(root, 9999).unwrap();
            assert_eq!(report.total_rows(), 0);
            assert_eq!(report.steps.len(), root.plan().len());
        }
        assert_eq!(count(&db, "SELECT COUNT(*) FROM Recipe_Ingredient"), before);
    }

    #[test]
    fn test_non_positive_id_rejected() {
        let db = seeded();
        for id in [0, -1] {
            let err = db.delete_user(id).unwrap_err();
            assert_eq!(classify(&err), ErrorKind::Invalid);
        }
        assert_eq!(count(&db, "SELECT COUNT(*) FROM User"), 2);
    }

    #[test]
    fn test_failing_step_leaves_everything_in_place() {
        let db = seeded();
        db.execute_batch(
            "CREATE TRIGGER lock_feedback BEFORE DELETE ON Feedback
             BEGIN SELECT RAISE(ABORT, 'feedback is locked'); END;",
        )
        .unwrap();

        let err = db.delete_recipe(3).unwrap_err();
        assert_eq!(classify(&err), ErrorKind::Constraint);
        assert!(format!("{err:#}").contains("feedback is locked"));

        // The root survives and so do the dependents removed before the failure.
        assert_eq!(count(&db, "SELECT COUNT(*) FROM Recipe WHERE Recipe_ID = 3"), 1);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM MealPlan_Recipes WHERE Recipe_ID = 3"), 2);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM User_Diet_Log WHERE Recipe_ID = 3"), 2);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM Feedback WHERE Recipe_ID = 3"), 1);
    }

    #[test]
    fn test_report_serializes() {
        let db = seeded();
        let report = db.delete_ingredient(6).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["root"], "ingredient");
        assert_eq!(json["steps"][0]["table"], "Recipe_Ingredient");
        assert_eq!(json["steps"][0]["rows"], 2);
    }
}
