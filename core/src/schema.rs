//! Tables of the nutrition database and the foreign-key edges between them.
//!
//! [`Table`] doubles as the allow-list for anything that has to splice a table
//! name into SQL text: callers parse free text with [`Table::from_name`] and only
//! the static name of a known table ever reaches a statement.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::error::DbError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    User,
    Recipe,
    Ingredient,
    RecipeIngredient,
    MealPlan,
    MealPlanRecipes,
    UserDietLog,
    UserWeightHistory,
    Feedback,
    RecipeLog,
    Nutrition,
}

/// `column` of the owning table references `parent_column` of `parent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub column: &'static str,
    pub parent: Table,
    pub parent_column: &'static str,
}

const fn fk(column: &'static str, parent: Table, parent_column: &'static str) -> ForeignKey {
    ForeignKey {
        column,
        parent,
        parent_column,
    }
}

const RECIPE_FKS: &[ForeignKey] = &[fk("Creator_User_ID", Table::User, "User_ID")];
const RECIPE_INGREDIENT_FKS: &[ForeignKey] = &[
    fk("Recipe_ID", Table::Recipe, "Recipe_ID"),
    fk("Ingredient_ID", Table::Ingredient, "Ingredient_ID"),
];
const OWNED_BY_USER_FKS: &[ForeignKey] = &[fk("User_ID", Table::User, "User_ID")];
const MEAL_PLAN_RECIPES_FKS: &[ForeignKey] = &[
    fk("MealPlan_ID", Table::MealPlan, "MealPlan_ID"),
    fk("Recipe_ID", Table::Recipe, "Recipe_ID"),
];
const USER_AND_RECIPE_FKS: &[ForeignKey] = &[
    fk("User_ID", Table::User, "User_ID"),
    fk("Recipe_ID", Table::Recipe, "Recipe_ID"),
];
const RECIPE_LOG_FKS: &[ForeignKey] = &[
    fk("Recipe_ID", Table::Recipe, "Recipe_ID"),
    fk("Created_By", Table::User, "User_ID"),
];
const NUTRITION_FKS: &[ForeignKey] = &[fk("Ingredient_ID", Table::Ingredient, "Ingredient_ID")];

impl Table {
    pub const ALL: [Table; 11] = [
        Table::User,
        Table::Recipe,
        Table::Ingredient,
        Table::RecipeIngredient,
        Table::MealPlan,
        Table::MealPlanRecipes,
        Table::UserDietLog,
        Table::UserWeightHistory,
        Table::Feedback,
        Table::RecipeLog,
        Table::Nutrition,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Table::User => "User",
            Table::Recipe => "Recipe",
            Table::Ingredient => "Ingredient",
            Table::RecipeIngredient => "Recipe_Ingredient",
            Table::MealPlan => "Meal_Plan",
            Table::MealPlanRecipes => "MealPlan_Recipes",
            Table::UserDietLog => "User_Diet_Log",
            Table::UserWeightHistory => "User_Weight_History",
            Table::Feedback => "Feedback",
            Table::RecipeLog => "Recipe_Log",
            Table::Nutrition => "Nutrition",
        }
    }

    #[must_use]
    pub const fn primary_key(self) -> &'static str {
        match self {
            Table::User => "User_ID",
            Table::Recipe => "Recipe_ID",
            Table::Ingredient => "Ingredient_ID",
            Table::RecipeIngredient => "Recipe_Ingredient_ID",
            Table::MealPlan => "MealPlan_ID",
            Table::MealPlanRecipes => "MPR_ID",
            Table::UserDietLog | Table::RecipeLog => "Log_ID",
            Table::UserWeightHistory => "History_ID",
            Table::Feedback => "Feedback_ID",
            Table::Nutrition => "Nutrition_ID",
        }
    }

    #[must_use]
    pub const fn foreign_keys(self) -> &'static [ForeignKey] {
        match self {
            Table::User | Table::Ingredient => &[],
            Table::Recipe => RECIPE_FKS,
            Table::RecipeIngredient => RECIPE_INGREDIENT_FKS,
            Table::MealPlan | Table::UserWeightHistory => OWNED_BY_USER_FKS,
            Table::MealPlanRecipes => MEAL_PLAN_RECIPES_FKS,
            Table::UserDietLog | Table::Feedback => USER_AND_RECIPE_FKS,
            Table::RecipeLog => RECIPE_LOG_FKS,
            Table::Nutrition => NUTRITION_FKS,
        }
    }

    /// Tables holding a foreign key into `self`.
    #[must_use]
    pub fn dependents(self) -> Vec<Table> {
        Table::ALL
            .into_iter()
            .filter(|t| t.foreign_keys().iter().any(|k| k.parent == self))
            .collect()
    }

    #[must_use]
    pub fn is_root(self) -> bool {
        self.foreign_keys().is_empty()
    }

    /// Resolve operator-supplied text against the known tables (case-insensitive).
    pub fn from_name(name: &str) -> Result<Table, DbError> {
        let wanted = name.trim();
        Table::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| DbError::UnknownTable {
                name: wanted.to_string(),
                allowed: Table::ALL.map(Table::name).join(", "),
            })
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Table {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Table::from_name(s)
    }
}

impl Serialize for Table {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name_case_insensitive() {
        assert_eq!(Table::from_name("user").unwrap(), Table::User);
        assert_eq!(
            Table::from_name(" mealplan_recipes ").unwrap(),
            Table::MealPlanRecipes
        );
        assert_eq!("Nutrition".parse::<Table>().unwrap(), Table::Nutrition);
    }

    #[test]
    fn test_from_name_rejects_injection() {
        let err = Table::from_name("User; DROP TABLE User").unwrap_err();
        assert!(matches!(err, DbError::UnknownTable { .. }));
        assert!(Table::from_name("sqlite_master").is_err());
        assert!(Table::from_name("").is_err());
    }

    #[test]
    fn test_roots() {
        let roots: Vec<Table> = Table::ALL.into_iter().filter(|t| t.is_root()).collect();
        assert_eq!(roots, vec![Table::User, Table::Ingredient]);
    }

    #[test]
    fn test_dependents_of_user() {
        let deps = Table::User.dependents();
        for t in [
            Table::Recipe,
            Table::MealPlan,
            Table::UserDietLog,
            Table::UserWeightHistory,
            Table::Feedback,
            Table::RecipeLog,
        ] {
            assert!(deps.contains(&t), "{t} should depend on User");
        }
        assert_eq!(deps.len(), 6);
    }

    #[test]
    fn test_dependents_of_ingredient() {
        assert_eq!(
            Table::Ingredient.dependents(),
            vec![Table::RecipeIngredient, Table::Nutrition]
        );
    }

    #[test]
    fn test_leaf_tables_have_no_dependents() {
        for t in [
            Table::UserWeightHistory,
            Table::Feedback,
            Table::RecipeLog,
            Table::Nutrition,
            Table::MealPlanRecipes,
        ] {
            assert!(t.dependents().is_empty(), "{t} should be a leaf");
        }
    }

    #[test]
    fn test_serializes_as_sql_name() {
        let json = serde_json::to_string(&Table::UserDietLog).unwrap();
        assert_eq!(json, "\"User_Diet_Log\"");
    }
}
