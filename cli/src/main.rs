mod commands;
mod config;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;

use crate::commands::{
    cmd_admin_check_trigger, cmd_admin_create, cmd_admin_rehash, cmd_admin_reset_password,
    cmd_diet_log_add,
    cmd_diet_log_delete, cmd_diet_log_finish, cmd_diet_log_list, cmd_feedback_add,
    cmd_feedback_list, cmd_ingredient_add, cmd_ingredient_delete, cmd_ingredient_list,
    cmd_ingredient_nutrition, cmd_meal_plan_add, cmd_meal_plan_add_recipe, cmd_meal_plan_create,
    cmd_meal_plan_list, cmd_meal_plan_remove, cmd_meal_plan_show, cmd_profile_show,
    cmd_profile_update, cmd_recipe_add, cmd_recipe_add_ingredient, cmd_recipe_delete,
    cmd_recipe_list, cmd_recipe_show, cmd_routine_call, cmd_routine_list, cmd_sql,
    cmd_table_list, cmd_table_show, cmd_table_triggers, cmd_user_add, cmd_user_delete,
    cmd_user_list, cmd_user_login, cmd_weight_history, cmd_weight_set,
};
use crate::config::Config;
use nutri_core::auth::Session;
use nutri_core::models::Role;
use nutri_core::service::NutritionService;

#[derive(Parser)]
#[command(
    name = "nutri",
    version,
    about = "Meal plans, diet logs and recipe administration",
    long_about = "Meal plans, diet logs and recipe administration.\n\n\
                  Every command works on one local database file; `nutri serve` exposes\n\
                  the same operations over HTTP for logged-in users and administrators."
)]
struct Cli {
    /// Database file (default: the per-user data directory)
    #[arg(long, global = true, env = "NUTRI_DB", value_name = "PATH")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage user accounts
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// Manage recipes and their ingredients
    Recipe {
        #[command(subcommand)]
        command: RecipeCommands,
    },
    /// Manage ingredients and nutrition facts
    Ingredient {
        #[command(subcommand)]
        command: IngredientCommands,
    },
    /// Meal plans: a user's own plan, or any plan as admin
    MealPlan {
        #[command(subcommand)]
        command: MealPlanCommands,
    },
    /// Recipe ratings
    Feedback {
        #[command(subcommand)]
        command: FeedbackCommands,
    },
    /// What a user ate and when
    DietLog {
        #[command(subcommand)]
        command: DietLogCommands,
    },
    /// Body weight and its history
    Weight {
        #[command(subcommand)]
        command: WeightCommands,
    },
    /// A user's profile (name, height, weight, BMI)
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },
    /// Browse database tables
    Table {
        #[command(subcommand)]
        command: TableCommands,
    },
    /// Run one SQL statement verbatim
    Sql {
        /// Statement to execute
        statement: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Stored functions and procedures
    Routine {
        #[command(subcommand)]
        command: RoutineCommands,
    },
    /// Administrator maintenance
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },
    /// Start the REST API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Create a user (password is stored hashed)
    Add {
        /// Display name
        name: String,
        /// Login email
        email: String,
        /// Password
        #[arg(long)]
        password: String,
        /// Role: user or admin
        #[arg(long, default_value = "user")]
        role: Role,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List all users
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a user and everything that references them
    Delete {
        /// User ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check a user's credentials
    Login {
        /// Login email
        email: String,
        /// Password
        #[arg(long)]
        password: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum RecipeCommands {
    /// Add a recipe
    Add {
        /// Recipe name
        name: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        cuisine: Option<String>,
        /// Preparation time in minutes
        #[arg(long, default_value = "0")]
        prep: i64,
        /// Cooking time in minutes
        #[arg(long, default_value = "0")]
        cook: i64,
        /// Creator's user ID
        #[arg(long)]
        creator: Option<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List recipes with their calories
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a recipe and its ingredients
    Show {
        /// Recipe ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add an ingredient to a recipe
    AddIngredient {
        /// Recipe ID
        recipe_id: i64,
        /// Ingredient ID
        ingredient_id: i64,
        /// Quantity in the ingredient's unit of measure
        quantity: f64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a recipe and everything that references it
    Delete {
        /// Recipe ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum IngredientCommands {
    /// Add an ingredient
    Add {
        /// Ingredient name
        name: String,
        /// Unit of measure (g, ml, piece, ...)
        #[arg(long)]
        unit: Option<String>,
        #[arg(long)]
        category: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List ingredients
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Set nutrition facts per unit of measure
    Nutrition {
        /// Ingredient ID
        id: i64,
        #[arg(long)]
        calories: f64,
        #[arg(long)]
        protein: Option<f64>,
        #[arg(long)]
        carbs: Option<f64>,
        #[arg(long)]
        fat: Option<f64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete an ingredient and everything that references it
    Delete {
        /// Ingredient ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum MealPlanCommands {
    /// Create a meal plan for any user
    Add {
        /// Owner's user ID
        user_id: i64,
        /// Plan name
        name: String,
        /// Start date (YYYY-MM-DD or today/yesterday/tomorrow)
        #[arg(long)]
        start: Option<String>,
        /// End date (YYYY-MM-DD or today/yesterday/tomorrow)
        #[arg(long)]
        end: Option<String>,
        #[arg(long)]
        notes: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List meal plans
    List {
        /// Only this user's plans
        #[arg(short, long)]
        user: Option<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a user's meal plan
    Show {
        #[arg(short, long)]
        user: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create the default week-long plan if the user has none
    Create {
        #[arg(short, long)]
        user: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add a recipe to a user's meal plan
    AddRecipe {
        #[arg(short, long)]
        user: i64,
        /// Recipe ID
        recipe_id: i64,
        /// Meal type: breakfast, lunch, dinner, snack
        #[arg(short, long)]
        meal: String,
        /// Day of week: monday..sunday
        #[arg(short, long)]
        day: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove an item from a user's meal plan
    Remove {
        #[arg(short, long)]
        user: i64,
        /// Meal plan item ID
        item_id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum FeedbackCommands {
    /// Rate a recipe
    Add {
        #[arg(short, long)]
        user: i64,
        /// Recipe ID
        recipe_id: i64,
        /// Rating from 1 to 5
        rating: i64,
        #[arg(long)]
        comments: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List feedback, newest first
    List {
        /// Only feedback for this recipe
        #[arg(long)]
        recipe: Option<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum DietLogCommands {
    /// Show a user's diet log, newest first
    List {
        #[arg(short, long)]
        user: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Log a meal
    Add {
        #[arg(short, long)]
        user: i64,
        /// Recipe ID
        recipe_id: i64,
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Time (HH:MM, default: now)
        #[arg(long)]
        time: Option<String>,
        /// Portions eaten (0.5 to 10)
        #[arg(long, default_value = "1")]
        portion: f64,
        #[arg(long)]
        notes: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Mark a logged meal as finished
    Finish {
        #[arg(short, long)]
        user: i64,
        /// Diet log entry ID
        log_id: i64,
        /// Mark as not finished instead
        #[arg(long)]
        undo: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a diet log entry
    Delete {
        #[arg(short, long)]
        user: i64,
        /// Diet log entry ID
        log_id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum WeightCommands {
    /// Record a new weight (logs history and recomputes BMI)
    Set {
        #[arg(short, long)]
        user: i64,
        /// Weight in kg
        kg: f64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show weight history, oldest first
    History {
        #[arg(short, long)]
        user: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// Show a user's profile
    Show {
        #[arg(short, long)]
        user: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Update name, height and weight
    Update {
        #[arg(short, long)]
        user: i64,
        #[arg(long)]
        name: String,
        /// Height in cm (50 to 250)
        #[arg(long)]
        height: f64,
        /// Weight in kg (20 to 300)
        #[arg(long)]
        weight: f64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum TableCommands {
    /// List tables in the database
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show every row of a table
    Show {
        /// Table name
        name: String,
        /// Output as CSV
        #[arg(long, conflicts_with = "json")]
        csv: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List triggers
    Triggers {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum RoutineCommands {
    /// List functions and procedures with their parameters
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Call a function or procedure with key=value arguments
    Call {
        /// Routine name (e.g. CalculateBMI, UpdateUserWeight)
        name: String,
        /// Arguments as key=value
        args: Vec<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum AdminCommands {
    /// Create an administrator account
    Create {
        /// Display name
        name: String,
        /// Login email
        email: String,
        /// Password (prompted when omitted)
        #[arg(long)]
        password: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Hash any passwords still stored in plaintext
    RehashPasswords {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Set a new password for a user, e.g. one whose stored hash is unsupported
    ResetPassword {
        /// User ID
        user_id: i64,
        /// New password (prompted when omitted)
        #[arg(long)]
        password: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Fire a trigger against throwaway data and show what it wrote
    CheckTrigger {
        /// recipe-insert or weight
        trigger: String,
        /// User for the weight trigger
        #[arg(short, long)]
        user: Option<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(matches!(cli.command, Commands::Serve { .. }));

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn init_tracing(serving: bool) {
    let default = if serving { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .try_init()
        .ok();
}

#[allow(clippy::too_many_lines)]
async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.db)?;
    let svc = NutritionService::new(&config.db_path)?;
    // Whoever can open the database file already has full control of it.
    let operator = Session::operator();

    match cli.command {
        Commands::User { command } => match command {
            UserCommands::Add {
                name,
                email,
                password,
                role,
                json,
            } => cmd_user_add(&svc, &operator, name, email, password, role, json),
            UserCommands::List { json } => cmd_user_list(&svc, &operator, json),
            UserCommands::Delete { id, json } => cmd_user_delete(&svc, &operator, id, json),
            UserCommands::Login {
                email,
                password,
                json,
            } => cmd_user_login(&svc, &email, &password, json),
        },
        Commands::Recipe { command } => match command {
            RecipeCommands::Add {
                name,
                description,
                cuisine,
                prep,
                cook,
                creator,
                json,
            } => cmd_recipe_add(
                &svc,
                &operator,
                nutri_core::models::NewRecipe {
                    name,
                    description,
                    cuisine_type: cuisine,
                    preparation_time_minutes: prep,
                    cooking_time_minutes: cook,
                    creator_user_id: creator,
                },
                json,
            ),
            RecipeCommands::List { json } => cmd_recipe_list(&svc, json),
            RecipeCommands::Show { id, json } => cmd_recipe_show(&svc, id, json),
            RecipeCommands::AddIngredient {
                recipe_id,
                ingredient_id,
                quantity,
                json,
            } => cmd_recipe_add_ingredient(&svc, &operator, recipe_id, ingredient_id, quantity, json),
            RecipeCommands::Delete { id, json } => cmd_recipe_delete(&svc, &operator, id, json),
        },
        Commands::Ingredient { command } => match command {
            IngredientCommands::Add {
                name,
                unit,
                category,
                json,
            } => cmd_ingredient_add(&svc, &operator, name, unit, category, json),
            IngredientCommands::List { json } => cmd_ingredient_list(&svc, json),
            IngredientCommands::Nutrition {
                id,
                calories,
                protein,
                carbs,
                fat,
                json,
            } => cmd_ingredient_nutrition(
                &svc,
                &operator,
                nutri_core::models::NutritionFacts {
                    ingredient_id: id,
                    calories,
                    protein_g: protein,
                    carbs_g: carbs,
                    fat_g: fat,
                },
                json,
            ),
            IngredientCommands::Delete { id, json } => {
                cmd_ingredient_delete(&svc, &operator, id, json)
            }
        },
        Commands::MealPlan { command } => match command {
            MealPlanCommands::Add {
                user_id,
                name,
                start,
                end,
                notes,
                json,
            } => cmd_meal_plan_add(&svc, &operator, user_id, name, start, end, notes, json),
            MealPlanCommands::List { user, json } => {
                cmd_meal_plan_list(&svc, &operator, user, json)
            }
            MealPlanCommands::Show { user, json } => {
                cmd_meal_plan_show(&svc, &svc.session_for(user)?, json)
            }
            MealPlanCommands::Create { user, json } => {
                cmd_meal_plan_create(&svc, &svc.session_for(user)?, json)
            }
            MealPlanCommands::AddRecipe {
                user,
                recipe_id,
                meal,
                day,
                json,
            } => cmd_meal_plan_add_recipe(&svc, &svc.session_for(user)?, recipe_id, &meal, &day, json),
            MealPlanCommands::Remove {
                user,
                item_id,
                json,
            } => cmd_meal_plan_remove(&svc, &svc.session_for(user)?, item_id, json),
        },
        Commands::Feedback { command } => match command {
            FeedbackCommands::Add {
                user,
                recipe_id,
                rating,
                comments,
                json,
            } => cmd_feedback_add(&svc, &svc.session_for(user)?, recipe_id, rating, comments, json),
            FeedbackCommands::List { recipe, json } => cmd_feedback_list(&svc, recipe, json),
        },
        Commands::DietLog { command } => match command {
            DietLogCommands::List { user, json } => {
                cmd_diet_log_list(&svc, &svc.session_for(user)?, json)
            }
            DietLogCommands::Add {
                user,
                recipe_id,
                date,
                time,
                portion,
                notes,
                json,
            } => cmd_diet_log_add(
                &svc,
                &svc.session_for(user)?,
                recipe_id,
                date,
                time,
                portion,
                notes,
                json,
            ),
            DietLogCommands::Finish {
                user,
                log_id,
                undo,
                json,
            } => cmd_diet_log_finish(&svc, &svc.session_for(user)?, log_id, !undo, json),
            DietLogCommands::Delete { user, log_id, json } => {
                cmd_diet_log_delete(&svc, &svc.session_for(user)?, log_id, json)
            }
        },
        Commands::Weight { command } => match command {
            WeightCommands::Set { user, kg, json } => {
                cmd_weight_set(&svc, &svc.session_for(user)?, kg, json)
            }
            WeightCommands::History { user, json } => {
                cmd_weight_history(&svc, &svc.session_for(user)?, json)
            }
        },
        Commands::Profile { command } => match command {
            ProfileCommands::Show { user, json } => {
                cmd_profile_show(&svc, &svc.session_for(user)?, json)
            }
            ProfileCommands::Update {
                user,
                name,
                height,
                weight,
                json,
            } => cmd_profile_update(
                &svc,
                &svc.session_for(user)?,
                nutri_core::models::ProfileUpdate {
                    name,
                    height_cm: height,
                    weight_kg: weight,
                },
                json,
            ),
        },
        Commands::Table { command } => match command {
            TableCommands::List { json } => cmd_table_list(&svc, json),
            TableCommands::Show { name, csv, json } => cmd_table_show(&svc, &name, csv, json),
            TableCommands::Triggers { json } => cmd_table_triggers(&svc, &operator, json),
        },
        Commands::Sql { statement, json } => cmd_sql(&svc, &operator, &statement, json),
        Commands::Routine { command } => match command {
            RoutineCommands::List { json } => cmd_routine_list(&svc, json),
            RoutineCommands::Call { name, args, json } => cmd_routine_call(&svc, &name, &args, json),
        },
        Commands::Admin { command } => match command {
            AdminCommands::Create {
                name,
                email,
                password,
                json,
            } => cmd_admin_create(&svc, &name, &email, password, json),
            AdminCommands::RehashPasswords { json } => cmd_admin_rehash(&svc, &operator, json),
            AdminCommands::ResetPassword {
                user_id,
                password,
                json,
            } => cmd_admin_reset_password(&svc, &operator, user_id, password, json),
            AdminCommands::CheckTrigger {
                trigger,
                user,
                json,
            } => cmd_admin_check_trigger(&svc, &operator, &trigger, user, json),
        },
        Commands::Serve { port, bind } => server::start_server(svc, port, &bind).await,
    }
}
