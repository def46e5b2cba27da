mod diet_log;
mod feedback;
mod helpers;
mod meal_plan;
mod recipe;
mod tools;
mod users;
mod weight;

pub(crate) use diet_log::{
    cmd_diet_log_add, cmd_diet_log_delete, cmd_diet_log_finish, cmd_diet_log_list,
};
pub(crate) use feedback::{cmd_feedback_add, cmd_feedback_list};
pub(crate) use meal_plan::{
    cmd_meal_plan_add, cmd_meal_plan_add_recipe, cmd_meal_plan_create, cmd_meal_plan_list,
    cmd_meal_plan_remove, cmd_meal_plan_show,
};
pub(crate) use recipe::{
    cmd_ingredient_add, cmd_ingredient_delete, cmd_ingredient_list, cmd_ingredient_nutrition,
    cmd_recipe_add, cmd_recipe_add_ingredient, cmd_recipe_delete, cmd_recipe_list,
    cmd_recipe_show,
};
pub(crate) use tools::{
    cmd_routine_call, cmd_routine_list, cmd_sql, cmd_table_list, cmd_table_show,
    cmd_table_triggers,
};
pub(crate) use users::{
    cmd_admin_check_trigger, cmd_admin_create, cmd_admin_rehash, cmd_admin_reset_password,
    cmd_profile_show, cmd_profile_update, cmd_user_add, cmd_user_delete, cmd_user_list,
    cmd_user_login,
};
pub(crate) use weight::{cmd_weight_history, cmd_weight_set};
