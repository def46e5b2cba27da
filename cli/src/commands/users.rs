use anyhow::{Result, bail};
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use nutri_core::auth::Session;
use nutri_core::models::{NewUser, ProfileUpdate, Role, User};
use nutri_core::service::{NutritionService, TriggerCheck};

use super::helpers::{
    opt_num, print_deletion_report, print_result_table, prompt_line, truncate,
};

#[derive(Tabled)]
struct UserRow {
    #[tabled(rename = "ID")]
    id: i64,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Email")]
    email: String,
    #[tabled(rename = "Role")]
    role: String,
    #[tabled(rename = "Height (cm)")]
    height: String,
    #[tabled(rename = "Weight (kg)")]
    weight: String,
    #[tabled(rename = "BMI")]
    bmi: String,
}

impl From<&User> for UserRow {
    fn from(u: &User) -> Self {
        UserRow {
            id: u.id,
            name: truncate(&u.name, 30),
            email: u.email.clone(),
            role: u.role.to_string(),
            height: opt_num(u.height_cm, 1),
            weight: opt_num(u.weight_kg, 1),
            bmi: opt_num(u.bmi, 2),
        }
    }
}

fn print_users(users: &[User]) {
    let rows: Vec<UserRow> = users.iter().map(UserRow::from).collect();
    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(4..7)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn cmd_user_add(
    svc: &NutritionService,
    session: &Session,
    name: String,
    email: String,
    password: String,
    role: Role,
    json: bool,
) -> Result<()> {
    let user = svc.add_user(
        session,
        &NewUser {
            name,
            email,
            password,
            role,
        },
    )?;
    if json {
        println!("{}", serde_json::to_string_pretty(&user)?);
    } else {
        println!("Created {} {} (ID {}) <{}>", user.role, user.name, user.id, user.email);
    }
    Ok(())
}

pub(crate) fn cmd_user_list(svc: &NutritionService, session: &Session, json: bool) -> Result<()> {
    let users = svc.list_users(session)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&users)?);
    } else if users.is_empty() {
        println!("No users.");
    } else {
        print_users(&users);
    }
    Ok(())
}

pub(crate) fn cmd_user_delete(
    svc: &NutritionService,
    session: &Session,
    user_id: i64,
    json: bool,
) -> Result<()> {
    let report = svc.delete_user(session, user_id)?;
    print_deletion_report(&report, json)
}

pub(crate) fn cmd_user_login(
    svc: &NutritionService,
    email: &str,
    password: &str,
    json: bool,
) -> Result<()> {
    let session = svc.login(email, password)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&session)?);
    } else {
        println!(
            "Credentials OK: {} (ID {}, {})",
            session.name, session.user_id, session.role
        );
    }
    Ok(())
}

// --- Profile ---

fn print_profile(user: &User) {
    println!("{} <{}>", user.name, user.email);
    println!("  Role:    {}", user.role);
    println!("  Height:  {} cm", opt_num(user.height_cm, 1));
    println!("  Weight:  {} kg", opt_num(user.weight_kg, 1));
    println!("  BMI:     {}", opt_num(user.bmi, 2));
    if let Some(ref created) = user.created_at {
        println!("  Since:   {created}");
    }
}

pub(crate) fn cmd_profile_show(svc: &NutritionService, session: &Session, json: bool) -> Result<()> {
    let user = svc.profile(session)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&user)?);
    } else {
        print_profile(&user);
    }
    Ok(())
}

pub(crate) fn cmd_profile_update(
    svc: &NutritionService,
    session: &Session,
    update: ProfileUpdate,
    json: bool,
) -> Result<()> {
    let updated = svc.update_profile(session, &update)?;
    match updated {
        Some(user) if json => println!("{}", serde_json::to_string_pretty(&user)?),
        Some(user) => {
            println!("Profile updated.");
            print_profile(&user);
        }
        None if json => println!("{}", serde_json::json!({ "id": session.user_id, "rows": 0 })),
        None => println!("No user {}, nothing updated", session.user_id),
    }
    Ok(())
}

// --- Admin ---

pub(crate) fn cmd_admin_create(
    svc: &NutritionService,
    name: &str,
    email: &str,
    password: Option<String>,
    json: bool,
) -> Result<()> {
    let (password, confirm) = match password {
        Some(p) => (p.clone(), p),
        None => (prompt_line("Password")?, prompt_line("Confirm password")?),
    };
    let user = svc.db().create_admin(name, email, &password, &confirm)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&user)?);
    } else {
        println!("Created administrator {} (ID {}) <{}>", user.name, user.id, user.email);
    }
    Ok(())
}

pub(crate) fn cmd_admin_rehash(svc: &NutritionService, session: &Session, json: bool) -> Result<()> {
    let summary = svc.rehash_plaintext_passwords(session)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "Hashed {} plaintext password(s), {} left as they were.",
            summary.updated, summary.skipped
        );
        for user_id in &summary.needs_reset {
            println!("User {user_id} has an unsupported hash; run `nutri admin reset-password {user_id}`");
        }
    }
    Ok(())
}

pub(crate) fn cmd_admin_reset_password(
    svc: &NutritionService,
    session: &Session,
    user_id: i64,
    password: Option<String>,
    json: bool,
) -> Result<()> {
    let password = match password {
        Some(p) => p,
        None => {
            let password = prompt_line("New password")?;
            if prompt_line("Confirm password")? != password {
                bail!("Passwords do not match");
            }
            password
        }
    };
    let rows = svc.reset_password(session, user_id, &password)?;
    if json {
        println!("{}", serde_json::json!({ "id": user_id, "rows": rows }));
    } else if rows == 0 {
        println!("No user {user_id}, nothing changed");
    } else {
        println!("Password reset for user {user_id}");
    }
    Ok(())
}

pub(crate) fn cmd_admin_check_trigger(
    svc: &NutritionService,
    session: &Session,
    trigger: &str,
    user: Option<i64>,
    json: bool,
) -> Result<()> {
    let check = match (trigger.to_lowercase().as_str(), user) {
        ("recipe-insert" | "recipe", _) => TriggerCheck::RecipeInsertLog,
        ("weight", Some(user_id)) => TriggerCheck::WeightHistory { user_id },
        ("weight", None) => bail!("The weight trigger check needs --user <ID>"),
        _ => bail!("Unknown trigger '{trigger}'. Use 'recipe-insert' or 'weight'"),
    };
    let result = svc.check_trigger(session, check)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&result.to_records())?);
    } else {
        print_result_table(&result);
        println!("(rolled back, nothing was kept)");
    }
    Ok(())
}
