use anyhow::Result;
use std::io;
use tabled::{Table, Tabled, settings::Style};

use nutri_core::auth::Session;
use nutri_core::db::SqlOutcome;
use nutri_core::routines::{Function, Procedure, parse_args};
use nutri_core::service::NutritionService;

use super::helpers::print_result_table;

pub(crate) fn cmd_table_list(svc: &NutritionService, json: bool) -> Result<()> {
    let tables = svc.list_tables()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&tables)?);
    } else {
        for name in &tables {
            println!("{name}");
        }
    }
    Ok(())
}

pub(crate) fn cmd_table_show(svc: &NutritionService, name: &str, csv: bool, json: bool) -> Result<()> {
    let result = svc.load_data(name)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&result.to_records())?);
    } else if csv {
        result.write_csv(io::stdout().lock())?;
    } else {
        print_result_table(&result);
        println!("{} row(s)", result.len());
    }
    Ok(())
}

pub(crate) fn cmd_table_triggers(svc: &NutritionService, session: &Session, json: bool) -> Result<()> {
    let triggers = svc.list_triggers(session)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&triggers.to_records())?);
    } else {
        print_result_table(&triggers);
    }
    Ok(())
}

fn print_outcome(outcome: &SqlOutcome, json: bool) -> Result<()> {
    match outcome {
        SqlOutcome::Rows(result) if json => {
            println!("{}", serde_json::to_string_pretty(&result.to_records())?);
        }
        SqlOutcome::Rows(result) => {
            print_result_table(result);
            println!("{} row(s)", result.len());
        }
        SqlOutcome::Affected { .. } if json => {
            println!("{}", serde_json::to_string_pretty(outcome)?);
        }
        SqlOutcome::Affected { rows } => println!("{rows} row(s) affected"),
    }
    Ok(())
}

pub(crate) fn cmd_sql(svc: &NutritionService, session: &Session, statement: &str, json: bool) -> Result<()> {
    let outcome = svc.raw_sql(session, statement)?;
    print_outcome(&outcome, json)
}

pub(crate) fn cmd_routine_list(svc: &NutritionService, json: bool) -> Result<()> {
    let routines = svc.list_routines();
    if json {
        println!("{}", serde_json::to_string_pretty(&routines)?);
        return Ok(());
    }

    #[derive(Tabled)]
    struct Row {
        #[tabled(rename = "Kind")]
        kind: &'static str,
        #[tabled(rename = "Name")]
        name: &'static str,
        #[tabled(rename = "Parameters")]
        params: String,
    }

    let rows: Vec<Row> = routines
        .iter()
        .map(|r| Row {
            kind: r.kind,
            name: r.name,
            params: r.params.join(", "),
        })
        .collect();
    println!("{}", Table::new(&rows).with(Style::rounded()));
    Ok(())
}

/// Functions print a single value; procedures print rows or an affected count.
pub(crate) fn cmd_routine_call(
    svc: &NutritionService,
    name: &str,
    args: &[String],
    json: bool,
) -> Result<()> {
    let args = parse_args(args.iter().map(String::as_str))?;
    if let Ok(function) = name.parse::<Function>() {
        let value = svc.call_function(function, &args)?;
        if json {
            println!("{}", serde_json::json!({ "function": function.name(), "result": value }));
        } else {
            println!("{function} = {value}");
        }
        return Ok(());
    }
    let procedure: Procedure = name.parse()?;
    let outcome = svc.call_procedure(procedure, &args)?;
    print_outcome(&outcome, json)
}
