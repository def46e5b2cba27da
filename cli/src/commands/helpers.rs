use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDate, NaiveTime, Timelike};
use serde::Serialize;
use std::io::{self, BufRead, Write};
use std::process;
use tabled::{Table, builder::Builder, settings::Style};

use nutri_core::cascade::DeletionReport;
use nutri_core::models::{ResultTable, cell_text};

pub(crate) fn parse_date(date_str: Option<String>) -> Result<NaiveDate> {
    match date_str {
        None => Ok(Local::now().date_naive()),
        Some(s) => match s.as_str() {
            "today" => Ok(Local::now().date_naive()),
            "yesterday" => Ok(Local::now().date_naive() - chrono::Duration::days(1)),
            "tomorrow" => Ok(Local::now().date_naive() + chrono::Duration::days(1)),
            _ => NaiveDate::parse_from_str(&s, "%Y-%m-%d").with_context(|| {
                format!("Invalid date '{s}'. Use YYYY-MM-DD or today/yesterday/tomorrow")
            }),
        },
    }
}

/// `HH:MM` or `HH:MM:SS`; defaults to the current minute.
pub(crate) fn parse_time(time_str: Option<String>) -> Result<NaiveTime> {
    match time_str {
        None => {
            let now = Local::now().time();
            NaiveTime::from_hms_opt(now.hour(), now.minute(), 0).context("Invalid current time")
        }
        Some(s) => NaiveTime::parse_from_str(&s, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&s, "%H:%M:%S"))
            .with_context(|| format!("Invalid time '{s}'. Use HH:MM")),
    }
}

pub(crate) fn prompt_line(label: &str) -> Result<String> {
    eprint!("{label}: ");
    io::stderr().flush()?;
    let stdin = io::stdin();
    let line = stdin.lock().lines().next().context("No input")??;
    let line = line.trim().to_string();
    if line.is_empty() {
        bail!("{label} cannot be empty");
    }
    Ok(line)
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

/// Report a missing row and exit with status 2.
pub(crate) fn exit_not_found(message: &str, json: bool) -> ! {
    if json {
        println!("{}", json_error(message));
    } else {
        eprintln!("{message}");
    }
    process::exit(2);
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}

pub(crate) fn opt_num(v: Option<f64>, precision: usize) -> String {
    v.map_or_else(|| "-".into(), |v| format!("{v:.precision$}"))
}

pub(crate) fn opt_text(v: Option<&str>) -> String {
    v.map_or_else(|| "-".into(), |s| truncate(s, 40))
}

/// Render any query result as a rounded table with its own column names.
pub(crate) fn result_table(result: &ResultTable) -> Table {
    let mut builder = Builder::default();
    builder.push_record(result.columns.iter().cloned());
    for row in &result.rows {
        builder.push_record(row.iter().map(|v| truncate(&cell_text(v), 60)));
    }
    let mut table = builder.build();
    table.with(Style::rounded());
    table
}

pub(crate) fn print_result_table(result: &ResultTable) {
    if result.is_empty() {
        println!("{}", result.columns.join(" | "));
        println!("(no rows)");
    } else {
        println!("{}", result_table(result));
    }
}

pub(crate) fn print_deletion_report(report: &DeletionReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    if !report.root_deleted() {
        println!("No {} with ID {} (nothing deleted)", report.root, report.id);
        return Ok(());
    }
    println!("Deleted {} {}:", report.root, report.id);
    for step in report.steps.iter().filter(|s| s.rows > 0) {
        println!("  {:<22} {:>5} row(s)", step.table, step.rows);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_date_none() {
        let today = Local::now().date_naive();
        assert_eq!(parse_date(None).unwrap(), today);
    }

    #[test]
    fn test_parse_date_keywords() {
        let today = Local::now().date_naive();
        assert_eq!(parse_date(Some("today".to_string())).unwrap(), today);
        assert_eq!(
            parse_date(Some("yesterday".to_string())).unwrap(),
            today - chrono::Duration::days(1)
        );
        assert_eq!(
            parse_date(Some("tomorrow".to_string())).unwrap(),
            today + chrono::Duration::days(1)
        );
    }

    #[test]
    fn test_parse_date_iso() {
        let date = parse_date(Some("2024-01-15".to_string())).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
    }

    #[test]
    fn test_parse_date_invalid() {
        assert!(parse_date(Some("nope".to_string())).is_err());
    }

    #[test]
    fn test_parse_time() {
        assert_eq!(
            parse_time(Some("08:30".to_string())).unwrap(),
            NaiveTime::from_hms_opt(8, 30, 0).unwrap()
        );
        assert_eq!(
            parse_time(Some("19:05:10".to_string())).unwrap(),
            NaiveTime::from_hms_opt(19, 5, 10).unwrap()
        );
        assert!(parse_time(Some("25:00".to_string())).is_err());
        assert_eq!(parse_time(None).unwrap().second(), 0);
    }

    #[test]
    fn test_json_error() {
        let value: serde_json::Value = serde_json::from_str(&json_error("Recipe not found")).unwrap();
        assert_eq!(value, json!({"error": "Recipe not found"}));
    }

    #[test]
    fn test_truncate_utf8() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("Crème fraîche", 10), "Crème f...");
    }

    #[test]
    fn test_result_table_renders_cells() {
        let result = ResultTable {
            columns: vec!["ID".into(), "Name".into(), "BMI".into()],
            rows: vec![vec![json!(1), json!("Ada"), json!(null)]],
        };
        let rendered = result_table(&result).to_string();
        assert!(rendered.contains("Name"));
        assert!(rendered.contains("Ada"));
    }
}
