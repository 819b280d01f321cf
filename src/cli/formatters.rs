//! Output formatting for the `parse` command
//!
//! Keeps presentation of parsed rates apart from parsing itself.

use colored::Colorize;
use tabled::{
    settings::{object::Columns, Alignment, Style},
    Table, Tabled,
};

use crate::model::BankRate;
use crate::runner::{RunOutcome, RunReport};

fn rate_cell(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.2}", v))
        .unwrap_or_else(|| "—".bright_black().to_string())
}

/// Format parsed rates as a terminal table
pub fn format_rates_table(rates: &[BankRate]) -> String {
    #[derive(Tabled)]
    struct RateRow {
        #[tabled(rename = "Bank")]
        bank: String,
        #[tabled(rename = "Buy")]
        buy: String,
        #[tabled(rename = "Sell")]
        sell: String,
        #[tabled(rename = "Buy online")]
        buy_online: String,
        #[tabled(rename = "Sell online")]
        sell_online: String,
        #[tabled(rename = "Updated")]
        update_at: String,
        #[tabled(rename = "Site")]
        site_url: String,
    }

    if rates.is_empty() {
        return format_no_rates();
    }

    let rows: Vec<RateRow> = rates
        .iter()
        .map(|r| RateRow {
            bank: r.bank.clone(),
            buy: rate_cell(r.buy),
            sell: rate_cell(r.sell),
            buy_online: rate_cell(r.buy_online),
            sell_online: rate_cell(r.sell_online),
            update_at: r
                .update_at
                .map(|ts| ts.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "invalid".red().to_string()),
            site_url: r.site_url.clone().unwrap_or_default(),
        })
        .collect();

    let mut table = Table::new(&rows);
    table.with(Style::modern());
    // Right-align the four rate columns
    table.modify(Columns::new(1..5), Alignment::right());

    format!(
        "\n{} {} bank rate(s)\n\n{}\n",
        "✓".green().bold(),
        rates.len(),
        table
    )
}

/// One JSON object per line, in document order
pub fn format_rates_json(rates: &[BankRate]) -> String {
    rates
        .iter()
        .map(|r| {
            serde_json::to_string(r)
                .unwrap_or_else(|e| format!(r#"{{"error": "JSON serialization failed: {}"}}"#, e))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_no_rates() -> String {
    format!(
        "{} No bank rates found (is this the rates page?)\n",
        "ℹ".blue().bold()
    )
}

/// Summary printed after a run
pub fn format_run_report(report: &RunReport) -> String {
    let elapsed = report.duration.as_millis();
    match &report.outcome {
        RunOutcome::Succeeded { published } => format!(
            "{} Published {} bank rate(s) in {} ms\n",
            "✓".green().bold(),
            published,
            elapsed
        ),
        RunOutcome::Failed { stage, error } => {
            let mut out = format!(
                "{} Run failed during {} after {} ms: {}\n",
                "✗".red().bold(),
                stage,
                elapsed,
                error
            );
            for path in &report.screenshots {
                out.push_str(&format!("  screenshot: {}\n", path.display()));
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::Stage;
    use chrono::{TimeZone, Utc};
    use std::path::PathBuf;
    use std::time::Duration;

    fn rate(bank: &str, sell: Option<f64>) -> BankRate {
        BankRate {
            bank: bank.to_string(),
            buy: Some(41.1),
            sell,
            buy_online: None,
            sell_online: None,
            site_url: Some("/bank".to_string()),
            update_at: Some(Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap()),
            source_url: "https://minfin.com.ua/ua/currency/banks/usd/".to_string(),
        }
    }

    #[test]
    fn table_lists_every_bank() {
        colored::control::set_override(false);
        let out = format_rates_table(&[rate("A-Bank", Some(41.6)), rate("B-Bank", None)]);
        assert!(out.contains("A-Bank"));
        assert!(out.contains("B-Bank"));
        assert!(out.contains("41.60"));
        assert!(out.contains("2 bank rate(s)"));
    }

    #[test]
    fn empty_table_explains_itself() {
        colored::control::set_override(false);
        assert!(format_rates_table(&[]).contains("No bank rates found"));
    }

    #[test]
    fn json_lines_keep_absent_values_as_null() {
        let out = format_rates_json(&[rate("A-Bank", None)]);
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["bank"], "A-Bank");
        assert!(value["sell"].is_null());
        assert_eq!(value["buy"], 41.1);
    }

    #[test]
    fn failed_report_lists_screenshots() {
        colored::control::set_override(false);
        let report = RunReport {
            outcome: RunOutcome::Failed {
                stage: Stage::Fetch,
                error: "navigation error: timeout".to_string(),
            },
            screenshots: vec![PathBuf::from("logs/1705312800000.jpeg")],
            duration: Duration::from_millis(1500),
        };
        let out = format_run_report(&report);
        assert!(out.contains("during fetch"));
        assert!(out.contains("logs/1705312800000.jpeg"));
    }
}
