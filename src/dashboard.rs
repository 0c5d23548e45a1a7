//! Human-readable status dashboard.
//!
//! Rendering only; everything shown comes from [`HubSnapshot`].

use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::coordination::{CoordinationHub, HubSnapshot, ServiceSnapshot};

/// Output mode for status reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Table,
    Json,
}

impl OutputMode {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            OutputMode::Json
        } else {
            OutputMode::Table
        }
    }
}

/// One dashboard line per service
#[derive(Debug, Serialize, Tabled)]
pub struct ServiceRow {
    #[tabled(rename = "Service")]
    pub service: String,
    #[tabled(rename = "Pri")]
    pub priority: u8,
    #[tabled(rename = "Circuit")]
    pub circuit: String,
    #[tabled(rename = "Health")]
    pub health: String,
    #[tabled(rename = "Score")]
    pub score: String,
    #[tabled(rename = "Tokens")]
    pub tokens: String,
    #[tabled(rename = "Requests")]
    pub requests: u64,
    #[tabled(rename = "OK")]
    pub successful: u64,
    #[tabled(rename = "Failed")]
    pub failed: u64,
    #[tabled(rename = "Limited")]
    pub rate_limited: u64,
    #[tabled(rename = "Rejected")]
    pub circuit_rejected: u64,
    #[tabled(rename = "Success")]
    pub success_rate: String,
    #[tabled(rename = "Avg ms")]
    pub avg_latency_ms: String,
}

impl ServiceRow {
    fn from_snapshot(name: &str, s: &ServiceSnapshot) -> Self {
        Self {
            service: name.to_string(),
            priority: s.priority,
            circuit: s.circuit_state.to_string(),
            health: s.health_status.to_string(),
            score: format!("{:.2}", s.health_score),
            tokens: format!("{:.1}", s.available_tokens),
            requests: s.total_requests,
            successful: s.successful_requests,
            failed: s.failed_requests,
            rate_limited: s.rate_limited_requests,
            circuit_rejected: s.circuit_rejected_requests,
            success_rate: format!("{:.1}%", s.success_rate * 100.0),
            avg_latency_ms: format!("{:.1}", s.avg_latency * 1000.0),
        }
    }
}

/// Rows ordered by descending priority, then name
pub fn rows(snapshot: &HubSnapshot) -> Vec<ServiceRow> {
    let mut services: Vec<_> = snapshot.services.iter().collect();
    services.sort_by(|a, b| b.1.priority.cmp(&a.1.priority).then_with(|| a.0.cmp(b.0)));
    services
        .into_iter()
        .map(|(name, s)| ServiceRow::from_snapshot(name, s))
        .collect()
}

pub fn render_status(snapshot: &HubSnapshot) -> String {
    let rows = rows(snapshot);
    if rows.is_empty() {
        return "(no services registered)".to_string();
    }

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    format!(
        "=== API COORDINATION HUB ===\nGenerated: {}\n{}",
        snapshot.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
        table
    )
}

/// Print the dashboard for the hub's current state
pub fn print_status(hub: &CoordinationHub) {
    println!("{}", render_status(&hub.snapshot_all()));
}

/// Print a snapshot in the chosen mode
pub fn print_snapshot(snapshot: &HubSnapshot, mode: OutputMode) -> anyhow::Result<()> {
    match mode {
        OutputMode::Table => println!("{}", render_status(snapshot)),
        OutputMode::Json => println!("{}", serde_json::to_string_pretty(snapshot)?),
    }
    Ok(())
}
