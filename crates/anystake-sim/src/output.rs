// crates/anystake-sim/src/output.rs
//
// Report rows and output formatting for the simulator.
// Supports table and JSON output modes.

use std::str::FromStr;

use serde::Serialize;
use tabled::{Table, Tabled};

use crate::error::SimError;

/// Output format for the final report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputFormat {
    /// Pretty-printed tables (default).
    Table,
    /// JSON for machine consumption.
    Json,
}

impl FromStr for OutputFormat {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            other => Err(SimError::Config(format!(
                "unknown output format '{}' (expected table or json)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Tabled)]
pub struct StepRow {
    #[tabled(rename = "#")]
    pub index: usize,
    #[tabled(rename = "Block")]
    pub block: u64,
    #[tabled(rename = "Step")]
    pub step: String,
    /// Outcome, or the error that rolled the step back.
    #[tabled(rename = "Result")]
    pub result: String,
    #[tabled(skip)]
    pub ok: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Tabled)]
pub struct PoolRow {
    #[tabled(rename = "Ledger")]
    pub ledger: String,
    #[tabled(rename = "PID")]
    pub pid: usize,
    #[tabled(rename = "Token")]
    pub token: String,
    #[tabled(rename = "Weight")]
    pub weight: u64,
    #[tabled(rename = "VIP")]
    pub vip: String,
    #[tabled(rename = "Fee (bps)")]
    pub fee_bps: u32,
    #[tabled(rename = "Staked")]
    pub total_staked: String,
    #[tabled(rename = "Acc/Share")]
    pub acc_reward_per_share: String,
    #[tabled(rename = "Settled")]
    pub last_settled_block: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Tabled)]
pub struct UserRow {
    #[tabled(rename = "Contract")]
    pub contract: String,
    #[tabled(rename = "Pool")]
    pub pool: String,
    #[tabled(rename = "User")]
    pub user: String,
    #[tabled(rename = "Staked")]
    pub staked: String,
    #[tabled(rename = "Pending")]
    pub pending: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Tabled)]
pub struct TreasuryRow {
    #[tabled(rename = "Treasury")]
    pub treasury: String,
    #[tabled(rename = "Balance")]
    pub balance: String,
    #[tabled(rename = "Bonded")]
    pub bonded_remaining: String,
    #[tabled(rename = "Per Block")]
    pub per_block: String,
    #[tabled(rename = "Pending")]
    pub pending: String,
    #[tabled(rename = "Distributed")]
    pub distributed: String,
    #[tabled(rename = "Migrated")]
    pub migrated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Tabled)]
pub struct RegulatorRow {
    #[tabled(rename = "Regulator")]
    pub regulator: String,
    #[tabled(rename = "Treasury")]
    pub treasury: String,
    #[tabled(rename = "Active")]
    pub active: bool,
    #[tabled(rename = "Staked")]
    pub total_staked: String,
    #[tabled(rename = "Buyback")]
    pub buyback: String,
    #[tabled(rename = "Protocol Owned")]
    pub protocol_owned: String,
    #[tabled(rename = "Peg")]
    pub peg: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Tabled)]
pub struct BalanceRow {
    #[tabled(rename = "Account")]
    pub account: String,
    #[tabled(rename = "Token")]
    pub token: String,
    #[tabled(rename = "Balance")]
    pub balance: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Tabled)]
pub struct MigrationRow {
    #[tabled(rename = "Migration")]
    pub migration: usize,
    #[tabled(rename = "Phase")]
    pub phase: String,
    #[tabled(rename = "Block")]
    pub block: u64,
}

/// Final state of a scenario run.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub block: u64,
    pub steps: Vec<StepRow>,
    pub pools: Vec<PoolRow>,
    pub users: Vec<UserRow>,
    pub treasuries: Vec<TreasuryRow>,
    pub regulator: RegulatorRow,
    pub balances: Vec<BalanceRow>,
    pub migrations: Vec<MigrationRow>,
}

impl Report {
    /// Steps that failed and were rolled back.
    pub fn failed_steps(&self) -> impl Iterator<Item = &StepRow> {
        self.steps.iter().filter(|row| !row.ok)
    }
}

/// Format a slice of Tabled items as a table string.
pub fn format_table<T: Tabled>(data: &[T]) -> String {
    Table::new(data).to_string()
}

/// Format a serializable value as a pretty-printed JSON string.
pub fn format_json<T: Serialize>(data: &T) -> String {
    serde_json::to_string_pretty(data).unwrap_or_else(|e| format!("JSON serialization error: {}", e))
}

pub fn render(report: &Report, format: &OutputFormat) -> String {
    match format {
        OutputFormat::Json => format_json(report),
        OutputFormat::Table => {
            let mut sections = vec![
                format!("Block {}", report.block),
                format!("Steps\n{}", format_table(&report.steps)),
                format!("Pools\n{}", format_table(&report.pools)),
                format!("Stakes\n{}", format_table(&report.users)),
                format!("Treasuries\n{}", format_table(&report.treasuries)),
                format!(
                    "Regulator\n{}",
                    format_table(std::slice::from_ref(&report.regulator))
                ),
                format!("Balances\n{}", format_table(&report.balances)),
            ];
            if !report.migrations.is_empty() {
                sections.push(format!("Migrations\n{}", format_table(&report.migrations)));
            }
            sections.join("\n\n")
        }
    }
}
