use crate::client::Client;
use crate::output::{print_json, print_table};
use clap::Subcommand;

#[derive(Subcommand)]
pub enum AuditSubcommand {
    /// Run named checks in order and print the sealed report
    Run {
        /// Check names, e.g. switch_state genesis_integrity ledger_consistency
        #[arg(required = true)]
        checks: Vec<String>,
        #[arg(long, env = "KILLSWITCH_PRINCIPAL")]
        principal: String,
    },

    /// Show the hash-chained toggle history
    Log,

    /// Show the most recent audit report
    Latest,
}

pub fn run(client: &Client, subcmd: AuditSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        AuditSubcommand::Run { checks, principal } => {
            let body = serde_json::json!({ "checks": checks });
            let report = client.post("/audit/run", &principal, Some(body))?;
            print_report(&report, json)
        }
        AuditSubcommand::Log => log(client, json),
        AuditSubcommand::Latest => {
            let report = client.get("/audit/reports/latest")?;
            print_report(&report, json)
        }
    }
}

fn print_report(report: &serde_json::Value, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(report);
    }
    println!("run {}", report["runId"].as_str().unwrap_or("?"));
    let rows = report["checks"]
        .as_array()
        .map(|checks| {
            checks
                .iter()
                .map(|c| {
                    vec![
                        c["name"].as_str().unwrap_or("").to_string(),
                        c["outcome"].as_str().unwrap_or("").to_string(),
                        format!("{}ms", c["durationMs"]),
                        c["detail"].as_str().unwrap_or("").to_string(),
                    ]
                })
                .collect()
        })
        .unwrap_or_default();
    print_table(&["CHECK", "OUTCOME", "TIME", "DETAIL"], rows);
    Ok(())
}

fn log(client: &Client, json: bool) -> anyhow::Result<()> {
    let entries = client.get("/audit/log")?;
    if json {
        return print_json(&entries);
    }
    let short = |v: &serde_json::Value| v.as_str().unwrap_or("").chars().take(12).collect::<String>();
    let rows = entries
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .map(|e| {
                    vec![
                        e["seq"].to_string(),
                        e["key"].as_str().unwrap_or("").to_string(),
                        format!(
                            "{} -> {}",
                            e["fromState"].as_str().unwrap_or("?"),
                            e["toState"].as_str().unwrap_or("?")
                        ),
                        e["principal"].as_str().unwrap_or("").to_string(),
                        e["timestamp"].as_str().unwrap_or("").to_string(),
                        short(&e["hash"]),
                    ]
                })
                .collect()
        })
        .unwrap_or_default();
    print_table(&["SEQ", "KEY", "CHANGE", "PRINCIPAL", "AT", "HASH"], rows);
    Ok(())
}
