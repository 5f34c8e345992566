use crate::client::Client;
use crate::output::{print_json, print_table, state_label, switch_row, SWITCH_HEADERS};
use clap::ValueEnum;

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Target {
    On,
    Off,
}

impl Target {
    fn active(self) -> bool {
        matches!(self, Target::On)
    }
}

fn print_record(record: &serde_json::Value, json: bool) -> anyhow::Result<()> {
    if json {
        print_json(record)
    } else {
        print_table(SWITCH_HEADERS, vec![switch_row(record)]);
        Ok(())
    }
}

pub fn get(client: &Client, key: &str, json: bool) -> anyhow::Result<()> {
    let record = client.get(&format!("/switches/{key}"))?;
    print_record(&record, json)
}

pub fn list(client: &Client, json: bool) -> anyhow::Result<()> {
    let records = client.get("/switches")?;
    if json {
        return print_json(&records);
    }
    let rows = records
        .as_array()
        .map(|a| a.iter().map(switch_row).collect())
        .unwrap_or_default();
    print_table(SWITCH_HEADERS, rows);
    Ok(())
}

pub fn toggle(client: &Client, key: &str, principal: &str, json: bool) -> anyhow::Result<()> {
    let record = client.post(&format!("/switches/{key}/toggle"), principal, None)?;
    print_record(&record, json)
}

pub fn set(
    client: &Client,
    key: &str,
    target: Target,
    principal: &str,
    json: bool,
) -> anyhow::Result<()> {
    let body = serde_json::json!({ "active": target.active() });
    let record = client.put(&format!("/switches/{key}"), principal, body)?;
    print_record(&record, json)
}

/// Print every state change until the server closes the stream or `limit`
/// events have been seen.
pub fn watch(client: &Client, key: &str, limit: Option<usize>, json: bool) -> anyhow::Result<()> {
    let mut seen = 0usize;
    client.stream(&format!("/switches/{key}/watch"), |event, data| {
        if event != "switch" {
            return Ok(true);
        }
        if json {
            println!("{data}");
        } else {
            let record: serde_json::Value = serde_json::from_str(data)?;
            println!(
                "{}  v{}  {}  by {}",
                record["key"].as_str().unwrap_or(key),
                record["version"],
                state_label(record["active"].as_bool().unwrap_or(false)),
                record["lastActor"].as_str().unwrap_or("?"),
            );
        }
        seen += 1;
        Ok(limit.map_or(true, |n| seen < n))
    })
}

pub fn status(client: &Client, json: bool) -> anyhow::Result<()> {
    let status = client.get("/status")?;
    if json {
        return print_json(&status);
    }
    println!("{}", status["banner"].as_str().unwrap_or("UNKNOWN"));
    print_table(SWITCH_HEADERS, vec![switch_row(&status["record"])]);
    Ok(())
}
