use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use wsbridge_frame::{CommandOutput, Payload};
use wsbridge_peer::{Delivery, PollEntry, TransferReceipt};

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct Record<'a, T: Serialize> {
    kind: &'a str,
    #[serde(flatten)]
    data: &'a T,
    timestamp: String,
}

fn print_json<T: Serialize>(kind: &str, data: &T) {
    let record = Record {
        kind,
        data,
        timestamp: now_unix_seconds(),
    };
    println!(
        "{}",
        serde_json::to_string(&record).unwrap_or_else(|_| "{}".to_string())
    );
}

fn print_table(header: Vec<&str>, rows: Vec<Vec<String>>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    for row in rows {
        table.add_row(row);
    }
    println!("{table}");
}

pub fn print_delivery(delivery: &Delivery, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json("delivery", delivery),
        OutputFormat::Table => print_table(
            vec!["CHANNEL", "TRANSFER", "LATENCY", "PAYLOAD"],
            vec![vec![
                delivery.channel.clone(),
                delivery.transfer_id.clone(),
                format!("{}ms", delivery.latency.as_millis()),
                delivery.payload.to_string(),
            ]],
        ),
        OutputFormat::Pretty => match &delivery.payload {
            Payload::Structured(value) => println!(
                "channel={} transfer={} latency={}ms payload=\n{}",
                delivery.channel,
                delivery.transfer_id,
                delivery.latency.as_millis(),
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            ),
            Payload::Text(text) => println!(
                "channel={} transfer={} latency={}ms payload={text}",
                delivery.channel,
                delivery.transfer_id,
                delivery.latency.as_millis(),
            ),
        },
        OutputFormat::Raw => print_raw(&format!("{}\n", delivery.payload)),
    }
}

pub fn print_poll_entry(entry: &PollEntry, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json("poll_entry", entry),
        OutputFormat::Table => print_table(
            vec!["KEY", "SCORE", "VALUE"],
            vec![vec![
                entry.key.clone(),
                entry.score.to_string(),
                entry.value.clone(),
            ]],
        ),
        OutputFormat::Pretty => println!(
            "key={} score={} value={}",
            entry.key, entry.score, entry.value
        ),
        OutputFormat::Raw => print_raw(&format!("{}\n", entry.value)),
    }
}

#[derive(Serialize)]
struct CommandResult<'a> {
    command: &'a str,
    status_code: i64,
    status_message: &'a str,
    success: bool,
}

pub fn print_outputs(commands: &[String], outputs: &[CommandOutput], format: OutputFormat) {
    let results: Vec<CommandResult<'_>> = commands
        .iter()
        .zip(outputs)
        .map(|(command, output)| CommandResult {
            command,
            status_code: output.status_code,
            status_message: &output.status_message,
            success: output.is_success(),
        })
        .collect();

    match format {
        OutputFormat::Json => {
            for result in &results {
                print_json("command_output", result);
            }
        }
        OutputFormat::Table => print_table(
            vec!["COMMAND", "STATUS", "MESSAGE"],
            results
                .iter()
                .map(|r| {
                    vec![
                        r.command.to_string(),
                        r.status_code.to_string(),
                        r.status_message.to_string(),
                    ]
                })
                .collect(),
        ),
        OutputFormat::Pretty => {
            for r in &results {
                println!("[{}] {} => {}", r.status_code, r.command, r.status_message);
            }
        }
        OutputFormat::Raw => {
            for r in &results {
                print_raw(&format!("{}\n", r.status_message));
            }
        }
    }
}

pub fn print_receipt(receipt: &TransferReceipt, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json("transfer_sent", receipt),
        OutputFormat::Table => print_table(
            vec!["CHANNEL", "TRANSFER", "FRAGMENTS", "COMMANDS", "ELAPSED"],
            vec![vec![
                receipt.channel.clone(),
                receipt.transfer_id.clone(),
                receipt.fragments.to_string(),
                receipt.commands.to_string(),
                format!("{}ms", receipt.elapsed.as_millis()),
            ]],
        ),
        OutputFormat::Pretty => println!(
            "sent transfer={} channel={} fragments={} elapsed={}ms",
            receipt.transfer_id,
            receipt.channel,
            receipt.fragments,
            receipt.elapsed.as_millis()
        ),
        OutputFormat::Raw => print_raw(&format!("{}\n", receipt.transfer_id)),
    }
}

pub fn print_raw(text: &str) {
    let mut out = std::io::stdout();
    let _ = out.write_all(text.as_bytes());
    let _ = out.flush();
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
