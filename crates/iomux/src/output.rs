use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

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

/// Outcome of one write/echo round trip on a virtual connection.
#[derive(Debug, Serialize)]
pub struct Exchange {
    pub id: String,
    pub sent: usize,
    pub received: usize,
    pub echoed: bool,
    #[serde(skip)]
    pub payload: Vec<u8>,
}

/// What `serve` did before its stream ended.
#[derive(Debug, Serialize)]
pub struct ServeSummary {
    pub accepted: usize,
    pub reason: String,
}

#[derive(Serialize)]
struct ExchangeLine<'a> {
    #[serde(flatten)]
    exchange: &'a Exchange,
    payload: String,
}

pub fn print_exchanges(exchanges: &[Exchange], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            for exchange in exchanges {
                let line = ExchangeLine {
                    exchange,
                    payload: payload_preview(&exchange.payload),
                };
                println!(
                    "{}",
                    serde_json::to_string(&line).unwrap_or_else(|_| "{}".to_string())
                );
            }
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CONNECTION", "SENT", "RECEIVED", "ECHOED", "PAYLOAD"]);
            for exchange in exchanges {
                table.add_row(vec![
                    exchange.id.clone(),
                    exchange.sent.to_string(),
                    exchange.received.to_string(),
                    exchange.echoed.to_string(),
                    payload_preview(&exchange.payload),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for exchange in exchanges {
                println!(
                    "conn={} sent={} received={} echoed={} payload={}",
                    exchange.id,
                    exchange.sent,
                    exchange.received,
                    exchange.echoed,
                    payload_preview(&exchange.payload)
                );
            }
        }
        OutputFormat::Raw => {
            for exchange in exchanges {
                print_raw(&exchange.payload);
            }
        }
    }
}

pub fn print_summary(summary: &ServeSummary, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string(summary).unwrap_or_else(|_| "{}".to_string())
        ),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_header(vec!["ACCEPTED", "REASON"])
                .add_row(vec![summary.accepted.to_string(), summary.reason.clone()]);
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            println!("accepted={} reason={}", summary.accepted, summary.reason);
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}
