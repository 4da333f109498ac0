//! Interactive SQL client for the middleware cluster. Connects to any
//! node; the cluster forwards to the coordinator as needed.

use std::io::Write;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use ddb_net::{NetClient, Peer};
use ddb_proto::{Message, Payload, QueryOutcome};

/// The client is not a cluster member; it identifies as node 0.
const CLIENT_ID: u64 = 0;

#[derive(Parser)]
#[command(name = "ddb-client")]
#[command(about = "Distributed database middleware client", long_about = None)]
struct Cli {
    /// Middleware host
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Middleware port
    #[arg(long, default_value_t = 5001)]
    port: u16,

    /// Execute a single query and exit
    #[arg(long)]
    query: Option<String>,

    /// Connection timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let client = NetClient::new(Duration::from_secs(cli.timeout));
    let target = Peer::new(CLIENT_ID, cli.host.clone(), cli.port);

    println!("Connecting to {}:{}", cli.host, cli.port);

    match cli.query {
        Some(query) => run_query(&client, &target, &query).await,
        None => run_interactive(&client, &target).await,
    }
    Ok(())
}

async fn run_query(client: &NetClient, target: &Peer, query: &str) {
    let msg = Message::new(
        CLIENT_ID,
        Payload::Query {
            query: query.to_string(),
            transaction_id: None,
            from_coordinator: false,
        },
    )
    .seal();

    match client.request(target, &msg).await {
        Ok(resp) => print_result(resp),
        Err(e) => println!("Error: {e:#}"),
    }
}

async fn run_interactive(client: &NetClient, target: &Peer) {
    println!();
    println!("Distributed Database Middleware - Interactive Client");
    println!("Enter SQL queries; EXIT to quit, HELP for help.");
    println!();

    let stdin = std::io::stdin();
    loop {
        print!("ddb> ");
        let _ = std::io::stdout().flush();

        let mut line = String::new();
        if stdin.read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        match query.to_ascii_uppercase().as_str() {
            "EXIT" | "QUIT" => {
                println!("Goodbye!");
                break;
            }
            "HELP" => {
                println!("Supported SQL commands: SELECT, INSERT, UPDATE, DELETE");
                println!("EXIT or QUIT leaves the client.");
                continue;
            }
            _ => {}
        }

        println!("Executing query...");
        run_query(client, target, query).await;
        println!();
    }
}

// ---------------------------------------------------------------------------
// Output formatting
// ---------------------------------------------------------------------------

fn print_result(resp: Message) {
    let outcome = match resp.payload {
        Payload::QueryResponse {
            success,
            result,
            error,
        } => result.unwrap_or(QueryOutcome {
            success,
            error,
            ..Default::default()
        }),
        Payload::Error { error, .. } => QueryOutcome::failure(error),
        other => QueryOutcome::failure(format!("unexpected response: {}", other.type_name())),
    };

    if !outcome.success {
        println!(
            "Query failed: {}",
            outcome.error.as_deref().unwrap_or("Unknown error")
        );
        return;
    }

    println!("Query successful");
    if let Some(node) = outcome.node_id {
        println!("Node: {node}");
    }
    if let Some(coordinator) = outcome.coordinator_id {
        println!("Coordinator: {coordinator}");
    }
    if let Some(txn) = &outcome.transaction_id {
        println!("Transaction ID: {txn}");
    }

    if let Some(rows) = &outcome.data {
        if rows.is_empty() {
            println!("(0 rows)");
        } else {
            print_rows(rows);
        }
    } else if let Some(affected) = outcome.affected_rows {
        println!("Affected rows: {affected}");
    }

    if let Some(elapsed) = outcome.response_time {
        println!("Response time: {elapsed:.3}s");
    }
}

fn print_rows(rows: &[serde_json::Value]) {
    let headers: Vec<String> = match rows.first().and_then(|r| r.as_object()) {
        Some(first) => first.keys().cloned().collect(),
        None => {
            // Not row objects; dump as-is.
            for row in rows {
                println!("{row}");
            }
            return;
        }
    };

    println!("Results ({} rows):", rows.len());
    println!("{}", "=".repeat(80));
    println!(
        "{}",
        headers
            .iter()
            .map(|h| format!("{h:15}"))
            .collect::<Vec<_>>()
            .join(" | ")
    );
    println!("{}", "-".repeat(80));
    for row in rows {
        let cells: Vec<String> = headers
            .iter()
            .map(|h| {
                let raw = row
                    .get(h)
                    .map(|v| match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .unwrap_or_default();
                let mut cell: String = raw.chars().take(15).collect();
                while cell.len() < 15 {
                    cell.push(' ');
                }
                cell
            })
            .collect();
        println!("{}", cells.join(" | "));
    }
    println!("{}", "=".repeat(80));
}
