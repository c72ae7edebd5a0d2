#![forbid(unsafe_code)]

//! `agent-harness-ctl` — local CLI companion for `agent-harness`.
//!
//! Connects to the daemon's IPC socket and sends JSON-line commands:
//! request and cancel sessions, inspect status, answer steering
//! questions, and replay event logs.

use std::io::{BufRead, BufReader, Write};

use clap::{Parser, Subcommand};
use interprocess::local_socket::{traits::Stream as _, GenericNamespaced, Stream, ToNsName};

#[derive(Debug, Parser)]
#[command(
    name = "agent-harness-ctl",
    about = "Local CLI for the agent-harness daemon",
    version,
    long_about = None
)]
struct Cli {
    /// IPC socket name (must match the daemon's `ipc_name` config).
    #[arg(long, default_value = "agent-harness")]
    ipc_name: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Request a new session for a goal.
    Run {
        /// Goal description driving the agent.
        goal: String,
        /// Execution mode: closed or interactive.
        #[arg(long, default_value = "closed")]
        mode: String,
        /// Engine identifier: codex or claude.
        #[arg(long, default_value = "codex")]
        engine: String,
    },

    /// Cancel a session.
    Cancel {
        /// Session ID.
        id: String,
    },

    /// Show the status snapshot for a session or task.
    Status {
        /// Session or task ID.
        id: String,
    },

    /// Answer the session's pending steering question.
    Steer {
        /// Session ID.
        id: String,
        /// Answer text relayed to the agent.
        answer: String,
    },

    /// Replay a session's event log.
    Events {
        /// Session ID.
        id: String,
        /// Only events after this sequence number.
        #[arg(long, default_value_t = 0)]
        after_seq: i64,
    },
}

fn main() {
    let args = Cli::parse();

    let request_json = match &args.command {
        Command::Run { goal, mode, engine } => serde_json::json!({
            "command": "run", "goal": goal, "mode": mode, "engine": engine,
        }),
        Command::Cancel { id } => serde_json::json!({ "command": "cancel", "id": id }),
        Command::Status { id } => serde_json::json!({ "command": "status", "id": id }),
        Command::Steer { id, answer } => {
            serde_json::json!({ "command": "steer", "id": id, "answer": answer })
        }
        Command::Events { id, after_seq } => {
            serde_json::json!({ "command": "events", "id": id, "after_seq": after_seq })
        }
    };

    match send_ipc_command(&args.ipc_name, &request_json) {
        Ok(response) => {
            if let Some(obj) = response.as_object() {
                let ok = obj
                    .get("ok")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false);
                if ok {
                    if let Some(data) = obj.get("data") {
                        println!("{}", serde_json::to_string_pretty(data).unwrap_or_default());
                    } else {
                        println!("OK");
                    }
                } else {
                    let err_msg = obj
                        .get("error")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown error");
                    eprintln!("Error: {err_msg}");
                    std::process::exit(1);
                }
            } else {
                println!("{response}");
            }
        }
        Err(err) => {
            eprintln!("Failed to connect to daemon: {err}");
            eprintln!("Is agent-harness running with ipc_name '{}'?", args.ipc_name);
            std::process::exit(1);
        }
    }
}

/// Connect to the IPC socket, send a JSON command, and read the response.
fn send_ipc_command(
    ipc_name: &str,
    request: &serde_json::Value,
) -> std::result::Result<serde_json::Value, Box<dyn std::error::Error>> {
    let name = ipc_name.to_ns_name::<GenericNamespaced>()?;
    let mut stream = Stream::connect(name)?;

    // Send request as a single JSON line.
    let mut request_line = serde_json::to_string(request)?;
    request_line.push('\n');
    stream.write_all(request_line.as_bytes())?;
    stream.flush()?;

    // Read response line.
    let mut reader = BufReader::new(&stream);
    let mut response_line = String::new();
    reader.read_line(&mut response_line)?;

    Ok(serde_json::from_str(&response_line)?)
}
