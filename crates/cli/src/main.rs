//! # CLI - DriftKV Interactive Shell
//!
//! A REPL-style command-line interface for the DriftKV storage engine.
//! Reads whitespace-separated commands from stdin, executes them against
//! the engine, and prints results to stdout. Designed for both interactive
//! use and scripted testing (pipe commands via stdin).
//!
//! ## Commands
//!
//! ```text
//! SET key value      Insert or update a key-value pair
//! GET key            Look up a key (prints the value or "not found")
//! DELETE key         Delete a key (writes a tombstone)
//! SCAN start end     Range scan, inclusive on both ends
//! FLUSH              Force-flush the memtable to an SSTable
//! COMPACT            Drain pending compactions
//! STATS              Print engine debug info
//! EXIT               Shut down gracefully
//! ```
//!
//! ## Test mode
//!
//! `driftkv test` runs the end-to-end battery against a temporary
//! directory and exits non-zero on the first failure.
//!
//! ## Configuration
//!
//! ```text
//! DRIFTKV_DIR   data directory (default: "data")
//! ```

mod battery;

use anyhow::Result;
use engine::{Config, Store};
use std::io::{self, BufRead, Write};

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    if std::env::args().nth(1).as_deref() == Some("test") {
        let failures = battery::run_all();
        if failures > 0 {
            std::process::exit(1);
        }
        return Ok(());
    }

    let dir = std::env::var("DRIFTKV_DIR").unwrap_or_else(|_| "data".to_string());
    let store = Store::open(&dir, Config::default())?;

    println!("DriftKV started (dir={}, tables={})", dir, store.table_count());
    println!("Commands: SET key value | GET key | DELETE key | SCAN start end");
    println!("          FLUSH | COMPACT | STATS | EXIT");
    print!("> ");
    io::stdout().flush().ok();

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let mut parts = line.split_whitespace();
        if let Some(cmd) = parts.next() {
            match cmd.to_uppercase().as_str() {
                "SET" => match (parts.next(), parts.next()) {
                    (Some(key), Some(first)) => {
                        // the value is everything after the key
                        let mut value = first.to_string();
                        for rest in parts {
                            value.push(' ');
                            value.push_str(rest);
                        }
                        match store.put(key.as_bytes(), value.as_bytes()) {
                            Ok(()) => println!("OK"),
                            Err(e) => println!("ERR set failed: {e}"),
                        }
                    }
                    _ => println!("ERR usage: SET key value"),
                },
                "GET" => match parts.next() {
                    Some(key) => match store.get(key.as_bytes()) {
                        Ok(Some(value)) => println!("{}", String::from_utf8_lossy(&value)),
                        Ok(None) => println!("not found"),
                        Err(e) => println!("ERR read failed: {e}"),
                    },
                    None => println!("ERR usage: GET key"),
                },
                "DELETE" | "DEL" => match parts.next() {
                    Some(key) => match store.delete(key.as_bytes()) {
                        Ok(()) => println!("OK"),
                        Err(e) => println!("ERR delete failed: {e}"),
                    },
                    None => println!("ERR usage: DELETE key"),
                },
                "SCAN" => match (parts.next(), parts.next()) {
                    (Some(start), Some(end)) => {
                        match store.scan(start.as_bytes(), end.as_bytes()) {
                            Ok(iter) => {
                                let mut count = 0usize;
                                for pair in iter {
                                    match pair {
                                        Ok((key, value)) => {
                                            println!(
                                                "{} -> {}",
                                                String::from_utf8_lossy(&key),
                                                String::from_utf8_lossy(&value)
                                            );
                                            count += 1;
                                        }
                                        Err(e) => {
                                            println!("ERR scan failed: {e}");
                                            break;
                                        }
                                    }
                                }
                                println!("({count} entries)");
                            }
                            Err(e) => println!("ERR scan failed: {e}"),
                        }
                    }
                    _ => println!("ERR usage: SCAN start end"),
                },
                "FLUSH" => match store.flush() {
                    Ok(()) => println!("OK (tables={})", store.table_count()),
                    Err(e) => println!("ERR flush failed: {e}"),
                },
                "COMPACT" => match store.compact() {
                    Ok(()) => println!(
                        "OK (L0={}, L1={})",
                        store.level_table_count(0),
                        store.level_table_count(1)
                    ),
                    Err(e) => println!("ERR compact failed: {e}"),
                },
                "STATS" => println!("{store:?}"),
                "EXIT" | "QUIT" => {
                    println!("bye");
                    break;
                }
                other => println!("unknown command: {other}"),
            }
        }

        print!("> ");
        io::stdout().flush().ok();
    }

    store.close()
}
