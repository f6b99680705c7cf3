/*!
 * warden - Interactive Entry Point
 *
 * Thin presentation layer over the procwarden core: joins the shared
 * registry, then drives a line-based menu for launching, listing, and
 * terminating tracked processes while event notices from every instance
 * stream in.
 */

use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::Mutex;
use procwarden::{ProcessEntry, ProcessMode, Supervisor};
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "warden",
    version,
    about = "Cooperative multi-instance process supervisor"
)]
struct Cli {
    /// IPC namespace; instances sharing it share one registry
    #[arg(long, default_value = "procwarden")]
    namespace: String,

    /// Seconds between reconciler sweeps
    #[arg(long, default_value_t = 2)]
    sweep_interval: u64,
}

/// Serializes console writes from the foreground loop and the event
/// callbacks running on background threads. Cosmetic only.
struct Console {
    out: Mutex<()>,
}

impl Console {
    fn new() -> Self {
        Self { out: Mutex::new(()) }
    }

    fn line(&self, text: &str) {
        let _guard = self.out.lock();
        println!("{text}");
    }

    fn notice(&self, text: &str) {
        let _guard = self.out.lock();
        println!("\n[event] {text}");
        print!("warden> ");
        let _ = io::stdout().flush();
    }

    fn prompt(&self) {
        let _guard = self.out.lock();
        print!("warden> ");
        let _ = io::stdout().flush();
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let console = Arc::new(Console::new());

    let events_console = Arc::clone(&console);
    let mut supervisor = Supervisor::builder()
        .namespace(&cli.namespace)
        .sweep_interval(Duration::from_secs(cli.sweep_interval.max(1)))
        .on_event(move |notice| events_console.notice(notice))
        .start()
        .context("could not join the shared process registry")?;

    console.line("==============================");
    console.line("          warden");
    console.line("==============================");
    console.line(&format!(
        "instance {} joined namespace '{}'",
        supervisor.instance_id(),
        cli.namespace
    ));
    print_help(&console);

    let stdin = io::stdin();
    loop {
        console.prompt();
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break; // EOF: treat like quit
        }

        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };

        match verb {
            "" => {}
            "help" => print_help(&console),
            "run" => do_launch(&console, &supervisor, rest, ProcessMode::Attached),
            "rund" => do_launch(&console, &supervisor, rest, ProcessMode::Detached),
            "list" => do_list(&console, &supervisor),
            "json" => do_json(&console, &supervisor),
            "kill" => do_kill(&console, &supervisor, rest),
            "quit" | "exit" => break,
            other => console.line(&format!("unknown command '{other}' (try 'help')")),
        }
    }

    let report = supervisor.shutdown()?;
    if !report.killed.is_empty() {
        console.line(&format!("stopped {} attached process(es)", report.killed.len()));
    }
    if report.torn_down {
        console.line("last instance out; registry destroyed");
    } else {
        console.line("left the registry; other instances remain");
    }
    Ok(())
}

fn print_help(console: &Console) {
    console.line("commands:");
    console.line("  run <command>    launch attached (stopped when this instance exits)");
    console.line("  rund <command>   launch detached (own session, outlives this instance)");
    console.line("  list             show tracked processes");
    console.line("  json             tracked processes as JSON");
    console.line("  kill <pid>       SIGTERM a pid");
    console.line("  quit             leave the registry and exit");
}

fn do_launch(console: &Console, supervisor: &Supervisor, command: &str, mode: ProcessMode) {
    match supervisor.launch(command, mode) {
        Ok(pid) => console.line(&format!("started '{command}' as pid {pid} ({mode})")),
        Err(e) => console.line(&format!("launch failed: {e}")),
    }
}

fn do_list(console: &Console, supervisor: &Supervisor) {
    let entries = match supervisor.processes() {
        Ok(entries) => entries,
        Err(e) => {
            console.line(&format!("list failed: {e}"));
            return;
        }
    };
    if entries.is_empty() {
        console.line("no tracked processes");
        return;
    }

    console.line(&format!(
        "{:<8} {:<8} {:<10} {:<12} {:<10} {}",
        "PID", "OWNER", "MODE", "STATUS", "ELAPSED", "COMMAND"
    ));
    for entry in &entries {
        console.line(&format!(
            "{:<8} {:<8} {:<10} {:<12} {:<10} {}",
            entry.pid,
            entry.owner_pid,
            entry.mode.to_string(),
            entry.status.to_string(),
            format_elapsed(entry),
            entry.command
        ));
    }
}

fn do_json(console: &Console, supervisor: &Supervisor) {
    match supervisor.processes() {
        Ok(entries) => match serde_json::to_string_pretty(&entries) {
            Ok(json) => console.line(&json),
            Err(e) => console.line(&format!("serialization failed: {e}")),
        },
        Err(e) => console.line(&format!("list failed: {e}")),
    }
}

fn do_kill(console: &Console, supervisor: &Supervisor, arg: &str) {
    let pid = match arg.parse() {
        Ok(pid) => pid,
        Err(_) => {
            console.line("usage: kill <pid>");
            return;
        }
    };
    match supervisor.terminate(pid) {
        Ok(()) => console.line(&format!("sent SIGTERM to {pid}")),
        Err(e) => console.line(&format!("kill failed: {e}")),
    }
}

fn format_elapsed(entry: &ProcessEntry) -> String {
    let total = entry.elapsed().as_secs();
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}
