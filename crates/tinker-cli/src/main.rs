//! CLI entry point for Tinker.
//!
//! This binary provides the `tinker` command: it boots one computer with the
//! `http` API installed, performs a single operation through it and prints
//! the events the computer receives.

mod cli;
mod session;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tinker_kernel::{CoreConfig, Table, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::session::{Session, display, format_event, header_table};

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing("warn");

    let config = load_config(cli.config.as_deref())?;
    if let Commands::Config = cli.command {
        let text = toml::to_string_pretty(&config).context("failed to render configuration")?;
        print!("{text}");
        return Ok(());
    }

    let mut session = Session::start(config, Duration::from_secs(cli.wait))?;
    let result = match cli.command {
        Commands::Request {
            url,
            method,
            body,
            headers,
            no_redirect,
            binary,
        } => {
            let mut options = Table::new();
            options.insert("url", url.as_str());
            options.insert("body", body);
            options.insert("method", method);
            options.insert("headers", header_table(&headers)?);
            options.insert("redirect", !no_redirect);
            options.insert("binary", binary);
            cmd_request(&mut session, options).await
        }
        Commands::Check { url } => cmd_check(&mut session, &url).await,
        Commands::Ws {
            url,
            messages,
            receive,
            headers,
        } => {
            let receive = receive.unwrap_or(messages.len());
            cmd_websocket(&mut session, &url, header_table(&headers)?, &messages, receive).await
        }
        Commands::Config => Ok(()),
    };

    if cli.metrics {
        print_metrics(&session);
    }
    session.shutdown();
    result
}

// ---------------------------------------------------------------------------
// Subcommand: request
// ---------------------------------------------------------------------------

async fn cmd_request(session: &mut Session, options: Table) -> Result<()> {
    session.call("request", vec![Value::Table(options)])?;
    let event = session
        .wait_for(&["http_success", "http_failure"])
        .await?;

    let handle = event.args.get(2).or_else(|| event.args.get(1));
    let Some(handle) = handle.filter(|h| h.as_object().is_some()) else {
        bail!("request failed: {}", display(&event.args[1]));
    };

    let code = session.call_object(handle, "getResponseCode", vec![])?;
    println!(
        "{} {}",
        display(&code[0]),
        code.get(1).map(display).unwrap_or_default()
    );
    let headers = session.call_object(handle, "getResponseHeaders", vec![])?;
    if let Some(Value::Table(headers)) = headers.first() {
        let mut lines: Vec<String> = headers
            .iter()
            .map(|(name, value)| format!("{}: {}", display(name), display(value)))
            .collect();
        lines.sort();
        for line in lines {
            println!("{line}");
        }
    }
    println!();

    let body = session.call_object(handle, "readAll", vec![])?;
    if let Some(body) = body.first() {
        println!("{}", display(body));
    }
    session.call_object(handle, "close", vec![])?;

    if event.name == "http_failure" {
        bail!("request failed: {}", display(&event.args[1]));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: check
// ---------------------------------------------------------------------------

async fn cmd_check(session: &mut Session, url: &str) -> Result<()> {
    session.call("checkURL", vec![Value::from(url)])?;
    let event = session.wait_for(&[tinker_http::CHECK_EVENT]).await?;
    println!("{}", format_event(&event));
    match event.args.get(1) {
        Some(Value::Boolean(true)) => Ok(()),
        _ => bail!(
            "{url} may not be contacted: {}",
            event.args.get(2).map(display).unwrap_or_default()
        ),
    }
}

// ---------------------------------------------------------------------------
// Subcommand: ws
// ---------------------------------------------------------------------------

async fn cmd_websocket(
    session: &mut Session,
    url: &str,
    headers: Table,
    messages: &[String],
    receive: usize,
) -> Result<()> {
    session.call("websocket", vec![Value::from(url), Value::Table(headers)])?;
    let event = session
        .wait_for(&["websocket_success", "websocket_failure"])
        .await?;
    if event.name == "websocket_failure" {
        bail!("could not connect: {}", display(&event.args[1]));
    }
    let socket = event.args[1].clone();
    info!(url, "websocket connected");

    for message in messages {
        session.call_object(&socket, "send", vec![Value::from(message.as_str())])?;
    }
    for _ in 0..receive {
        let event = session
            .wait_for(&["websocket_message", "websocket_closed"])
            .await?;
        println!("{}", format_event(&event));
        if event.name == "websocket_closed" {
            return Ok(());
        }
    }
    session.call_object(&socket, "close", vec![])?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load_config(path: Option<&Path>) -> Result<CoreConfig> {
    match path {
        Some(path) => CoreConfig::load(path)
            .with_context(|| format!("failed to load configuration from {}", path.display())),
        None => Ok(CoreConfig::default()),
    }
}

fn print_metrics(session: &Session) {
    let mut snapshot = session.metrics().snapshot();
    snapshot.sort_by_key(|(name, _)| *name);
    eprintln!();
    for (name, totals) in snapshot {
        eprintln!("{name:<24} count={} total={}", totals.count, totals.total);
    }
}

/// Initialize the tracing subscriber with the given default log level.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
