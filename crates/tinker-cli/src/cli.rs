//! CLI argument definitions for Tinker.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Tinker -- a host runtime for sandboxed computers.
#[derive(Parser)]
#[command(
    name = "tinker",
    version,
    about = "Tinker -- run a computer's http API from the shell",
    long_about = "Boots a single computer with the http API installed, performs one \
                  operation through it and prints the events the computer receives."
)]
pub struct Cli {
    /// Configuration file (TOML).  Defaults are used when omitted.
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Seconds to wait for each event before giving up.
    #[arg(long, global = true, default_value_t = 30)]
    pub wait: u64,

    /// Print the metrics the computer recorded before exiting.
    #[arg(long, global = true)]
    pub metrics: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Perform an HTTP request and print the response.
    Request {
        url: String,

        /// Request method; defaults to GET, or POST when a body is given.
        #[arg(long, short = 'X')]
        method: Option<String>,

        /// Request body.
        #[arg(long, short = 'd')]
        body: Option<String>,

        /// Extra header, as `Name: value`.  May be repeated.
        #[arg(long = "header", short = 'H')]
        headers: Vec<String>,

        /// Do not follow redirects.
        #[arg(long)]
        no_redirect: bool,

        /// Read the response as binary.
        #[arg(long)]
        binary: bool,
    },

    /// Check whether a URL may be contacted.
    Check { url: String },

    /// Open a websocket, send messages and print the replies.
    Ws {
        url: String,

        /// Message to send once connected.  May be repeated.
        #[arg(long = "send", short = 's')]
        messages: Vec<String>,

        /// Number of messages to wait for; defaults to one per message sent.
        #[arg(long)]
        receive: Option<usize>,

        /// Extra header, as `Name: value`.  May be repeated.
        #[arg(long = "header", short = 'H')]
        headers: Vec<String>,
    },

    /// Print the effective configuration as TOML.
    Config,
}
