//! scanrelayd - feeds scan result documents into a dispatcher
//!
//! Reads newline-delimited JSON scan documents from stdin or a file and submits
//! each one to every configured route (or a single route with `--route`). A
//! line that is not valid JSON is logged with its line number and skipped.
//!
//! ## Signals
//!
//! - `SIGHUP`: reload the configuration file
//! - `Ctrl-C`: drain, terminate outputs and exit

use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use scanrelay_core::{ConfigSource, Dispatcher, DispatcherDeps, MemoryScanStore};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn, Level};

#[derive(Parser, Debug)]
#[command(name = "scanrelayd")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Route scan results to notification outputs", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, env = "SCANRELAY_CONFIG")]
    config: PathBuf,

    /// File of JSON scan documents, `-` for stdin
    #[arg(short, long, default_value = "-")]
    input: String,

    /// Submit every document to this route only
    #[arg(short, long)]
    route: Option<String>,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Terminate once the input is exhausted instead of waiting for Ctrl-C
    #[arg(long)]
    exit_on_eof: bool,
}

impl Cli {
    fn level(&self) -> Level {
        if self.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    scanrelay_core::init_tracing(cli.json, cli.level());

    let dispatcher = Dispatcher::new(DispatcherDeps::builtin(Arc::new(MemoryScanStore::new())));
    dispatcher
        .start(ConfigSource::File(cli.config.clone()))
        .await
        .with_context(|| format!("failed to start with {}", cli.config.display()))?;

    let reader = open_input(&cli.input)?;
    let (tx, mut documents) = mpsc::channel::<Vec<u8>>(64);
    // a plain thread so a blocked stdin read never holds up runtime shutdown
    std::thread::spawn(move || {
        for document in read_documents(reader) {
            match document {
                Ok(Document::Event(bytes)) => {
                    if tx.blocking_send(bytes).is_err() {
                        break;
                    }
                }
                Ok(Document::Malformed { line, error }) => {
                    warn!(line, error = %error, "skipping malformed input line");
                }
                Err(e) => {
                    warn!(error = %e, "stopped reading input");
                    break;
                }
            }
        }
    });

    let mut hangup = Hangup::new()?;
    let mut input_open = true;
    loop {
        tokio::select! {
            document = documents.recv(), if input_open => match document {
                Some(bytes) => submit(&dispatcher, cli.route.as_deref(), &bytes).await,
                None => {
                    info!("input exhausted");
                    input_open = false;
                    if cli.exit_on_eof {
                        break;
                    }
                }
            },
            _ = hangup.recv() => {
                info!("SIGHUP received, reloading configuration");
                if let Err(e) = dispatcher.reload().await {
                    warn!(error = %e, "reload rejected");
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                info!("interrupt received, shutting down");
                break;
            }
        }
    }

    dispatcher.terminate().await;
    Ok(())
}

async fn submit(dispatcher: &Dispatcher, route: Option<&str>, bytes: &[u8]) {
    let result = match route {
        Some(route) => match dispatcher.submit_to_route(route, bytes).await {
            Ok(handle) => {
                handle.join().await;
                Ok(())
            }
            Err(e) => Err(e),
        },
        None => dispatcher.submit(bytes).await,
    };
    if let Err(e) = result {
        warn!(error = %e, "event not submitted");
    }
}

fn open_input(input: &str) -> Result<Box<dyn Read + Send>> {
    if input == "-" {
        return Ok(Box::new(std::io::stdin()));
    }
    let file = std::fs::File::open(input).with_context(|| format!("failed to open {input}"))?;
    Ok(Box::new(file))
}

/// One non-blank input line.
#[derive(Debug)]
enum Document {
    Event(Vec<u8>),
    Malformed { line: usize, error: serde_json::Error },
}

/// Read one JSON document per line. Blank lines are ignored; only a read
/// error ends the stream.
fn read_documents<R: Read>(reader: R) -> impl Iterator<Item = Result<Document>> {
    BufReader::new(reader)
        .lines()
        .enumerate()
        .filter_map(|(index, line)| {
            let line = match line.context("failed to read input") {
                Ok(line) => line,
                Err(e) => return Some(Err(e)),
            };
            let text = line.trim();
            if text.is_empty() {
                return None;
            }
            Some(Ok(match serde_json::from_str::<Value>(text) {
                Ok(_) => Document::Event(text.as_bytes().to_vec()),
                Err(error) => Document::Malformed {
                    line: index + 1,
                    error,
                },
            }))
        })
}

#[cfg(unix)]
struct Hangup(tokio::signal::unix::Signal);

#[cfg(unix)]
impl Hangup {
    fn new() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        let hangup = signal(SignalKind::hangup()).context("failed to listen for SIGHUP")?;
        Ok(Self(hangup))
    }

    async fn recv(&mut self) {
        if self.0.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
struct Hangup;

#[cfg(not(unix))]
impl Hangup {
    fn new() -> Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) {
        std::future::pending::<()>().await;
    }
}
