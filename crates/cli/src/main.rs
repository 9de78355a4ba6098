use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use color_eyre::eyre::{self, Context};
use discovery::env::{DEBUG_VAR, SOCKET_VAR, URL_VAR};
use discovery::{DiscoveryResult, Environment, Resolver};
use futures::StreamExt;
use tracing_subscriber::EnvFilter;
use transport::{Configuration, Request, Response};

/// Talk to the tailscaled local API.
#[derive(Debug, Parser)]
#[command(name = "localapi", version)]
struct Args {
    /// Allow same-user proof discovery, which may trigger an OS permission
    /// prompt.
    #[arg(long, global = true)]
    allow_sensitive_discovery: bool,

    /// Unix socket to connect to.
    #[arg(long, global = true, env = SOCKET_VAR)]
    socket: Option<PathBuf>,

    /// Base URL to send requests to. Takes precedence over --socket.
    #[arg(long, global = true, env = URL_VAR)]
    url: Option<String>,

    /// More logging; repeat for more.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the resolved endpoint as JSON.
    Resolve,

    /// Send a GET request and print the body.
    Get {
        path: String,

        /// Query parameter as key=value; may be repeated.
        #[arg(short, long = "query", value_parser = parse_key_val)]
        query: Vec<(String, String)>,
    },

    /// Send a POST request and print the body.
    Post {
        path: String,

        /// JSON request body.
        #[arg(short, long)]
        data: Option<String>,

        #[arg(short, long = "query", value_parser = parse_key_val)]
        query: Vec<(String, String)>,
    },

    /// Print streamed event lines until interrupted.
    Watch {
        path: String,

        #[arg(short, long = "query", value_parser = parse_key_val)]
        query: Vec<(String, String)>,
    },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {s:?}"))?;
    if key.is_empty() {
        return Err(format!("empty key in {s:?}"));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Filter directives used when `RUST_LOG` is unset.
///
/// Discovery logs its steps at `info`, so verbose discovery lifts the
/// `discovery` target to `info` even when everything else stays at `warn`.
fn default_directives(verbose: u8, verbose_discovery: bool) -> String {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    if verbose_discovery && verbose == 0 {
        format!("{level},discovery=info")
    } else {
        level.to_string()
    }
}

fn log_filter(verbose: u8, verbose_discovery: bool) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose, verbose_discovery)))
}

/// The process environment with command line overrides applied.
fn environment(args: &Args) -> Environment {
    let mut environment = Environment::from_process();
    if let Some(socket) = &args.socket {
        environment = environment.with(SOCKET_VAR, socket.display().to_string());
    }
    if let Some(url) = &args.url {
        environment = environment.with(URL_VAR, url.clone());
    }
    environment
}

fn resolve(args: &Args) -> DiscoveryResult {
    let environment = environment(args);
    Resolver::new(&environment)
        .allow_sensitive_discovery(args.allow_sensitive_discovery)
        .resolve()
}

fn with_query(mut request: Request, query: &[(String, String)]) -> Request {
    for (key, value) in query {
        request = request.query(key.clone(), value.clone());
    }
    request
}

/// Pretty-print JSON bodies; anything else is printed as text.
fn render_body(body: &[u8]) -> String {
    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(value) => serde_json::to_string_pretty(&value)
            .unwrap_or_else(|_| String::from_utf8_lossy(body).into_owned()),
        Err(_) => String::from_utf8_lossy(body).into_owned(),
    }
}

fn print_response(response: &Response) -> eyre::Result<()> {
    let body = render_body(response.body());
    if !response.is_success() {
        if !body.is_empty() {
            eprintln!("{body}");
        }
        eyre::bail!("local API returned status {}", response.status());
    }
    if !body.is_empty() {
        println!("{body}");
    }
    Ok(())
}

async fn watch(config: &Configuration, request: &Request) -> eyre::Result<()> {
    let mut events = config
        .send_streaming(request)
        .await
        .wrap_err("opening event stream")?;

    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    loop {
        tokio::select! {
            _ = &mut interrupt => {
                tracing::debug!("interrupted, closing event stream");
                return Ok(());
            }
            event = events.next() => match event {
                Some(Ok(line)) => println!("{}", String::from_utf8_lossy(&line)),
                Some(Err(e)) => return Err(e).wrap_err("reading event stream"),
                None => {
                    tracing::debug!("event stream ended");
                    return Ok(());
                }
            }
        }
    }
}

async fn run(args: Args) -> eyre::Result<()> {
    let result = resolve(&args);
    tracing::debug!(endpoint = %result.endpoint, source = ?result.source, "resolved endpoint");

    match args.command {
        Command::Resolve => {
            let rendered = serde_json::to_string_pretty(&result).wrap_err("serialising result")?;
            println!("{rendered}");
            Ok(())
        }
        Command::Get { path, query } => {
            let config = Configuration::from_discovery(result);
            let request = with_query(Request::get(path), &query);
            let response = config.send(&request).await.wrap_err("sending request")?;
            print_response(&response)
        }
        Command::Post { path, data, query } => {
            let config = Configuration::from_discovery(result);
            let mut request = with_query(Request::post(path), &query);
            if let Some(data) = data {
                let body: serde_json::Value =
                    serde_json::from_str(&data).wrap_err("--data is not valid JSON")?;
                request = request.json_body(&body).wrap_err("encoding request body")?;
            }
            let response = config.send(&request).await.wrap_err("sending request")?;
            print_response(&response)
        }
        Command::Watch { path, query } => {
            let config = Configuration::from_discovery(result);
            let request = with_query(Request::get(path), &query);
            watch(&config, &request).await
        }
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install().context("installing color_eyre")?;

    let args = Args::parse();
    let verbose_discovery = environment(&args).flag(DEBUG_VAR);
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(args.verbose, verbose_discovery))
        .with_writer(std::io::stderr)
        .init();
    tracing::debug!(?args, "parsed command line arguments");

    if let Err(e) = run(args).await {
        tracing::error!(error = %e, "command failed");
        return Err(e);
    }
    Ok(())
}
