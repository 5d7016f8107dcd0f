//! Entry point: parses CLI flags, assembles `Config` from the
//! environment, wires the Event Dispatcher and its two Status Reporter
//! implementations, and serves the HTTP surface.

mod server;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use clap::Parser;
use dockyard_core::config::Config;
use dockyard_core::dispatch::EventDispatcher;
use dockyard_core::pipeline::BuildPipeline;
use dockyard_core::registry::Registry;
use dockyard_github::status::{CommitStatusReporter, PrCommentReporter};
use dockyard_github::GithubInterpreter;
use log::{error, info, LevelFilter};

const BUILDER_BINARY: &str = "dockyard-build";

/// Webhook-driven continuous documentation builder.
#[derive(Debug, Parser)]
#[command(name = "dockyard", version, about = "Builds and publishes docs on code-forge webhooks")]
struct Cli {
    /// Address to bind the HTTP listener to.
    #[arg(long, default_value = "0.0.0.0")]
    bind_address: IpAddr,

    /// Port to bind the HTTP listener to.
    #[arg(long, default_value_t = 8080)]
    bind_port: u16,

    /// Write logs to this file in addition to stderr.
    #[arg(short = 'l', long = "log-file")]
    log_file: Option<String>,

    /// Increase verbosity; repeatable (-v, -vv, -vvv).
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease verbosity; repeatable (-q, -qq).
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    quiet: u8,

    /// Suppress all logging output.
    #[arg(short = 's', long)]
    silent: bool,
}

impl Cli {
    fn log_level(&self) -> LevelFilter {
        if self.silent {
            return LevelFilter::Off;
        }
        // info is the baseline; -v/-vv climb towards Trace, -q/-qq descend
        // towards Error, matching the original service's verbosity knobs.
        let base = 2i8; // Info
        let level = base + self.verbose as i8 - self.quiet as i8;
        match level.clamp(0, 4) {
            0 => LevelFilter::Error,
            1 => LevelFilter::Warn,
            2 => LevelFilter::Info,
            3 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

fn init_logging(cli: &Cli) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(cli.log_level());
    builder.format(|buf, record| {
        use std::io::Write;
        writeln!(
            buf,
            "{} {:<5} [{}] {}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
            record.level(),
            record.target(),
            record.args()
        )
    });

    if let Some(path) = &cli.log_file {
        match std::fs::OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => {
                eprintln!("failed to open log file {}: {}", path, e);
            }
        }
    }

    builder.init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    let config = match Config::from_env() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("startup failed: {}", e);
            std::process::exit(1);
        }
    };

    let registry = Arc::new(Registry::new());
    let pipeline = Arc::new(BuildPipeline::new(registry, BUILDER_BINARY, config.app_name.clone()));

    let commit_reporter = Arc::new(CommitStatusReporter::new(config.github_token.clone()));
    let pr_reporter = Arc::new(PrCommentReporter::new(config.github_token.clone()));

    let dispatcher =
        Arc::new(EventDispatcher::new(config.clone(), pipeline, commit_reporter, pr_reporter));
    let interpreter = Arc::new(GithubInterpreter::new(config.github_hmac_token.clone()));

    let state = server::AppState { dispatcher, interpreter };
    let app = server::router(state);

    let addr = SocketAddr::new(cli.bind_address, cli.bind_port);
    info!("listening on {}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        error!("server exited with error: {}", e);
        std::process::exit(1);
    }
}

#[allow(dead_code)]
fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}
