use clap::Parser;
use std::path::{Path, PathBuf};

use psim::diag::Diagnostic;
use psim::driver::{Emit, Session, SessionOptions};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum EmitTarget {
    Regions,
    Nest,
    Events,
    Cost,
    Dot,
    Json,
}

impl From<EmitTarget> for Emit {
    fn from(t: EmitTarget) -> Self {
        match t {
            EmitTarget::Regions => Emit::Regions,
            EmitTarget::Nest => Emit::Nest,
            EmitTarget::Events => Emit::Events,
            EmitTarget::Cost => Emit::Cost,
            EmitTarget::Dot => Emit::Dot,
            EmitTarget::Json => Emit::Json,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "psim",
    version,
    about = "Pipeline Schedule Simulator — bounds inference and evaluation order for .psl pipelines"
)]
struct Cli {
    /// Input .psl source file
    source: PathBuf,

    /// What to print
    #[arg(long, value_enum, default_value_t = EmitTarget::Regions)]
    emit: EmitTarget,

    /// Only run realize statements of this stage
    #[arg(long)]
    realize: Option<String>,

    /// Log passes and timing (overridden by RUST_LOG)
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "psim=debug" } else { "psim=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!(source = %cli.source.display(), emit = ?cli.emit, "starting");

    let source = match std::fs::read_to_string(&cli.source) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("psim: error: {}: {}", cli.source.display(), e);
            std::process::exit(2);
        }
    };

    let emit = Emit::from(cli.emit);
    let mut session = Session::new(
        source.clone(),
        SessionOptions {
            realize: cli.realize,
            ..Default::default()
        },
    );

    // Parse diagnostics are recorded before any pass runs.
    report(&cli.source, &source, &session.diagnostics);
    let result = session.run(emit, |_, diags| report(&cli.source, &source, diags));
    if result.is_err() {
        std::process::exit(1);
    }

    match session.render(emit) {
        Ok(out) => print!("{}", out),
        Err(e) => {
            eprintln!("psim: error: cannot serialize report: {}", e);
            std::process::exit(2);
        }
    }
}

/// Print diagnostics to stderr, located in `source` when a span is known.
fn report(path: &Path, source: &str, diags: &[Diagnostic]) {
    for d in diags {
        match d.location(source) {
            Some((line, col)) => eprintln!("psim: {}:{}:{}: {}", path.display(), line, col, d),
            None => eprintln!("psim: {}: {}", path.display(), d),
        }
    }
}
