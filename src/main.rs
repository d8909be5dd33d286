use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use clap::Parser;
use lanshare::{app, AppState, Config, ShareRoot};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

// --- Configuration ---
#[derive(Parser, Debug)]
#[command(author, version, about = "Share a directory over the local network", long_about = None)]
struct Args {
    /// The root directory to serve files from
    #[arg(short, long, value_name = "DIR", env = "LANSHARE_ROOT", default_value = ".")]
    root: PathBuf,

    /// The network address to bind to
    #[arg(short, long, value_name = "ADDR", env = "LANSHARE_BIND", default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// Optional TOML config file
    #[arg(short, long, value_name = "FILE", env = "LANSHARE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "lanshare=debug,tower_http=debug"
    } else {
        "lanshare=info,tower_http=info"
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    info!("lanshare v{} starting", env!("CARGO_PKG_VERSION"));

    let config = match &args.config {
        Some(path) => match Config::from_file(path) {
            Ok(config) => config,
            Err(e) => fail(format!("Failed to load config '{}': {}", path.display(), e)),
        },
        None => Config::default(),
    };

    let root = match ShareRoot::new(&args.root) {
        Ok(root) => root,
        Err(e) => fail(format!(
            "Failed to resolve root directory '{}': {}",
            args.root.display(),
            e
        )),
    };

    info!("Serving files from: {}", root.as_path().display());
    info!("Listening on: {}", args.bind);
    if config.follow_symlinks {
        info!("Following symbolic links that stay inside the share root");
    }

    let state = Arc::new(AppState::new(root, config));

    let listener = match tokio::net::TcpListener::bind(args.bind).await {
        Ok(l) => l,
        Err(e) => fail(format!("Failed to bind to address {}: {}", args.bind, e)),
    };
    if let Err(e) = axum::serve(listener, app(state)).await {
        fail(format!("Server error: {}", e));
    }
}

fn fail(message: String) -> ! {
    error!("{}. Exiting.", message);
    eprintln!("Error: {}", message);
    std::process::exit(1);
}
