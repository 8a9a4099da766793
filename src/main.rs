//! Product Viewer - terminal frontend
//!
//! Renders the view state to stdout and reads commands from stdin. Logs go
//! to stderr.

#![deny(clippy::all)]

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use product_viewer::app::{Action, App};
use product_viewer::auth::{BrowserSignIn, OAuth2Client, SessionManager};
use product_viewer::cache::file::default_cache_path;
use product_viewer::cache::FileTokenCache;
use product_viewer::config::Config;
use product_viewer::products::ProductClient;
use product_viewer::ui::render;

fn main() -> Result<()> {
    // Load .env file (if present) before anything else
    if let Err(e) = dotenvy::dotenv() {
        // .env file is optional - only log if it's not a "file not found" error
        if !e.to_string().contains("not found") {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            init_logging("info");
            error!("Failed to load configuration: {:#}", e);
            eprintln!("Configuration error: {:#}", e);
            eprintln!("\nPlease set the following environment variables:");
            eprintln!("  AZURE_CLIENT_ID=<your-azure-ad-client-id>");
            eprintln!("  AZURE_TENANT_ID=<your-tenant-id>");
            std::process::exit(1);
        }
    };

    init_logging(&config.logging.level);
    info!("Starting {} v{}", config.app.name, env!("CARGO_PKG_VERSION"));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create Tokio runtime")?;

    let result = runtime.block_on(run(config));
    // Don't wait on a stdin read still parked in the blocking pool
    runtime.shutdown_timeout(Duration::from_millis(100));
    result
}

/// Initialize tracing/logging on stderr so stdout stays the UI.
fn init_logging(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

async fn run(config: Config) -> Result<()> {
    let oauth_client = OAuth2Client::new(&config).context("Failed to create OAuth client")?;

    let sign_in = BrowserSignIn::new(
        config.redirect_port()?,
        Duration::from_secs(config.oauth.sign_in_timeout_seconds),
    );
    let cancel = sign_in.cancel_handle();

    let cache_path = default_cache_path(&config.cache.file_name)
        .context("Could not determine the token cache directory")?;
    info!("Token cache: {}", cache_path.display());

    let session = SessionManager::new(
        oauth_client,
        sign_in,
        FileTokenCache::new(cache_path),
        config.api_scopes(),
        chrono::Duration::seconds(config.token.refresh_before_expiry_seconds as i64),
    );
    let logout_url = session.logout_url();
    let products = ProductClient::new(config.products_url()?)
        .context("Failed to create product API client")?;

    let app = App::new(session, products)
        .with_cancel_handle(cancel)
        .with_provider_logout(logout_url, |url| open::that(url.as_str()));

    let (actions_tx, actions_rx) = mpsc::channel(10);
    tokio::spawn(read_actions(actions_tx));

    let mut last_screen = String::new();
    app.run(actions_rx, |state| {
        let screen = render(state);
        if screen != last_screen {
            print!("\n{}", screen);
            let _ = std::io::stdout().flush();
            last_screen = screen;
        }
    })
    .await;

    Ok(())
}

/// Forward stdin commands to the controller until EOF or `quit`.
async fn read_actions(actions_tx: mpsc::Sender<Action>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read stdin: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let action = match line.parse::<Action>() {
            Ok(action) => action,
            Err(e) => {
                warn!("{}", e);
                continue;
            }
        };

        if actions_tx.send(action).await.is_err() || action == Action::Quit {
            break;
        }
    }

    let _ = actions_tx.send(Action::Quit).await;
}
