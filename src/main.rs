//! Dashgate - Entry Point
//!
//! Non-interactive operator commands over the sign-in and dashboard stores.

use anyhow::{bail, Context};
use dashgate::{AuthManager, Config, SecureDashboardConfig};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

fn print_help() {
    println!("Dashgate v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Usage: dashgate <COMMAND> [ARGS]");
    println!();
    println!("Commands:");
    println!("  login <name> <id>                      Check credentials against the roster");
    println!("  refresh                                Drop the roster cache and download again");
    println!("  set-roster <url>                       Store the roster CSV link");
    println!("  set-dashboard <url> [title] [desc]     Store the dashboard link (encrypted)");
    println!("  show-dashboard                         Print the stored dashboard link");
    println!("  clear-dashboard                        Delete the stored dashboard link");
    println!("  status                                 Show what is configured");
    println!();
    println!("Environment variables:");
    println!("  DASHGATE_DATA_DIR      Keys, cache and config (default: local data dir)");
    println!("  DASHGATE_ROSTER_URL    Roster link used until one is stored");
    println!("  DASHGATE_HTTP_TIMEOUT  Roster request timeout in seconds (default: 30)");
    println!("  RUST_LOG               trace | debug | info | warn | error");
}

fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        print_help();
        return Ok(());
    };
    if command == "--help" || command == "-h" {
        print_help();
        return Ok(());
    }

    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "error" => Level::ERROR,
            _ => Level::WARN,
        })
        .unwrap_or(Level::WARN);

    // Log to stderr; stdout carries command output
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = Config::from_env()?;
    info!("Dashgate v{} using {}", env!("CARGO_PKG_VERSION"), config.data_dir.display());

    match command {
        "login" => {
            let (Some(name), Some(id)) = (args.get(1), args.get(2)) else {
                bail!("usage: dashgate login <name> <id>");
            };
            let mut auth = AuthManager::new(&config)?;
            if !auth.authenticate(name, id) {
                bail!("access denied");
            }
            if let Some(session) = auth.current_session() {
                println!("Signed in as {} ({})", session.display_name, session.role);
            }
            if !auth.has_permission("dashboard") {
                bail!("no dashboard permission");
            }

            let dashboard = SecureDashboardConfig::open(&config)?;
            let url = dashboard
                .get_mobile_friendly_url()
                .context("dashboard link not configured")?;
            println!("{}", url);
            auth.logout();
        }
        "refresh" => {
            let mut auth = AuthManager::new(&config)?;
            if !auth.refresh_permissions() {
                bail!("roster refresh failed (see log for details)");
            }
            println!("Roster refreshed: {} users", auth.directory_len());
        }
        "set-roster" => {
            let Some(url) = args.get(1) else {
                bail!("usage: dashgate set-roster <url>");
            };
            let mut auth = AuthManager::new(&config)?;
            auth.set_roster_url(url)?;
            println!("Roster link saved");
        }
        "set-dashboard" => {
            let Some(url) = args.get(1) else {
                bail!("usage: dashgate set-dashboard <url> [title] [description]");
            };
            let title = args.get(2).map(String::as_str).unwrap_or("");
            let description = args.get(3).map(String::as_str).unwrap_or("");

            let mut dashboard = SecureDashboardConfig::open(&config)?;
            dashboard.set(url, title, description)?;
            println!(
                "Dashboard link saved ({})",
                dashboard.metadata().embed_type.as_str()
            );
        }
        "show-dashboard" => {
            let dashboard = SecureDashboardConfig::open(&config)?;
            let info = dashboard
                .dashboard_info()
                .context("dashboard link not configured")?;
            println!("{}", serde_json::to_string_pretty(&info)?);
            if let Some(embed) = dashboard.get_embed_url() {
                println!("embed:  {}", embed);
            }
            if let Some(mobile) = dashboard.get_mobile_friendly_url() {
                println!("mobile: {}", mobile);
            }
        }
        "clear-dashboard" => {
            // Works even when the sealed file no longer opens
            SecureDashboardConfig::reset(&config)?;
            println!("Dashboard link removed");
        }
        "status" => {
            let auth = AuthManager::new(&config)?;
            let dashboard = SecureDashboardConfig::open(&config)?;
            println!("Data dir:   {}", config.data_dir.display());
            println!("Auth key:   {}", auth.key_id());
            println!(
                "Roster:     {}",
                if auth.roster_url().is_some() { "configured" } else { "not configured" }
            );
            println!(
                "Dashboard:  {}",
                if dashboard.is_configured() { "configured" } else { "not configured" }
            );
        }
        other => {
            print_help();
            bail!("unknown command: {}", other);
        }
    }

    Ok(())
}
