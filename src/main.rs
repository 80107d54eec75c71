use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use tab_retitle::bridge::NativeBridge;
use tab_retitle::config::{Config, get_config_dir, load_config};
use tab_retitle::coordinator::Coordinator;
use tab_retitle::host::Host;
use tab_retitle::protocol::{Inbound, Outbound, read_message, write_message};
use tab_retitle::server;
use tab_retitle::state::AppState;
use tab_retitle::store::{RuleStore, read_rules};
use tab_retitle::templates::{self, TEMPLATES};
use tab_retitle::watcher::RulesWatcher;

#[derive(Parser)]
#[command(
    name = "tab-retitle",
    about = "Rewrites browser tab titles from per-domain rules",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    /// Config directory (default: ~/.tab-retitle)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,

    /// Extension origin passed by the browser when it launches the host.
    #[arg(hide = true)]
    origin: Option<String>,

    /// Window handle the browser passes on Windows.
    #[arg(long, hide = true)]
    #[allow(dead_code)]
    parent_window: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Run as the extension's native-messaging host (default)
    Serve {
        /// Control API port
        #[arg(long)]
        port: Option<u16>,
        /// Rules file
        #[arg(long)]
        rules: Option<PathBuf>,
    },
    /// Validate every rule in a rules file
    Validate {
        #[arg(long)]
        rules: PathBuf,
    },
    /// Show which rule would govern a page and the title it yields
    Check {
        #[arg(long)]
        rules: PathBuf,
        #[arg(long)]
        url: String,
        #[arg(long)]
        title: String,
    },
    /// List built-in title script templates, or print one by name
    Templates { name: Option<String> },
}

// Logs go to stderr; stdout carries native messaging frames.
fn init_tracing(default_filter: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(io::stderr).with_ansi(false).with_target(true))
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => get_config_dir()?,
    };

    match cli.command {
        Some(Command::Validate { rules }) => {
            init_tracing("warn");
            validate(&rules).await
        }
        Some(Command::Check { rules, url, title }) => {
            init_tracing("warn");
            check(&rules, &url, &title).await
        }
        Some(Command::Templates { name: Some(name) }) => match templates::find(&name) {
            Some(t) => {
                println!("{}", t.script);
                Ok(())
            }
            None => Err(format!("Unknown template: {}", name).into()),
        },
        Some(Command::Templates { name: None }) => {
            for t in TEMPLATES {
                println!("{} (every {}s): {}\n{}\n", t.name, t.interval, t.description, t.script);
            }
            Ok(())
        }
        Some(Command::Serve { port, rules }) => {
            let config = load_config(&config_dir)?;
            init_tracing(&config.log_filter);
            serve(config, &config_dir, port, rules).await
        }
        None => {
            let config = load_config(&config_dir)?;
            init_tracing(&config.log_filter);
            if let Some(origin) = &cli.origin {
                info!("Launched by {}", origin);
            }
            serve(config, &config_dir, None, None).await
        }
    }
}

async fn serve(
    config: Config,
    config_dir: &std::path::Path,
    port: Option<u16>,
    rules: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let rules_path = rules.unwrap_or_else(|| config.rules_path(config_dir));
    let port = port.unwrap_or(config.port);

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();
    let bridge = Arc::new(NativeBridge::new(out_tx, config.request_timeout()));
    let coordinator = Arc::new(Coordinator::new(bridge.clone(), bridge.clone()));
    let store = Arc::new(RuleStore::open(&rules_path).await?);

    // Handle stdout in a dedicated task to ensure protocol compliance
    tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(msg) = out_rx.recv().await {
            let mut frame = Vec::new();
            if let Err(e) = write_message(&mut frame, &msg) {
                error!("Error encoding message: {}", e);
                continue;
            }
            if let Err(e) = stdout.write_all(&frame).await {
                error!("Error writing message to stdout: {}", e);
                break;
            }
            if let Err(e) = stdout.flush().await {
                error!("Error flushing stdout: {}", e);
                break;
            }
        }
    });

    let (in_tx, in_rx) = mpsc::unbounded_channel::<Inbound>();
    tokio::task::spawn_blocking(move || {
        let mut stdin = io::stdin().lock();
        loop {
            match read_message::<_, Inbound>(&mut stdin) {
                Ok(msg) => {
                    if in_tx.send(msg).is_err() {
                        break;
                    }
                }
                Err(tab_retitle::error::ProtocolError::Json(e)) => {
                    error!("Error parsing message from extension: {}", e);
                }
                Err(e) => {
                    info!("Stdin closed: {}", e);
                    break;
                }
            }
        }
    });

    let host = Host::new(bridge.clone(), coordinator.clone(), store.clone());
    let host_task = tokio::spawn(host.run(in_rx));

    let initial = store.all().await;
    let init_coordinator = coordinator.clone();
    tokio::spawn(async move {
        if let Err(e) = init_coordinator.on_rules_changed(initial).await {
            error!("Initial rule application failed: {}", e);
        }
    });

    let _watcher = RulesWatcher::start(store.clone(), coordinator.clone(), config.watch_debounce())
        .map_err(|e| error!("Rules file will not be watched: {}", e))
        .ok();

    let app = server::router(AppState::new(coordinator, store));
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    info!("Control API listening on 127.0.0.1:{}", port);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Control API stopped: {}", e);
        }
    });

    // The browser closes stdin when the extension disconnects; exit with it.
    host_task.await?;
    Ok(())
}

async fn validate(path: &std::path::Path) -> Result<(), Box<dyn std::error::Error>> {
    let rules = read_rules(path).await?;
    let mut invalid = 0;
    for rule in &rules {
        match rule.validate() {
            Ok(()) => println!("ok      {} ({})", rule.id, rule.domain),
            Err(e) => {
                invalid += 1;
                println!("invalid {} ({}): {}", rule.id, rule.domain, e);
            }
        }
    }
    println!("{} rules, {} invalid", rules.len(), invalid);
    if invalid > 0 {
        std::process::exit(1);
    }
    Ok(())
}

async fn check(path: &std::path::Path, url: &str, title: &str) -> Result<(), Box<dyn std::error::Error>> {
    let rules = read_rules(path).await?;
    match rules.iter().find(|r| r.matches(url, title)) {
        Some(rule) => {
            println!("rule {} ({})", rule.id, rule.domain);
            match rule.apply(title) {
                Some(new_title) => println!("title: {}", new_title),
                None => println!(
                    "title: generated in page by script (interval {}s)",
                    rule.apply_rules.interval
                ),
            }
        }
        None => println!("no rule matches"),
    }
    Ok(())
}
