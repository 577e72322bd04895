mod config;
mod demo;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use config::AppConfig;

#[derive(Parser)]
#[command(name = "testshare", about = "Share a test explorer across a collaborative session")]
struct Cli {
    /// Shared service name (overrides TESTSHARE_SERVICE_NAME env var)
    #[arg(long, global = true)]
    service_name: Option<String>,

    /// Log filter, e.g. `debug` or `testshare_core=trace` (RUST_LOG wins)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a testshare config file
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Share a test tree from an in-process host and show what a guest sees
    Demo {
        /// JSON file holding the root suite
        #[arg(long)]
        tree: PathBuf,
        /// Host workspace root the tree's file paths live under (default: cwd)
        #[arg(long)]
        local_root: Option<PathBuf>,
        /// Id of a test or suite to run from the guest
        #[arg(long)]
        run: Option<String>,
    },
}

/// Execute the `testshare init` command: write config file.
fn cmd_init(service_name: Option<&str>, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let name = service_name.unwrap_or(testshare_core::ShareConfig::DEFAULT_SERVICE_NAME);
    let cfg = config::ConfigFile::new(name);
    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  service.name = {}", cfg.service.name);
    println!("  logging.level = {}", cfg.logging.level);

    Ok(())
}

/// Execute the `testshare demo` command.
async fn cmd_demo(
    resolved: &AppConfig,
    tree: &std::path::Path,
    local_root: Option<PathBuf>,
    run: Option<&str>,
) -> anyhow::Result<()> {
    let tree = demo::load_tree(tree)?;
    let local_root = match local_root {
        Some(root) => root,
        None => std::env::current_dir().context("failed to read current directory")?,
    };
    let local_root = local_root.to_string_lossy();

    let report = demo::run_demo(&resolved.share, tree, &local_root, run).await?;

    match &report.tree {
        Some(tree) => {
            println!("Guest test tree ({} -> {}):", local_root, demo::SHARED_ROOT);
            for line in demo::render_tree(tree) {
                println!("  {line}");
            }
        }
        None => println!("Guest received no test tree."),
    }

    if run.is_some() {
        println!();
        println!("Guest run events:");
        for event in &report.run_events {
            println!("  {}", demo::describe_run_event(event));
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let resolved = AppConfig::resolve(cli.service_name.as_deref(), cli.log_level.as_deref());

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&resolved.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init { force } => {
            cmd_init(cli.service_name.as_deref(), force)?;
        }
        Commands::Demo {
            tree,
            local_root,
            run,
        } => {
            cmd_demo(&resolved, &tree, local_root, run.as_deref()).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod test_util {
    use std::sync::{Mutex, MutexGuard};

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Serialize tests that touch process environment variables.
    pub fn lock_env() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }
}
