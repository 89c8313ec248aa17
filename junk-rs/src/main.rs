//! junk-rs: Maildir junk mail filter
//!
//! # Usage
//!
//! ```bash
//! # Filter mail continuously
//! junk-rs --config /etc/junk-rs.toml run
//!
//! # Learn and classify single mails
//! junk-rs --maildir ~/Maildir learn 1488226337.M327822P8269.host junk
//! junk-rs --maildir ~/Maildir classify 1488226337.M327822P8269.host
//!
//! # Inspect and back up the statistics
//! junk-rs --maildir ~/Maildir stats --json
//! junk-rs --maildir ~/Maildir backup
//! ```

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use junk_rs::daemon::{wait_for_shutdown, Daemon};
use junk_rs::{Class, Config, Mailbox, MailboxRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "junk-rs")]
#[command(version, about = "Maildir junk mail filter", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Maildir to work on; repeat or comma-separate for several
    #[arg(short, long, env = "JUNK_MAILDIRS", value_delimiter = ',')]
    maildir: Vec<PathBuf>,

    /// Seconds between two bulk learn cycles
    #[arg(long, env = "JUNK_LEARN_INTERVAL")]
    learn_interval: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Filter continuously until SIGINT/SIGTERM
    Run,
    /// Learn a mail as good or junk
    Learn {
        /// Maildir unique name of the mail
        id: String,
        /// good or junk
        class: Class,
    },
    /// Print the verdict for a mail without filing it
    Classify {
        /// Maildir unique name of the mail
        id: String,
    },
    /// Print the learned statistics
    Stats {
        /// Print one JSON object per Maildir
        #[arg(long)]
        json: bool,
    },
    /// Write the backup file now
    Backup,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => Config::default(),
    };
    if !cli.maildir.is_empty() {
        config.daemon.maildirs = cli.maildir.clone();
    }
    if let Some(interval) = cli.learn_interval {
        config.daemon.learn_interval_secs = interval;
    }

    init_logging(&config);
    config.validate()?;

    match cli.command {
        Commands::Run => run(config).await,
        Commands::Learn { id, class } => {
            let mailbox = single_mailbox(&config).await?;
            mailbox.learn(&id, class).await?;
            println!("Learned {} as {}", id, class);
            mailbox.close().await;
            Ok(())
        }
        Commands::Classify { id } => {
            let mailbox = single_mailbox(&config).await?;
            let verdict = mailbox.classify(&id).await?;
            println!(
                "{}: {} (junk probability {:.4})",
                id,
                verdict.class(),
                verdict.junk_probability()
            );
            mailbox.close().await;
            Ok(())
        }
        Commands::Stats { json } => {
            for root in &config.daemon.maildirs {
                let mailbox = Mailbox::open(root, &config.store).await?;
                let stats = mailbox.stats().await?;
                mailbox.close().await;
                if json {
                    let value = serde_json::json!({ "maildir": root, "stats": stats });
                    println!("{}", value);
                    continue;
                }
                println!("{}", root.display());
                println!("  good mails: {}", stats.good_total);
                println!("  junk mails: {}", stats.junk_total);
                println!("  good words: {}", stats.good_words);
                println!("  junk words: {}", stats.junk_words);
            }
            Ok(())
        }
        Commands::Backup => {
            for root in &config.daemon.maildirs {
                let mailbox = Mailbox::open(root, &config.store).await?;
                let size = mailbox.backup().await?;
                println!("{} ({} bytes)", mailbox.backup_path().display(), size);
                mailbox.close().await;
            }
            Ok(())
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    info!("Starting junk-rs v{}", env!("CARGO_PKG_VERSION"));
    for root in &config.daemon.maildirs {
        info!("  Maildir: {}", root.display());
    }

    let registry = Arc::new(MailboxRegistry::open_all(&config.daemon.maildirs, &config.store).await?);
    let daemon = Daemon::new(registry, &config.daemon);

    let shutdown = daemon.shutdown_token();
    tokio::spawn(async move {
        wait_for_shutdown().await;
        shutdown.cancel();
    });

    daemon.run().await?;
    Ok(())
}

async fn single_mailbox(config: &Config) -> anyhow::Result<Mailbox> {
    let [root] = config.daemon.maildirs.as_slice() else {
        bail!("Exactly one Maildir is needed for this command");
    };
    Ok(Mailbox::open(root, &config.store).await?)
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("junk_rs={}", config.logging.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)).init();
    }
}
