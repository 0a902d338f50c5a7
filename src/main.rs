//! Binary entrypoint for the jambbs CLI.
//!
//! Commands:
//! - `init` - create a starter `config.toml` and the default `general` area
//! - `areas` - list message areas with their counts
//! - `post <area> --from <name> --subject <s> [text]` - post a message (body from stdin if omitted)
//! - `read <area> <n>` / `list <area>` - show one message or the newest ones
//! - `delete <area> <n>` - soft-delete a message
//! - `pack <area>` / `renumber <area>` - maintenance on one area
//! - `stats <area> [--json]` / `verify <area>` - inspect an area
//! - `backup <area> <dest>` - verbatim copy of one area's files
//! - `archive` / `maintain` - tar.gz archive of areas; one scheduled-style maintenance run
//!
//! See the library crate docs for module-level details: `jambbs::`.
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::path::PathBuf;
use tokio::io::AsyncReadExt;

use jambbs::config::Config;
use jambbs::storage::backup::{BackupManager, BackupType};
use jambbs::storage::jam::Message;
use jambbs::storage::maintenance::MaintenanceScheduler;
use jambbs::storage::Storage;

#[derive(Parser)]
#[command(name = "jambbs")]
#[command(about = "JAM message base tools for a multi-user BBS")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a default configuration and the general area
    Init,
    /// List message areas
    Areas,
    /// Post a message to an area
    Post {
        area: String,
        #[arg(long)]
        from: String,
        #[arg(long, default_value = "All")]
        to: String,
        #[arg(short, long)]
        subject: String,
        /// Message number this replies to
        #[arg(long)]
        reply_to: Option<u32>,
        /// Message body; read from stdin when omitted
        text: Option<String>,
    },
    /// Show one message
    Read {
        area: String,
        number: u32,
        /// Record the read against this user's last-read pointer
        #[arg(long)]
        user: Option<String>,
        #[arg(long, default_value_t = 0)]
        user_id: u32,
    },
    /// List the newest messages of an area
    List {
        area: String,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Soft-delete a message
    Delete { area: String, number: u32 },
    /// Discard deleted messages and renumber the rest
    Pack { area: String },
    /// Reset the base message number to 1
    Renumber { area: String },
    /// Show counts and file sizes
    Stats {
        area: String,
        #[arg(long)]
        json: bool,
    },
    /// Check an area's files for consistency
    Verify { area: String },
    /// Copy an area's four files to <dest>.{jhr,jdt,jdx,jlr}
    Backup { area: String, dest: PathBuf },
    /// Write a tar.gz archive of areas into the backup directory
    Archive {
        /// Areas to include (all when omitted)
        #[arg(long = "area")]
        areas: Vec<String>,
        #[arg(long)]
        name: Option<String>,
    },
    /// Run maintenance once now: pack areas over threshold, archive, prune
    Maintain,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init = cli.command {
        init_logging(&None, cli.verbose);
        if std::path::Path::new(&cli.config).exists() {
            warn!("{} already exists; leaving it unchanged", cli.config);
        } else {
            Config::create_default(&cli.config).await?;
            info!("Wrote default configuration to {}", cli.config);
        }
        let config = Config::load(&cli.config).await?;
        let storage = Storage::from_config(&config.storage).await?;
        storage.open_area("general").await?;
        println!("Initialized {} with area 'general' under {}", cli.config, config.storage.data_dir);
        return Ok(());
    }

    let config = match Config::load(&cli.config).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}; using defaults", e);
            Config::default()
        }
    };
    init_logging(&Some(config.clone()), cli.verbose);
    let storage = Storage::from_config(&config.storage).await?;

    match cli.command {
        Commands::Init => unreachable!("handled above"),
        Commands::Areas => {
            let areas = storage.list_areas().await?;
            if areas.is_empty() {
                println!("No message areas under {}", storage.messages_dir().display());
            }
            for area in areas {
                let stats = storage.area_statistics(&area).await?;
                println!("{:<20} {:>6} active {:>6} deleted", area, stats.active, stats.deleted);
            }
        }
        Commands::Post { area, from, to, subject, reply_to, text } => {
            let text = match text {
                Some(t) => t,
                None => {
                    let mut buf = String::new();
                    tokio::io::stdin().read_to_string(&mut buf).await?;
                    buf
                }
            };
            let mut message = Message::new(&from, &to, &subject, &text.replace("\r\n", "\r").replace('\n', "\r"));
            message.reply_to = reply_to.unwrap_or(0);
            let number = storage.store(&area, message).await?;
            println!("Posted message {} to {}", number, area);
        }
        Commands::Read { area, number, user, user_id } => {
            let message = storage
                .get_message(&area, number)
                .await?
                .ok_or_else(|| anyhow!("Message {} in {} has been deleted", number, area))?;
            print_message(&message);
            if let Some(user) = user {
                storage.mark_read(&area, &user, user_id, number).await?;
            }
        }
        Commands::List { area, limit } => {
            for message in storage.get_messages(&area, limit).await? {
                println!(
                    "{:>5}  {}  {:<20} -> {:<20} {}",
                    message.number,
                    message.date_written.format("%Y-%m-%d %H:%M"),
                    message.from,
                    message.to,
                    message.subject
                );
            }
        }
        Commands::Delete { area, number } => {
            if storage.delete_message(&area, number).await? {
                println!("Deleted message {} from {}", number, area);
            } else {
                println!("No message {} in {}", number, area);
            }
        }
        Commands::Pack { area } => {
            let report = storage.pack_area(&area).await?;
            println!("Packed {}: {} -> {} messages ({} removed)", area, report.before, report.after, report.removed);
        }
        Commands::Renumber { area } => {
            storage.renumber_area(&area).await?;
            println!("Renumbered {}", area);
        }
        Commands::Stats { area, json } => {
            let stats = storage.area_statistics(&area).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Area:      {}", area);
                println!("Messages:  {} total, {} active, {} deleted", stats.total, stats.active, stats.deleted);
                println!("Types:     {} private, {} echo, {} netmail, {} local", stats.private, stats.echo, stats.netmail, stats.local);
                println!(
                    "Bytes:     {} header, {} text, {} index, {} last-read ({} total)",
                    stats.header_bytes, stats.text_bytes, stats.index_bytes, stats.last_read_bytes, stats.total_bytes
                );
            }
        }
        Commands::Verify { area } => {
            let report = storage.verify_area(&area).await?;
            println!("Checked {} message(s) in {}", report.messages_checked, area);
            for issue in &report.issues {
                match issue.number {
                    Some(n) => println!("  message {}: {}", n, issue.detail),
                    None => println!("  base: {}", issue.detail),
                }
            }
            if !report.is_ok() {
                storage.close_all().await;
                std::process::exit(1);
            }
        }
        Commands::Backup { area, dest } => {
            for path in storage.backup_area(&area, dest).await? {
                println!("{}", path.display());
            }
        }
        Commands::Archive { areas, name } => {
            storage.close_all().await;
            let mut manager = BackupManager::new(
                storage.messages_dir(),
                PathBuf::from(&config.maintenance.backup_dir),
                config.maintenance.retention.clone(),
            )?
            .with_lock_timeout(config.storage.lock_timeout());
            let selected = (!areas.is_empty()).then_some(areas);
            let metadata = tokio::task::spawn_blocking(move || {
                manager.create_backup(name, BackupType::Manual, selected.as_deref())
            })
            .await??;
            println!("Archive {} ({} bytes, {} area(s))", metadata.id, metadata.size_bytes, metadata.areas.len());
        }
        Commands::Maintain => {
            storage.close_all().await;
            let mut scheduler = MaintenanceScheduler::new(
                config.maintenance.clone(),
                storage.messages_dir(),
                config.storage.lock_timeout(),
            );
            let report = tokio::task::spawn_blocking(move || scheduler.run_now(chrono::Utc::now())).await??;
            for (area, pack) in &report.packed {
                println!("Packed {}: {} removed", area, pack.removed);
            }
            for area in &report.skipped {
                println!("Skipped {}", area);
            }
            if let Some(id) = report.backup_id {
                println!("Archive {}", id);
            }
        }
    }

    storage.close_all().await;
    Ok(())
}

fn print_message(message: &Message) {
    println!("Msg #{}  {}", message.number, message.date_written.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("From:    {}", message.from);
    println!("To:      {}", message.to);
    println!("Subject: {}", message.subject);
    if message.reply_to != 0 {
        println!("Reply to #{}", message.reply_to);
    }
    println!();
    for line in message.text.split('\r') {
        println!("{}", line);
    }
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // Base level from CLI verbosity, otherwise the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config
        .as_ref()
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|file| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file)
                .ok()
        });

    if let Some(f) = log_file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));

        // Echo to the console only when someone is watching it
        let is_tty = atty::is(atty::Stream::Stderr);

        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());

            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }

            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }
    let _ = builder.try_init();
}
