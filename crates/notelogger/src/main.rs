//! `notelog` - CLI for notelogger
//!
//! This binary feeds notification events through the capture pipeline and
//! exposes the stored history, the filtering rules and export.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use notelogger::capture::{CapturePipeline, HostEvent, StaticAppNames, SystemClock};
use notelogger::cli::{
    Cli, Command, ConfigCommand, ExportCommand, IngestCommand, KeywordCommand, ListCommand,
    RetentionCommand,
};
use notelogger::export::Exporter;
use notelogger::preferences::SqlitePreferences;
use notelogger::query::run_query;
use notelogger::record::{NotificationEvent, NotificationRecord};
use notelogger::rules::RuleEngine;
use notelogger::storage::{NotificationStore, SqliteStore};
use notelogger::{init_logging, Config};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // Config commands only need the configuration itself
    if let Command::Config(config_cmd) = cli.command {
        return handle_config(cli.config, config_cmd);
    }

    let config = Config::load_from(cli.config.clone())?;
    let app = App::open(config).await?;

    match cli.command {
        Command::Ingest(cmd) => app.ingest(&cmd).await,
        Command::List(cmd) => app.list(&cmd).await,
        Command::Apps { json } => app.apps(json).await,
        Command::Stats { json } => app.stats(json).await,
        Command::Block { package } => {
            if app.rules.block_app(&package)? {
                println!("Blocked {package}");
            } else {
                println!("{package} is already blocked");
            }
            Ok(())
        }
        Command::Unblock { package } => {
            if app.rules.unblock_app(&package)? {
                println!("Unblocked {package}");
            } else {
                println!("{package} was not blocked");
            }
            Ok(())
        }
        Command::Keyword(cmd) => app.keyword(cmd),
        Command::Retention(cmd) => app.retention(&cmd).await,
        Command::AutoExport { state } => {
            let enabled = bool::from(state);
            app.rules.set_auto_export(enabled)?;
            println!("Auto-export {}", if enabled { "enabled" } else { "disabled" });
            Ok(())
        }
        Command::Sweep => app.sweep().await,
        Command::Export(cmd) => app.export(&cmd).await,
        Command::Clear { yes } => app.clear(yes).await,
        Command::Config(_) => Ok(()),
    }
}

/// Everything a data command needs.
#[derive(Debug)]
struct App {
    config: Config,
    store: SqliteStore,
    rules: RuleEngine,
}

impl App {
    async fn open(config: Config) -> Result<Self> {
        let store = SqliteStore::open(config.database_path())
            .with_context(|| format!("opening {}", config.database_path().display()))?;
        let prefs = SqlitePreferences::open(config.preferences_path())
            .with_context(|| format!("opening {}", config.preferences_path().display()))?;
        let rules = RuleEngine::load(
            Arc::new(prefs),
            Arc::new(store.clone()),
            Arc::new(SystemClock),
        )?;

        if let Some(sweep) = rules.sweep_on_start() {
            match sweep.await? {
                Ok(Some(deleted)) if deleted > 0 => {
                    info!(deleted, "Removed notifications past the retention threshold");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Startup retention sweep failed"),
            }
        }

        Ok(Self {
            config,
            store,
            rules,
        })
    }

    async fn ingest(&self, cmd: &IngestCommand) -> Result<()> {
        let pipeline = CapturePipeline::new(
            Arc::new(self.store.clone()),
            self.rules.clone(),
            Arc::new(StaticAppNames::new(self.config.capture.app_names.clone())),
            Arc::new(SystemClock),
        );

        let (tx, rx) = mpsc::channel(self.config.capture.channel_capacity);
        let runner = tokio::spawn(async move { pipeline.run(rx).await });

        let reader: Box<dyn AsyncRead + Unpin + Send> = match &cmd.file {
            Some(path) => Box::new(
                tokio::fs::File::open(path)
                    .await
                    .with_context(|| format!("opening {}", path.display()))?,
            ),
            None => Box::new(tokio::io::stdin()),
        };
        let mut lines = BufReader::new(reader).lines();

        let mut line_no = 0_usize;
        let mut skipped = 0_usize;
        while let Some(line) = lines.next_line().await? {
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<NotificationEvent>(&line) {
                Ok(event) => {
                    if tx.send(HostEvent::Posted(event)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(line = line_no, error = %e, "Skipping malformed event");
                    skipped += 1;
                }
            }
        }
        drop(tx);

        let stats = runner.await?;
        println!(
            "Received {}, stored {}, blocked {}, failed {}, malformed {}",
            stats.received, stats.stored, stats.blocked, stats.failed, skipped
        );
        Ok(())
    }

    async fn list(&self, cmd: &ListCommand) -> Result<()> {
        let rules = self.rules.snapshot();
        let search = cmd.search.as_deref().unwrap_or_default();

        let mut records = run_query(&self.store, search, &rules).await?;
        if cmd.otp {
            records.retain(|r| r.is_otp);
        }
        if let Some(app) = &cmd.app {
            records.retain(|r| &r.package_name == app);
        }
        records.truncate(cmd.limit);

        if cmd.json {
            println!("{}", serde_json::to_string_pretty(&records)?);
            return Ok(());
        }

        if records.is_empty() {
            println!("No notifications found.");
            return Ok(());
        }
        for record in &records {
            println!("{}", format_record(record, rules.highlights(record)));
        }
        Ok(())
    }

    async fn apps(&self, json: bool) -> Result<()> {
        let apps = self.store.query_distinct_apps().await?;
        if json {
            println!("{}", serde_json::to_string_pretty(&apps)?);
        } else {
            let rules = self.rules.snapshot();
            for app in &apps {
                let marker = if rules.is_blocked(&app.package_name) {
                    " [blocked]"
                } else {
                    ""
                };
                println!("{:<30} {}{marker}", app.app_name, app.package_name);
            }
        }
        Ok(())
    }

    async fn stats(&self, json: bool) -> Result<()> {
        let stats = self.store.stats().await?;
        if json {
            println!("{}", serde_json::to_string_pretty(&stats)?);
            return Ok(());
        }

        let fmt_time = |ms: Option<i64>| {
            ms.and_then(chrono::DateTime::from_timestamp_millis)
                .map_or_else(|| "-".to_string(), |t| t.with_timezone(&chrono::Local).to_string())
        };
        println!("notelog stats");
        println!("-------------");
        println!("Database:      {}", self.config.database_path().display());
        println!("Notifications: {}", stats.total);
        println!("With OTP:      {}", stats.otp_count);
        println!("Apps:          {}", stats.distinct_apps);
        println!("Oldest:        {}", fmt_time(stats.oldest_received));
        println!("Newest:        {}", fmt_time(stats.newest_received));
        println!("Size:          {} bytes", stats.db_size_bytes);
        Ok(())
    }

    fn keyword(&self, cmd: KeywordCommand) -> Result<()> {
        match cmd {
            KeywordCommand::Add { keyword } => {
                if self.rules.add_keyword(&keyword)? {
                    println!("Added keyword \"{}\"", keyword.trim());
                } else {
                    println!("Keyword \"{}\" already present", keyword.trim());
                }
            }
            KeywordCommand::Remove { keyword } => {
                if self.rules.remove_keyword(&keyword)? {
                    println!("Removed keyword \"{}\"", keyword.trim());
                } else {
                    println!("Keyword \"{}\" not found", keyword.trim());
                }
            }
            KeywordCommand::List => {
                for keyword in self.rules.snapshot().keywords {
                    println!("{keyword}");
                }
            }
        }
        Ok(())
    }

    async fn retention(&self, cmd: &RetentionCommand) -> Result<()> {
        let current = self.rules.snapshot().retention;
        let days = match cmd.days {
            Some(days) => self.rules.set_retention_days(days)?,
            None => current.days,
        };

        if let Some(enabled) = cmd.requested_state() {
            if let Some(sweep) = self.rules.set_retention(enabled, days)? {
                if let Some(deleted) = sweep.await?? {
                    println!("Deleted {deleted} notifications older than {days} days");
                }
            }
        }

        let policy = self.rules.snapshot().retention;
        println!(
            "Retention: {} ({} days)",
            if policy.enabled { "enabled" } else { "disabled" },
            policy.days
        );
        Ok(())
    }

    async fn sweep(&self) -> Result<()> {
        match self.rules.sweep_retention().await? {
            Some(deleted) => println!("Deleted {deleted} notifications"),
            None => println!("Retention is disabled; nothing deleted."),
        }
        Ok(())
    }

    async fn export(&self, cmd: &ExportCommand) -> Result<()> {
        let directory = cmd.dir.clone().unwrap_or_else(|| self.config.export_dir());
        let exporter = Exporter::new(Arc::new(self.store.clone()), directory);

        match exporter.export(cmd.format.into()).await {
            Ok(done) => {
                println!("Exported {} notifications to {}", done.count, done.path.display());
                Ok(())
            }
            Err(e) if e.is_nothing_to_export() => {
                println!("{e}");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn clear(&self, yes: bool) -> Result<()> {
        if !yes {
            println!("This will delete every stored notification.");
            println!("Use --yes to confirm.");
            return Ok(());
        }
        let deleted = self.store.delete_all().await?;
        println!("Deleted {deleted} notifications");
        Ok(())
    }
}

fn format_record(record: &NotificationRecord, highlighted: bool) -> String {
    let when = record
        .received_at()
        .map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default();
    let id = record.id.map(|id| id.to_string()).unwrap_or_default();
    let marker = if highlighted { "*" } else { " " };
    let otp = record
        .otp_code
        .as_deref()
        .map(|code| format!(" [OTP {code}]"))
        .unwrap_or_default();
    let title = record.title.as_deref().unwrap_or("");
    let body = record
        .big_text
        .as_deref()
        .or(record.text.as_deref())
        .unwrap_or("")
        .replace('\n', " ");

    format!(
        "{marker}{id:>6}  {when}  {:<20}  {title}: {body}{otp}",
        record.app_name
    )
}

fn handle_config(config_path: Option<PathBuf>, cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            let config = Config::load_from(config_path)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!("  Preferences path:   {}", config.preferences_path().display());
                println!();
                println!("[Capture]");
                println!("  Channel capacity:   {}", config.capture.channel_capacity);
                println!("  Known app names:    {}", config.capture.app_names.len());
                println!();
                println!("[Export]");
                println!("  Directory:          {}", config.export_dir().display());
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file
                .or(config_path)
                .unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}
