mod cli;
mod ui;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use console::Style;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Command, StoreCommand};
use lingotrack::config::TrackerConfig;
use lingotrack::notify::NotificationQuery;
use lingotrack::profile::{AUTOMATIC, DISABLED, MANUAL, ProfileSettings};
use lingotrack::state_machine::RecordKey;
use lingotrack::store::Snapshot;
use lingotrack::tms::{HttpTmsClient, MockTms, TmsClient, TranslatedDocument};
use lingotrack::tracker::{Tracker, TrackerSettings};
use lingotrack::unit::{ConfigObject, ContentEntity, Field, TranslatableUnit, Unit};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Store(command) => run(command, &cli.config, &cli.store).await,
        Command::Demo => run_demo().await,
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "lingotrack=debug"
    } else {
        "lingotrack=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Commands that work on the persisted store against the configured TMS.
async fn run(command: StoreCommand, config_path: &Path, store_path: &Path) -> Result<()> {
    let config = TrackerConfig::load_from(config_path)?;
    let snapshot = Snapshot::load(store_path)?;
    let client = HttpTmsClient::new(&config.base_url, &config.api_token, &config.project_id)
        .context("failed to build TMS client")?;
    let tracker = Tracker::new(client, config.tracker_settings())
        .with_profiles(config.registry())
        .with_resolver(config.resolver())
        .with_snapshot(&snapshot);

    match command {
        StoreCommand::Save { file } => {
            let contents = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let units: Vec<Unit> = serde_json::from_str(&contents)
                .with_context(|| format!("{} is not a list of units", file.display()))?;
            for unit in units {
                let key = unit.key();
                match tracker.save_unit(unit).await {
                    Ok(outcome) => println!("{key}: {}", outcome.message()),
                    Err(e) => println!("{key}: {}", Style::new().red().apply_to(e)),
                }
            }
        }
        StoreCommand::Status { key } => {
            let records = match key {
                Some(key) => vec![
                    tracker
                        .store()
                        .get(&key)
                        .with_context(|| format!("no record for {key}"))?,
                ],
                None => tracker.store().records(),
            };
            ui::print_records(&records);
            if tracker.is_account_blocked() {
                println!(
                    "{}",
                    Style::new()
                        .red()
                        .apply_to("Account blocked. Run `lingotrack resume` once payment is settled.")
                );
            }
        }
        StoreCommand::Bulk { operation, keys } => {
            let keys = if keys.is_empty() {
                tracker.store().keys()
            } else {
                keys
            };
            let progress = ui::BulkProgress::start(&operation.to_string(), keys.len());
            let report = tracker
                .apply_bulk_operation_with(&keys, &operation, |r| progress.record(r))
                .await;
            progress.finish(&report);
        }
        StoreCommand::Notify { query } => {
            let response = tracker
                .handle_notification(&NotificationQuery::parse(&query))
                .await;
            ui::print_notification(&response);
        }
        StoreCommand::Cron => {
            let report = tracker.run_queue().await;
            ui::print_queue_report(&report);
        }
        StoreCommand::Resume => {
            if tracker.is_account_blocked() {
                tracker.resume_account();
                println!("{}", Style::new().green().apply_to("Account block lifted."));
            } else {
                println!("Account is not blocked.");
            }
        }
    }

    tracker.snapshot().save(store_path)?;
    Ok(())
}

fn step(title: &str) {
    println!();
    println!("{}", Style::new().cyan().bold().apply_to(format!("── {title} ──")));
}

fn show<C: TmsClient>(tracker: &Tracker<C>) {
    ui::print_records(&tracker.store().records());
}

/// Walk two units through the whole lifecycle against the in-memory TMS.
async fn run_demo() -> Result<()> {
    let mut resolver = ProfileSettings::new(MANUAL);
    resolver.set_bundle_default("config", "system", AUTOMATIC);
    let tracker = Tracker::new(
        MockTms::new(),
        TrackerSettings {
            project_id: "demo".into(),
            target_locales: vec!["es_MX".into(), "de_DE".into()],
            ..TrackerSettings::default()
        },
    )
    .with_resolver(resolver);

    let article = ContentEntity::new("node", "article", "1", "Llamas are cool", "en_US")
        .with_field(Field::text("body", "Llamas are very cool").with_max_length(60))
        .with_field(Field::link("source", "https://example.com/llamas"));
    let site = ConfigObject::new("system.site", "Site information", "en_US")
        .with_field(Field::text("slogan", "Translations made simple"));
    let key = RecordKey::new("node", "1");
    let site_key = RecordKey::new("config", "system.site");

    step("save (article is manual, site config is automatic)");
    tracker.save_unit(article.clone()).await?;
    tracker.save_unit(site).await?;
    show(&tracker);

    step("upload and check the article");
    tracker.upload(&key).await?;
    tracker.check_upload(&key).await?;
    tracker.check_upload(&site_key).await?;
    show(&tracker);

    step("request, check and download es_MX");
    tracker.request_target(&key, "es_MX").await?;
    tracker.check_target(&key, "es_MX").await?;
    tracker.download(&key, "es_MX").await?;
    tracker.check_translations(&site_key).await?;
    tracker.download_all(&site_key).await?;
    show(&tracker);

    step("edit the article");
    let mut edited = article;
    edited.set_field("body", "Llamas are extremely cool");
    tracker.save_unit(edited).await?;
    show(&tracker);

    step("translation too long for its field");
    tracker.upload(&key).await?;
    tracker.check_upload(&key).await?;
    tracker.request_target(&key, "de_DE").await?;
    tracker.check_target(&key, "de_DE").await?;
    if let Some(document_id) = tracker.store().get(&key).and_then(|r| r.document_id) {
        tracker.client().set_translation(
            &document_id,
            "de_DE",
            TranslatedDocument {
                fields: [("body".to_string(), "Lamas sind ".repeat(10))].into_iter().collect(),
            },
        );
    }
    if let Err(e) = tracker.download(&key, "de_DE").await {
        println!("{}", Style::new().red().apply_to(e));
    }
    show(&tracker);

    step("disable translation, then cancel the site config");
    tracker.change_profile(&key, DISABLED)?;
    tracker.cancel(&site_key).await?;
    show(&tracker);

    Ok(())
}
