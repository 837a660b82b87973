use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use newsroll::cache::FetchCache;
use newsroll::config::Config;
use newsroll::group::{group_items, ItemGroup};
use newsroll::icon::IconResolver;
use newsroll::net::ReqwestNetwork;
use newsroll::refresh::{RefreshOutcome, Refresher};
use newsroll::storage::{Database, Feed, FeedStatus, Item};
use newsroll::util::{normalize_feed_url, truncate_to_width};

/// Column width for titles in list output.
const TITLE_WIDTH: usize = 60;

/// Get the config directory path (~/.config/newsroll/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("newsroll"))
}

/// Create the config directory if needed and restrict it to the current user.
fn prepare_config_dir(config_dir: &Path) -> Result<()> {
    if !config_dir.exists() {
        std::fs::create_dir_all(config_dir).context("Failed to create config directory")?;
        tracing::info!(path = %config_dir.display(), "Created config directory");
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(config_dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(config_dir, perms) {
                    tracing::warn!(
                        path = %config_dir.display(),
                        error = %e,
                        "Failed to set config directory permissions to 0700"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %config_dir.display(),
                    error = %e,
                    "Failed to read config directory metadata"
                );
            }
        }
    }
    Ok(())
}

#[derive(Parser, Debug)]
#[command(name = "newsroll", version, about = "Keep RSS and Atom subscriptions up to date")]
struct Args {
    /// Config file to use instead of ~/.config/newsroll/config.toml
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe to a feed and fetch it for the first time
    Add {
        url: String,
        /// Title to use instead of the one the feed declares
        #[arg(long)]
        title: Option<String>,
        /// Folder to file the feed under (created if missing)
        #[arg(long)]
        folder: Option<String>,
    },
    /// Unsubscribe from a feed (by id or URL)
    Remove { feed: String },
    /// List subscriptions
    List {
        #[arg(long)]
        json: bool,
    },
    /// Refresh one feed, or every feed when none is given
    Refresh {
        feed: Option<String>,
        /// Refresh even feeds that were refreshed recently
        #[arg(long)]
        force: bool,
    },
    /// Show a feed's items grouped by date
    Show {
        feed: String,
        #[arg(long)]
        json: bool,
    },
    /// Mark every item of a feed read
    MarkRead { feed: String },
    /// Mark one item read (or unread) by its id
    Read {
        item: i64,
        #[arg(long)]
        unread: bool,
    },
    /// Give a feed a title of your own (kept across refreshes)
    Rename { feed: String, title: String },
    /// Manage folders
    Folder {
        #[command(subcommand)]
        action: FolderCommand,
    },
}

#[derive(Subcommand, Debug)]
enum FolderCommand {
    Add { name: String },
    /// Delete a folder together with its feeds
    Remove { name: String },
    /// File a feed under a folder (created if missing), or unfile it when
    /// no folder is given
    Move { feed: String, folder: Option<String> },
}

// ============================================================================
// JSON Output
// ============================================================================

#[derive(Serialize)]
struct FeedRow<'a> {
    id: i64,
    title: &'a str,
    url: &'a str,
    site_url: Option<&'a str>,
    folder: Option<&'a str>,
    status: FeedStatus,
    error: Option<&'a str>,
    unread_count: i64,
    last_refresh: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct ItemRow<'a> {
    id: i64,
    title: &'a str,
    url: &'a str,
    published: Option<DateTime<Utc>>,
    read: bool,
    summary: Option<String>,
    image: Option<String>,
}

#[derive(Serialize)]
struct GroupRow<'a> {
    #[serde(flatten)]
    group: &'a ItemGroup,
    items: Vec<ItemRow<'a>>,
}

impl<'a> ItemRow<'a> {
    fn new(item: &'a Item) -> Self {
        Self {
            id: item.id,
            title: item.normalized_title(),
            url: &item.url,
            published: item.published,
            read: item.read,
            summary: item.plain_description(),
            image: item.wallpaper_url(),
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

/// Look a feed up by numeric id or by its URL.
async fn resolve_feed(db: &Database, arg: &str) -> Result<Feed> {
    if let Ok(id) = arg.parse::<i64>() {
        return db
            .load_feed(id)
            .await?
            .with_context(|| format!("No feed with id {}", id));
    }
    let url = normalize_feed_url(arg).with_context(|| format!("Invalid feed URL '{}'", arg))?;
    db.find_feed_by_url(url.as_str())
        .await?
        .with_context(|| format!("Not subscribed to {}", url))
}

fn describe_outcome(outcome: &RefreshOutcome) -> String {
    match outcome {
        RefreshOutcome::Fresh => "up to date".to_string(),
        RefreshOutcome::AlreadyRefreshing => "already refreshing".to_string(),
        RefreshOutcome::Refreshed(report) => {
            let mut text = format!("{} new", report.inserted);
            if report.deleted > 0 {
                text.push_str(&format!(", {} duplicates removed", report.deleted));
            }
            if report.skipped_missing_url > 0 {
                text.push_str(&format!(", {} without link skipped", report.skipped_missing_url));
            }
            if report.icon_updated {
                text.push_str(", icon updated");
            }
            text
        }
    }
}

async fn add(
    db: &Database,
    refresher: &Refresher,
    url: &str,
    title: Option<&str>,
    folder: Option<&str>,
) -> Result<()> {
    let folder_id = match folder {
        Some(name) => Some(
            db.create_folder(name)
                .await
                .with_context(|| format!("Failed to create folder '{}'", name))?,
        ),
        None => None,
    };

    let subscription = refresher
        .subscribe(url, title, folder_id)
        .await
        .with_context(|| format!("Failed to subscribe to {}", url))?;
    let feed = &subscription.feed;

    if !subscription.created {
        println!("Already subscribed: [{}] {}", feed.id, feed.title);
        return Ok(());
    }
    match &subscription.first_refresh {
        Some(outcome) => println!(
            "Subscribed: [{}] {} ({})",
            feed.id,
            feed.title,
            describe_outcome(outcome)
        ),
        None => println!("Subscribed: [{}] {}", feed.id, feed.title),
    }
    Ok(())
}

async fn list(db: &Database, json: bool) -> Result<()> {
    let feeds = db.load_feeds().await.context("Failed to load feeds")?;
    let folders: HashMap<i64, String> = db
        .load_folders()
        .await
        .context("Failed to load folders")?
        .into_iter()
        .map(|f| (f.id, f.name))
        .collect();
    let folder_name = |feed: &Feed| feed.folder_id.and_then(|id| folders.get(&id)).map(String::as_str);

    if json {
        let rows: Vec<FeedRow> = feeds
            .iter()
            .map(|feed| FeedRow {
                id: feed.id,
                title: &feed.title,
                url: &feed.url,
                site_url: feed.site_url.as_deref(),
                folder: folder_name(feed),
                status: feed.status,
                error: feed.error.as_deref(),
                unread_count: feed.unread_count,
                last_refresh: feed.last_refresh,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if feeds.is_empty() {
        println!("No subscriptions. Add one with: newsroll add <url>");
        return Ok(());
    }
    for feed in &feeds {
        let folder = folder_name(feed).map(|f| format!(" [{}]", f)).unwrap_or_default();
        let refreshed = feed
            .last_refresh
            .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{:>4}  {:>4} unread  {:<width$}{}  refreshed {}",
            feed.id,
            feed.unread_count,
            truncate_to_width(&feed.title, TITLE_WIDTH),
            folder,
            refreshed,
            width = TITLE_WIDTH,
        );
        if let (FeedStatus::Error, Some(error)) = (feed.status, feed.error.as_deref()) {
            println!("      error: {}", error);
        }
    }
    Ok(())
}

/// Refresh one feed or all of them. Returns the number of failed feeds.
async fn refresh(
    db: &Database,
    refresher: &Refresher,
    config: &Config,
    feed: Option<&str>,
    force: bool,
) -> Result<usize> {
    let interval = config.min_refresh_interval();

    if let Some(arg) = feed {
        let feed = resolve_feed(db, arg).await?;
        let result = if force {
            refresher.refresh(feed.id).await
        } else {
            refresher.refresh_if_stale(feed.id, interval).await
        };
        return Ok(match result {
            Ok(outcome) => {
                println!("{}: {}", feed.title, describe_outcome(&outcome));
                0
            }
            Err(e) => {
                eprintln!("{}: {}", feed.title, e);
                1
            }
        });
    }

    let titles: HashMap<i64, Arc<str>> = db
        .load_feeds()
        .await
        .context("Failed to load feeds")?
        .into_iter()
        .map(|f| (f.id, f.title))
        .collect();
    let results = refresher
        .refresh_all(if force { None } else { Some(interval) })
        .await
        .context("Failed to refresh feeds")?;

    let mut failed = 0;
    for entry in &results {
        let title = titles
            .get(&entry.feed_id)
            .map(|t| t.to_string())
            .unwrap_or_else(|| format!("feed {}", entry.feed_id));
        match &entry.result {
            Ok(outcome) => println!("{}: {}", title, describe_outcome(outcome)),
            Err(e) => {
                failed += 1;
                eprintln!("{}: {}", title, e);
            }
        }
    }
    Ok(failed)
}

async fn show(db: &Database, arg: &str, json: bool) -> Result<()> {
    let feed = resolve_feed(db, arg).await?;
    let items = db
        .load_items(feed.id)
        .await
        .with_context(|| format!("Failed to load items of '{}'", feed.title))?;
    let groups = group_items(items, &Local::now());

    if json {
        let rows: Vec<GroupRow> = groups
            .iter()
            .map(|group| GroupRow {
                group,
                items: group.items.iter().map(ItemRow::new).collect(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("{} ({} unread)", feed.title, feed.unread_count);
    if groups.is_empty() {
        println!("  No items.");
    }
    for group in &groups {
        println!();
        println!("{}", group.title);
        for item in &group.items {
            let marker = if item.read { " " } else { "*" };
            println!(
                "  {} {}",
                marker,
                truncate_to_width(item.normalized_title(), TITLE_WIDTH + 10)
            );
            println!("      {}", item.url);
        }
    }
    Ok(())
}

async fn move_feed(db: &Database, arg: &str, folder: Option<&str>) -> Result<()> {
    let feed = resolve_feed(db, arg).await?;
    let folder_id = match folder {
        Some(name) => Some(
            db.create_folder(name)
                .await
                .with_context(|| format!("Failed to create folder '{}'", name))?,
        ),
        None => None,
    };
    db.move_feed_to_folder(feed.id, folder_id)
        .await
        .with_context(|| format!("Failed to move '{}'", feed.title))?;
    match folder {
        Some(name) => println!("{}: moved to '{}'", feed.title, name.trim()),
        None => println!("{}: removed from its folder", feed.title),
    }
    Ok(())
}

async fn set_read(db: &Database, refresher: &Refresher, item_id: i64, read: bool) -> Result<()> {
    let item = db
        .get_item(item_id)
        .await?
        .with_context(|| format!("No item with id {}", item_id))?;
    let changed = refresher
        .set_item_read(item.id, read)
        .await
        .with_context(|| format!("Failed to update item {}", item_id))?;
    let state = if read { "read" } else { "unread" };
    if changed {
        println!("{}: marked {}", item.normalized_title(), state);
    } else {
        println!("{}: already {}", item.normalized_title(), state);
    }
    Ok(())
}

async fn remove_folder(db: &Database, refresher: &Refresher, name: &str) -> Result<()> {
    let folder = db
        .find_folder_by_name(name)
        .await?
        .with_context(|| format!("No folder named '{}'", name))?;

    // Feeds go through the refresher so in-flight refreshes finish first
    for feed_id in db.feed_ids_in_folder(folder.id).await? {
        refresher.delete_feed(feed_id).await?;
    }
    db.delete_folder(folder.id)
        .await
        .with_context(|| format!("Failed to delete folder '{}'", name))?;
    println!("Removed folder '{}' and {} feeds", folder.name, folder.feed_count);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    prepare_config_dir(&config_dir)?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = config.database_path(&config_dir);
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = Database::open(db_path_str)
        .await
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;

    let network = Arc::new(
        ReqwestNetwork::new(
            &config.user_agent,
            config.request_timeout(),
            config.max_feed_bytes,
        )
        .context("Failed to build HTTP client")?,
    );
    let cache = Arc::new(
        FetchCache::new(config.cache_capacity, config.cache_ttl())
            .with_max_bytes(config.cache_max_bytes),
    );
    let icons = IconResolver::new(network.clone(), cache).with_size(config.icon_size);
    let refresher = Refresher::new(Arc::new(db.clone()), network)
        .with_icon_resolver(icons)
        .with_max_concurrent(config.max_concurrent_refreshes);

    match args.command {
        Command::Add { url, title, folder } => {
            add(&db, &refresher, &url, title.as_deref(), folder.as_deref()).await?;
        }
        Command::Remove { feed } => {
            let feed = resolve_feed(&db, &feed).await?;
            refresher
                .delete_feed(feed.id)
                .await
                .with_context(|| format!("Failed to remove '{}'", feed.title))?;
            println!("Removed: {}", feed.title);
        }
        Command::List { json } => list(&db, json).await?,
        Command::Refresh { feed, force } => {
            let failed = refresh(&db, &refresher, &config, feed.as_deref(), force).await?;
            if failed > 0 {
                anyhow::bail!("{} feed(s) failed to refresh", failed);
            }
        }
        Command::Show { feed, json } => show(&db, &feed, json).await?,
        Command::MarkRead { feed } => {
            let feed = resolve_feed(&db, &feed).await?;
            let marked = refresher
                .mark_all_read(feed.id)
                .await
                .with_context(|| format!("Failed to mark '{}' read", feed.title))?;
            println!("{}: {} items marked read", feed.title, marked);
        }
        Command::Read { item, unread } => set_read(&db, &refresher, item, !unread).await?,
        Command::Rename { feed, title } => {
            let feed = resolve_feed(&db, &feed).await?;
            db.rename_feed(feed.id, &title)
                .await
                .with_context(|| format!("Failed to rename '{}'", feed.title))?;
            println!("Renamed: {} -> {}", feed.title, title.trim());
        }
        Command::Folder { action } => match action {
            FolderCommand::Add { name } => {
                let id = db
                    .create_folder(&name)
                    .await
                    .with_context(|| format!("Failed to create folder '{}'", name))?;
                println!("Folder '{}' ({})", name.trim(), id);
            }
            FolderCommand::Remove { name } => remove_folder(&db, &refresher, &name).await?,
            FolderCommand::Move { feed, folder } => move_feed(&db, &feed, folder.as_deref()).await?,
        },
    }

    Ok(())
}
