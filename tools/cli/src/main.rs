//! CryptoSafe CLI - Command line interface for the encrypted vault.
//!
//! Configuration comes from `CRYPTOSAFE_*` environment variables; every
//! command that touches vault contents prompts for the master password,
//! unlocks a session, runs, and shuts the session down again.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;
use zeroize::Zeroizing;

use cryptosafe_common::{EntryId, SecretString};
use cryptosafe_crypto::{CipherScheme, KdfParams};
use cryptosafe_vault::{
    AuditAction, AuditRecord, CoreConfig, EntryUpdate, Environment, Event, EventHandler,
    EventKind, NewEntry, SessionManager, SettingValue, VaultManager,
};

/// Upper bound on how long unlocking may spend deriving the key.
const UNLOCK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "cryptosafe")]
#[command(about = "CryptoSafe - Local encrypted password vault")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Vault database path (overrides CRYPTOSAFE_DB_PATH).
    #[arg(short, long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set up the master password for a new vault.
    Init,

    /// Show the resolved configuration.
    Info,

    /// Add an entry.
    Add {
        /// Entry title.
        #[arg(short, long)]
        title: String,

        #[arg(short, long)]
        username: Option<String>,

        #[arg(long)]
        url: Option<String>,

        #[arg(long)]
        notes: Option<String>,

        /// Tag (repeatable).
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Show an entry.
    Get {
        #[arg(short, long)]
        id: i64,

        /// Print the password instead of masking it.
        #[arg(long)]
        show: bool,
    },

    /// Change fields of an entry.
    Update {
        #[arg(short, long)]
        id: i64,

        #[arg(short, long)]
        title: Option<String>,

        #[arg(short, long)]
        username: Option<String>,

        #[arg(long)]
        url: Option<String>,

        #[arg(long)]
        notes: Option<String>,

        /// Prompt for a new password.
        #[arg(long)]
        password: bool,
    },

    /// List entries, optionally filtered.
    List {
        /// Case-insensitive match on title, URL or tags.
        #[arg(short, long)]
        search: Option<String>,
    },

    /// Remove an entry.
    Remove {
        #[arg(short, long)]
        id: i64,
    },

    /// Hold an entry's password in the clipboard slot until it expires.
    Copy {
        #[arg(short, long)]
        id: i64,
    },

    /// Show audit records.
    Audit {
        /// Only records for this entry.
        #[arg(short, long)]
        entry: Option<i64>,

        /// Only records with this action (e.g. EntryCreated).
        #[arg(short, long, value_parser = str::parse::<AuditAction>)]
        action: Option<AuditAction>,

        /// First record id.
        #[arg(long, default_value_t = 1)]
        from: i64,

        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },

    /// Verify the audit hash chain.
    VerifyAudit,

    /// Change the master password.
    ChangePassword,

    /// Manage settings.
    Settings {
        #[command(subcommand)]
        action: SettingsCommand,
    },

    /// Write a backup copy of the vault.
    Backup {
        /// Destination file (must not exist).
        #[arg(short, long)]
        out: PathBuf,
    },
}

#[derive(Subcommand)]
enum SettingsCommand {
    /// List setting names.
    List,

    /// Read a setting.
    Get { name: String },

    /// Write a setting.
    Set {
        name: String,
        value: String,

        /// Encrypt the value under the vault key.
        #[arg(long)]
        secret: bool,
    },

    /// Delete a setting.
    Delete { name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = load_config(|name| std::env::var(name).ok())?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    let manager = VaultManager::new(config).context("Invalid configuration")?;

    match cli.command {
        Commands::Init => cmd_init(&manager).await,

        Commands::Info => cmd_info(&manager),

        Commands::Add {
            title,
            username,
            url,
            notes,
            tags,
        } => cmd_add(&manager, title, username, url, notes, tags).await,

        Commands::Get { id, show } => cmd_get(&manager, id, show).await,

        Commands::Update {
            id,
            title,
            username,
            url,
            notes,
            password,
        } => cmd_update(&manager, id, title, username, url, notes, password).await,

        Commands::List { search } => cmd_list(&manager, search.as_deref()).await,

        Commands::Remove { id } => cmd_remove(&manager, id).await,

        Commands::Copy { id } => cmd_copy(&manager, id).await,

        Commands::Audit {
            entry,
            action,
            from,
            limit,
        } => cmd_audit(&manager, entry, action, from, limit).await,

        Commands::VerifyAudit => cmd_verify_audit(&manager).await,

        Commands::ChangePassword => cmd_change_password(&manager).await,

        Commands::Settings { action } => cmd_settings(&manager, action).await,

        Commands::Backup { out } => cmd_backup(&manager, &out).await,
    }
}

/// Build the engine configuration from `CRYPTOSAFE_*` variables.
fn load_config(lookup: impl Fn(&str) -> Option<String>) -> Result<CoreConfig> {
    let environment = match lookup("CRYPTOSAFE_ENV") {
        Some(value) => value.parse::<Environment>()?,
        None => Environment::default(),
    };
    let db_path = lookup("CRYPTOSAFE_DB_PATH").map(PathBuf::from);
    let mut config = CoreConfig::for_environment(environment, db_path);

    if let Some(value) = lookup("CRYPTOSAFE_ENC_SCHEME") {
        config.cipher = value.parse::<CipherScheme>()?;
    }
    if let Some(value) = lookup("CRYPTOSAFE_KDF") {
        config.kdf = parse_kdf(&value)?;
    }
    if let Some(value) = lookup("CRYPTOSAFE_LANG") {
        config.preferences.language = value;
    }
    if let Some(value) = lookup("CRYPTOSAFE_THEME") {
        config.preferences.theme = value;
    }
    if let Some(value) = lookup("CRYPTOSAFE_CLIPBOARD_SECS") {
        config.session.clipboard_timeout = parse_secs("CRYPTOSAFE_CLIPBOARD_SECS", &value)?;
    }
    if let Some(value) = lookup("CRYPTOSAFE_AUTOLOCK_SECS") {
        config.session.inactivity_timeout = parse_secs("CRYPTOSAFE_AUTOLOCK_SECS", &value)?;
    }

    Ok(config)
}

/// Preset name or the JSON form stored with the master key.
fn parse_kdf(value: &str) -> Result<KdfParams> {
    match value.trim() {
        "interactive" => Ok(KdfParams::interactive()),
        "moderate" => Ok(KdfParams::moderate()),
        "sensitive" => Ok(KdfParams::sensitive()),
        json if json.starts_with('{') => {
            KdfParams::from_json(json).context("Invalid CRYPTOSAFE_KDF parameters")
        }
        name => name.parse::<KdfParams>().context(
            "Invalid CRYPTOSAFE_KDF. Use: argon2id, interactive, moderate, sensitive or JSON",
        ),
    }
}

fn parse_secs(name: &str, value: &str) -> Result<Duration> {
    let secs: u64 = value
        .trim()
        .parse()
        .with_context(|| format!("{} must be a whole number of seconds", name))?;
    Ok(Duration::from_secs(secs))
}

/// Prompt for password securely.
fn prompt_password(prompt: &str) -> Result<Zeroizing<String>> {
    let password = rpassword::prompt_password(prompt).context("Failed to read password")?;
    Ok(Zeroizing::new(password))
}

fn prompt_new_password(prompt: &str) -> Result<Zeroizing<String>> {
    let password = prompt_password(prompt)?;
    let confirm = prompt_password("Confirm password: ")?;

    if password != confirm {
        anyhow::bail!("Passwords do not match");
    }

    if password.is_empty() {
        anyhow::bail!("Password cannot be empty");
    }

    Ok(password)
}

fn entry_id(raw: i64) -> Result<EntryId> {
    EntryId::new(raw).context("Invalid entry id")
}

/// Open the vault and unlock it with a prompted master password.
async fn unlock(manager: &VaultManager) -> Result<SessionManager> {
    if !manager.vault_exists()? {
        anyhow::bail!(
            "No vault at {}. Run `cryptosafe init` first",
            manager.config().db_path.display()
        );
    }

    let handler: Arc<dyn EventHandler> = Arc::new(|event: &Event| -> cryptosafe_common::Result<()> {
        debug!(kind = ?event.kind(), at = %event.timestamp, "Vault event");
        Ok(())
    });
    for kind in [
        EventKind::EntryAdded,
        EventKind::EntryUpdated,
        EventKind::EntryDeleted,
        EventKind::ClipboardCleared,
    ] {
        manager.events().subscribe(kind, handler.clone());
    }

    let session = manager.open().context("Failed to open vault")?;
    let password = prompt_password("Enter master password: ")?;
    session
        .unlock_with_timeout(&password, UNLOCK_TIMEOUT)
        .await
        .context("Failed to unlock vault")?;
    Ok(session)
}

/// Set up a new vault.
async fn cmd_init(manager: &VaultManager) -> Result<()> {
    let config = manager.config();
    info!("Initializing vault at: {}", config.db_path.display());

    if manager.vault_exists()? {
        anyhow::bail!("Vault is already initialized");
    }

    let password = prompt_new_password("Choose master password: ")?;
    let session = manager.open().context("Failed to open vault")?;
    session
        .initialize(&password)
        .await
        .context("Failed to initialize vault")?;

    println!("Vault created successfully!");
    println!("  Location: {}", config.db_path.display());
    println!("  Cipher: {}", config.cipher.as_str());
    println!("  KDF: {}", config.kdf);

    Ok(())
}

/// Show the resolved configuration.
fn cmd_info(manager: &VaultManager) -> Result<()> {
    let config = manager.config();

    println!("CryptoSafe Configuration:");
    println!("  Environment: {}", config.environment);
    println!("  Database: {}", config.db_path.display());
    println!("  Initialized: {}", manager.vault_exists()?);
    println!("  Cipher: {}", config.cipher.as_str());
    println!("  KDF: {}", config.kdf);
    println!(
        "  Clipboard timeout: {}s",
        config.session.clipboard_timeout.as_secs()
    );
    println!(
        "  Auto-lock after: {}s",
        config.session.inactivity_timeout.as_secs()
    );
    println!("  Language: {}", config.preferences.language);
    println!("  Theme: {}", config.preferences.theme);

    Ok(())
}

/// Add an entry.
async fn cmd_add(
    manager: &VaultManager,
    title: String,
    username: Option<String>,
    url: Option<String>,
    notes: Option<String>,
    tags: Vec<String>,
) -> Result<()> {
    let session = unlock(manager).await?;
    let password = prompt_password("Entry password: ")?;

    let mut entry = NewEntry::new(title, SecretString::new(password.as_str()));
    entry.username = username;
    entry.url = url;
    entry.notes = notes;
    entry.tags = tags.into_iter().collect();

    let id = session
        .create_entry(entry)
        .await
        .context("Failed to add entry")?;
    session.shutdown().await?;

    println!("Entry added with id {}", id);
    Ok(())
}

/// Show an entry.
async fn cmd_get(manager: &VaultManager, id: i64, show: bool) -> Result<()> {
    let session = unlock(manager).await?;
    let entry = session
        .get_entry(entry_id(id)?)
        .await
        .context("Failed to read entry")?;
    session.shutdown().await?;

    println!("{} (id {})", entry.title, entry.id);
    if let Some(username) = &entry.username {
        println!("  Username: {}", username);
    }
    if show {
        println!("  Password: {}", entry.password.expose());
    } else {
        println!("  Password: ********");
    }
    if let Some(url) = &entry.url {
        println!("  URL: {}", url);
    }
    if let Some(notes) = &entry.notes {
        println!("  Notes: {}", notes);
    }
    if !entry.tags.is_empty() {
        let tags: Vec<&str> = entry.tags.iter().map(String::as_str).collect();
        println!("  Tags: {}", tags.join(", "));
    }
    println!("  Created: {}", entry.created_at);
    println!("  Updated: {}", entry.updated_at);

    Ok(())
}

/// Change fields of an entry.
async fn cmd_update(
    manager: &VaultManager,
    id: i64,
    title: Option<String>,
    username: Option<String>,
    url: Option<String>,
    notes: Option<String>,
    password: bool,
) -> Result<()> {
    let id = entry_id(id)?;
    let session = unlock(manager).await?;

    let mut update = EntryUpdate::default();
    if let Some(title) = title {
        update = update.title(title);
    }
    if username.is_some() {
        update = update.username(username);
    }
    if url.is_some() {
        update = update.url(url);
    }
    if notes.is_some() {
        update = update.notes(notes);
    }
    if password {
        let secret = prompt_new_password("New entry password: ")?;
        update = update.password(SecretString::new(secret.as_str()));
    }
    if update.is_empty() {
        anyhow::bail!("Nothing to update");
    }

    session
        .update_entry(id, update)
        .await
        .context("Failed to update entry")?;
    session.shutdown().await?;

    println!("Entry {} updated", id);
    Ok(())
}

/// List entries.
async fn cmd_list(manager: &VaultManager, search: Option<&str>) -> Result<()> {
    let session = unlock(manager).await?;
    let entries = match search {
        Some(query) => session.search_entries(query).await,
        None => session.list_entries().await,
    }
    .context("Failed to list entries")?;
    session.shutdown().await?;

    if entries.is_empty() {
        println!("(no entries)");
    }
    for entry in entries {
        let username = entry.username.as_deref().unwrap_or("-");
        println!("{:>5}  {:<32}  {}", entry.id, entry.title, username);
    }

    Ok(())
}

/// Remove an entry.
async fn cmd_remove(manager: &VaultManager, id: i64) -> Result<()> {
    let id = entry_id(id)?;
    let session = unlock(manager).await?;
    session
        .delete_entry(id)
        .await
        .context("Failed to remove entry")?;
    session.shutdown().await?;

    println!("Entry {} removed", id);
    Ok(())
}

/// Hold a password in the clipboard slot until it expires or Ctrl-C.
async fn cmd_copy(manager: &VaultManager, id: i64) -> Result<()> {
    let id = entry_id(id)?;
    let session = unlock(manager).await?;
    let expires_at = session
        .copy_secret(id)
        .await
        .context("Failed to copy secret")?;

    if let Some(secret) = session.clipboard().await {
        println!("{}", secret.expose());
    }
    println!("Held until {} (Ctrl-C clears now)", expires_at);

    let hold = session.policy().clipboard_timeout;
    tokio::select! {
        _ = tokio::time::sleep(hold) => {}
        _ = tokio::signal::ctrl_c() => {
            session.clear_clipboard().await?;
        }
    }
    // Let an expiry that raced the sleep finish before shutting down.
    tokio::task::yield_now().await;
    session.shutdown().await?;

    println!("Clipboard cleared");
    Ok(())
}

/// Show audit records.
async fn cmd_audit(
    manager: &VaultManager,
    entry: Option<i64>,
    action: Option<AuditAction>,
    from: i64,
    limit: usize,
) -> Result<()> {
    let session = unlock(manager).await?;

    let records = match (entry, action) {
        (Some(id), _) => session.audit_for_entry(entry_id(id)?).await,
        (None, Some(action)) => session.audit_by_action(action).await,
        (None, None) => session.audit_range(from, limit).await,
    }
    .context("Failed to read audit log")?;
    session.shutdown().await?;

    for record in &records {
        print_record(record);
    }
    println!("{} record(s)", records.len());
    Ok(())
}

fn print_record(record: &AuditRecord) {
    let entry = record
        .entry_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{:>6}  {}  {:<16}  entry={:<5}  {}",
        record.id,
        record.timestamp,
        record.action.as_str(),
        entry,
        record.details
    );
}

/// Verify the audit hash chain.
async fn cmd_verify_audit(manager: &VaultManager) -> Result<()> {
    let session = unlock(manager).await?;
    let report = session
        .verify_audit_chain()
        .await
        .context("Failed to verify audit log")?;
    session.shutdown().await?;

    match report.first_break {
        None => println!(
            "Audit chain intact ({} records checked)",
            report.records_checked
        ),
        Some(id) => anyhow::bail!(
            "Audit chain broken at record {} ({} records checked)",
            id,
            report.records_checked
        ),
    }
    Ok(())
}

/// Change the master password.
async fn cmd_change_password(manager: &VaultManager) -> Result<()> {
    info!("Changing master password");

    let session = unlock(manager).await?;
    let current = prompt_password("Confirm current master password: ")?;
    let new_password = prompt_new_password("New master password: ")?;

    session
        .change_master_password(&current, &new_password)
        .await
        .context("Failed to change password")?;
    session.shutdown().await?;

    println!("Password changed successfully!");
    Ok(())
}

/// Manage settings.
async fn cmd_settings(manager: &VaultManager, action: SettingsCommand) -> Result<()> {
    let session = unlock(manager).await?;

    match action {
        SettingsCommand::List => {
            for setting in session.list_settings().await? {
                let marker = if setting.encrypted { " (encrypted)" } else { "" };
                println!("{}{}", setting.key, marker);
            }
        }
        SettingsCommand::Get { name } => {
            let value = session
                .get_setting(&name)
                .await
                .context("Failed to read setting")?;
            match &value {
                SettingValue::Plain(bytes) => println!("{}", String::from_utf8_lossy(bytes)),
                SettingValue::Decrypted(bytes) => {
                    println!("{}", String::from_utf8_lossy(bytes.as_bytes()))
                }
            }
        }
        SettingsCommand::Set {
            name,
            value,
            secret,
        } => {
            let value = Zeroizing::new(value);
            let written = if secret {
                session.set_secret_setting(&name, value.as_bytes()).await
            } else {
                session.set_setting(&name, value.as_bytes()).await
            };
            written.context("Failed to write setting")?;
            println!("Setting {} saved", name);
        }
        SettingsCommand::Delete { name } => {
            session
                .delete_setting(&name)
                .await
                .context("Failed to delete setting")?;
            println!("Setting {} deleted", name);
        }
    }

    session.shutdown().await?;
    Ok(())
}

/// Write a backup copy of the vault.
async fn cmd_backup(manager: &VaultManager, dest: &PathBuf) -> Result<()> {
    let session = unlock(manager).await?;
    let written = session
        .backup_to(dest)
        .await
        .context("Failed to write backup")?;
    session.shutdown().await?;

    println!("Backup written to {}", written.display());
    Ok(())
}
