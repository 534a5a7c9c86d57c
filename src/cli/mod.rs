//! CLI module for the Hearth command-line interface.
//!
//! With no subcommand (or `serve`) the binary starts the API server. The
//! other subcommands work directly on the database named by the config:
//! - `check` - Print the household consistency report
//! - `repair` - Fix everything the consistency report finds
//! - `promote <email>` - Make an existing account a site admin
//! - `config-check` - Validate the configuration file

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Config;
use crate::db::{
    self, check_consistency, promote_to_admin, repair_consistency, ConsistencyReport,
};
use crate::DbPool;

/// CLI arguments structure
#[derive(Parser, Debug)]
#[command(name = "hearth")]
#[command(author, version, about = "Shared household bills and expenses", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "HEARTH_CONFIG", default_value = "hearth.toml")]
    pub config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Subcommand to run (if none, starts the server)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// True when the server should start
    pub fn is_serve(&self) -> bool {
        matches!(self.command, None | Some(Commands::Serve))
    }
}

/// Available CLI subcommands
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Start the API server (default)
    Serve,

    /// Print the household consistency report
    Check,

    /// Repair household/user/member inconsistencies
    Repair,

    /// Grant site admin to an existing account
    Promote {
        /// Email address of the account
        email: String,
    },

    /// Validate the configuration file
    ConfigCheck,
}

/// Run a non-server CLI command
pub async fn run_command(cli: &Cli) -> Result<()> {
    match &cli.command {
        Some(Commands::Check) => cmd_check(cli).await,
        Some(Commands::Repair) => cmd_repair(cli).await,
        Some(Commands::Promote { email }) => cmd_promote(cli, email).await,
        Some(Commands::ConfigCheck) => cmd_config_check(cli),
        // Handled in main.rs
        Some(Commands::Serve) | None => Ok(()),
    }
}

/// Open the configured database, refusing to create a new one
async fn open_existing_db(cli: &Cli) -> Result<DbPool> {
    let config = Config::load(&cli.config)?;
    let db_path = config.server.database_path();
    if !db_path.exists() {
        anyhow::bail!(
            "Database not found at {}. Has the server been started yet?",
            db_path.display()
        );
    }
    db::init(&db_path)
        .await
        .with_context(|| format!("Failed to open database at {}", db_path.display()))
}

async fn cmd_check(cli: &Cli) -> Result<()> {
    let pool = open_existing_db(cli).await?;
    let report = check_consistency(&pool).await?;
    print!("{}", format_report(&report));
    if !report.is_clean() {
        println!();
        println!("Run `hearth repair` to fix these issues.");
    }
    Ok(())
}

async fn cmd_repair(cli: &Cli) -> Result<()> {
    let pool = open_existing_db(cli).await?;
    let before = check_consistency(&pool).await?;
    if before.is_clean() {
        println!("[OK] Nothing to repair");
        return Ok(());
    }

    let summary = repair_consistency(&pool).await?;
    println!("=== Repair Summary ===");
    println!();
    println!("  Households deleted: {}", summary.households_deleted);
    println!("  Members inserted:   {}", summary.members_inserted);
    println!("  Members deleted:    {}", summary.members_deleted);
    println!("  Users re-linked:    {}", summary.users_relinked);
    println!("  Users cleared:      {}", summary.users_cleared);
    println!("  Owners reassigned:  {}", summary.owners_reassigned);
    println!();

    let after = check_consistency(&pool).await?;
    if after.is_clean() {
        println!("[OK] Database is consistent");
    } else {
        println!("[!!] {} issue(s) remain", after.issue_count());
        print!("{}", format_report(&after));
    }
    Ok(())
}

async fn cmd_promote(cli: &Cli, email: &str) -> Result<()> {
    let pool = open_existing_db(cli).await?;
    let mut conn = pool.acquire().await?;
    if !promote_to_admin(&mut conn, email).await? {
        anyhow::bail!("No account with email {}", email);
    }
    println!("[OK] {} is now a site admin", email.trim().to_lowercase());
    Ok(())
}

fn cmd_config_check(cli: &Cli) -> Result<()> {
    let config_path = &cli.config;

    println!("Checking configuration file: {}", config_path.display());
    println!();

    if !config_path.exists() {
        println!(
            "[!!] Configuration file not found: {}",
            config_path.display()
        );
        println!();
        println!("A default configuration will be used when starting the server.");
        return Ok(());
    }

    match Config::load(config_path) {
        Ok(config) => {
            println!("[OK] Configuration file is valid!");
            println!();
            println!("=== Configuration Summary ===");
            println!();
            println!("Server:");
            println!("  Listen:       {}:{}", config.server.host, config.server.port);
            println!("  Database:     {}", config.server.database_path().display());
            println!("  Frontend URL: {}", config.server.frontend_url);
            println!();
            println!("Features:");
            println!("  Email:        {}", enabled(config.email.is_configured()));
            println!("  WhatsApp:     {}", enabled(config.whatsapp.is_configured()));
            println!("  Google login: {}", enabled(config.oauth.google.is_some()));
            println!("  Rate limit:   {}", enabled(config.rate_limit.enabled));
            println!("  Bill sweeps:  {}", enabled(config.jobs.enabled));
            println!();

            let warnings = config_warnings(&config);
            if !warnings.is_empty() {
                println!("Warnings:");
                for warning in warnings {
                    println!("  [!] {}", warning);
                }
                println!();
            }
            Ok(())
        }
        Err(e) => {
            println!("[!!] Configuration file is invalid!");
            println!();
            println!("Error: {:#}", e);
            anyhow::bail!("Invalid configuration file");
        }
    }
}

fn enabled(on: bool) -> &'static str {
    if on {
        "Enabled"
    } else {
        "Disabled"
    }
}

/// Settings that work but are probably not what a deployment wants
pub fn config_warnings(config: &Config) -> Vec<&'static str> {
    let mut warnings = Vec::new();
    if config.auth.jwt_secret.is_empty() {
        warnings.push("No JWT secret set - a random one is generated and sessions end on restart");
    }
    if !config.email.is_configured() {
        warnings.push("Email is not configured - verification and reset links cannot be delivered");
    }
    if config.whatsapp.enabled && !config.whatsapp.is_configured() {
        warnings.push("WhatsApp is enabled but account_sid, auth_token or from_number is missing");
    }
    if config
        .oauth
        .google
        .as_ref()
        .is_some_and(|g| g.client_secret.is_empty())
    {
        warnings.push("Google OAuth has no client secret - set HEARTH_GOOGLE_CLIENT_SECRET");
    }
    if config.server.public_url.starts_with("https://") && !config.auth.cookie_secure {
        warnings.push("Served over HTTPS but auth.cookie_secure is off");
    }
    warnings
}

/// Human-readable consistency report
pub fn format_report(report: &ConsistencyReport) -> String {
    let mut out = String::new();
    if report.is_clean() {
        out.push_str("[OK] No consistency issues found\n");
        return out;
    }

    out.push_str(&format!("[!!] {} issue(s) found\n", report.issue_count()));
    if !report.orphaned_households.is_empty() {
        out.push_str("\nHouseholds whose owner no longer exists:\n");
        for id in &report.orphaned_households {
            out.push_str(&format!("  {}\n", id));
        }
    }
    if !report.unlinked_users.is_empty() {
        out.push_str("\nUsers linked to a household without a membership:\n");
        for u in &report.unlinked_users {
            let note = if u.household_exists {
                ""
            } else {
                " (household missing)"
            };
            out.push_str(&format!("  {} -> {}{}\n", u.user_id, u.household_id, note));
        }
    }
    if !report.stale_members.is_empty() {
        out.push_str("\nMembership rows that disagree with their user:\n");
        for m in &report.stale_members {
            let note = if m.user_exists { "" } else { " (user missing)" };
            out.push_str(&format!(
                "  {} in {} as {}{}\n",
                m.user_id, m.household_id, m.role, note
            ));
        }
    }
    if !report.ownerless_households.is_empty() {
        out.push_str("\nHouseholds whose owner has no owner membership:\n");
        for h in &report.ownerless_households {
            out.push_str(&format!("  {} (owner {})\n", h.household_id, h.owner_id));
        }
    }
    out
}
