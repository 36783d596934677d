mod config;
mod db;
mod error;
mod models;
mod query;
mod theme;
mod theme_store;
mod tokens;
mod tui;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use config::{Config, DEFAULT_THEME_CSS, DEFAULT_TOKENS_OUT};
use error::DbError;
use db::{ApplicationFilter, ApplicationOrder, Database, SavedJobFilter, SavedJobOrder, UserFilter, UserOrder};
use models::{ApplicationStatus, NewAccount, NewJobApplication, NewSavedJob, NewUser, User, UserChanges};
use query::{Page, SortOrder};
use std::path::{Path, PathBuf};
use theme_store::ThemeStore;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "jobsearch")]
#[command(about = "Job search data store and design-token tooling")]
struct Cli {
    /// SQLite database file
    #[arg(long, global = true, env = "JOBSEARCH_DATABASE")]
    database: Option<PathBuf>,

    /// Preferences file holding the selected theme
    #[arg(long, global = true, env = "JOBSEARCH_PREFERENCES")]
    preferences: Option<PathBuf>,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Manage users
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Manage linked auth-provider accounts
    Account {
        #[command(subcommand)]
        command: AccountCommands,
    },

    /// Manage login sessions
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },

    /// Issue and redeem email verification tokens
    Verify {
        #[command(subcommand)]
        command: VerifyCommands,
    },

    /// Manage saved (bookmarked) jobs
    Saved {
        #[command(subcommand)]
        command: SavedCommands,
    },

    /// Track job applications
    Apply {
        #[command(subcommand)]
        command: ApplyCommands,
    },

    /// Search history
    Search {
        #[command(subcommand)]
        command: SearchCommands,
    },

    /// Export theme colors and design tokens as Figma tokens JSON
    Tokens {
        /// Theme CSS file
        #[arg(short, long, env = "JOBSEARCH_THEME_CSS", default_value = DEFAULT_THEME_CSS)]
        input: PathBuf,

        /// Output JSON file
        #[arg(short, long, env = "JOBSEARCH_TOKENS_OUT", default_value = DEFAULT_TOKENS_OUT)]
        output: PathBuf,
    },

    /// Inspect or change the active theme
    Theme {
        /// Theme CSS file
        #[arg(long, env = "JOBSEARCH_THEME_CSS", default_value = DEFAULT_THEME_CSS)]
        css: PathBuf,

        #[command(subcommand)]
        command: ThemeCommands,
    },

    /// Browse the design tokens of each theme
    StyleGuide {
        /// Theme CSS file
        #[arg(long, env = "JOBSEARCH_THEME_CSS", default_value = DEFAULT_THEME_CSS)]
        css: PathBuf,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Create a user
    Add {
        email: String,
        #[arg(short, long)]
        name: Option<String>,
        #[command(flatten)]
        prefs: PreferenceArgs,
    },

    /// List users
    List {
        #[arg(short, long)]
        location: Option<String>,
        /// Only users open to remote work
        #[arg(long)]
        remote: bool,
        /// Users listing this skill
        #[arg(short, long)]
        skill: Option<String>,
        #[arg(long, value_enum, default_value_t = UserSort::Created)]
        sort: UserSort,
        #[command(flatten)]
        page: PageArgs,
    },

    /// Show a user
    Show {
        /// User id or email
        user: String,
    },

    /// Update profile and job-search preferences
    Update {
        /// User id or email
        user: String,
        #[arg(short, long)]
        name: Option<String>,
        #[command(flatten)]
        prefs: PreferenceArgs,
        #[arg(long)]
        email_notifications: Option<bool>,
        #[arg(long)]
        job_alerts: Option<bool>,
        /// Mark the email address as verified now
        #[arg(long)]
        verified: bool,
        /// Fields to clear (comma-separated)
        #[arg(long, value_enum, value_delimiter = ',')]
        clear: Vec<ClearField>,
    },

    /// Delete a user and everything they own
    Delete {
        /// User id or email
        user: String,
    },
}

#[derive(clap::Args)]
struct PreferenceArgs {
    #[arg(short, long)]
    location: Option<String>,
    #[arg(long)]
    remote: Option<bool>,
    #[arg(long)]
    salary_min: Option<i64>,
    #[arg(long)]
    salary_max: Option<i64>,
    /// Comma-separated skills
    #[arg(long, value_delimiter = ',')]
    skills: Option<Vec<String>>,
    #[arg(long)]
    experience: Option<String>,
}

#[derive(clap::Args)]
struct PageArgs {
    /// Maximum rows to show
    #[arg(long)]
    take: Option<usize>,
    /// Rows to skip (after the cursor, if any)
    #[arg(long, default_value = "0")]
    skip: usize,
    /// Id of the row to start from
    #[arg(long)]
    cursor: Option<String>,
    /// Newest/largest first
    #[arg(long)]
    desc: bool,
}

impl PageArgs {
    fn page(&self) -> Page {
        Page {
            cursor: self.cursor.clone(),
            skip: self.skip,
            take: self.take,
        }
    }

    fn order(&self) -> SortOrder {
        if self.desc { SortOrder::Desc } else { SortOrder::Asc }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ClearField {
    Name,
    Location,
    SalaryMin,
    SalaryMax,
    Experience,
}

#[derive(Clone, Copy, ValueEnum)]
enum UserSort {
    Created,
    Email,
    Name,
}

impl From<UserSort> for UserOrder {
    fn from(sort: UserSort) -> Self {
        match sort {
            UserSort::Created => UserOrder::CreatedAt,
            UserSort::Email => UserOrder::Email,
            UserSort::Name => UserOrder::Name,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum SavedSort {
    Saved,
    Title,
    Salary,
}

impl From<SavedSort> for SavedJobOrder {
    fn from(sort: SavedSort) -> Self {
        match sort {
            SavedSort::Saved => SavedJobOrder::SavedAt,
            SavedSort::Title => SavedJobOrder::Title,
            SavedSort::Salary => SavedJobOrder::SalaryMax,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ApplySort {
    Applied,
    Updated,
    Status,
}

impl From<ApplySort> for ApplicationOrder {
    fn from(sort: ApplySort) -> Self {
        match sort {
            ApplySort::Applied => ApplicationOrder::AppliedAt,
            ApplySort::Updated => ApplicationOrder::UpdatedAt,
            ApplySort::Status => ApplicationOrder::Status,
        }
    }
}

#[derive(Subcommand)]
enum AccountCommands {
    /// Link a provider account to a user
    Link {
        /// User id or email
        user: String,
        #[arg(short, long)]
        provider: String,
        #[arg(long)]
        provider_account_id: String,
        #[arg(long, default_value = "oauth")]
        account_type: String,
        /// Update tokens if the account is already linked
        #[arg(long)]
        upsert: bool,
    },

    /// List a user's linked accounts
    List {
        user: String,
    },

    /// Remove a linked account
    Unlink {
        #[arg(short, long)]
        provider: String,
        #[arg(long)]
        provider_account_id: String,
    },
}

#[derive(Subcommand)]
enum SessionCommands {
    /// Start a session for a user
    Create {
        user: String,
        /// Lifetime in days
        #[arg(short, long, default_value = "30")]
        days: i64,
    },

    /// List a user's sessions
    List {
        user: String,
    },

    /// Show the user behind a session token
    Show {
        token: String,
    },

    /// Extend a session
    Extend {
        token: String,
        #[arg(short, long, default_value = "30")]
        days: i64,
    },

    /// End a session
    End {
        token: String,
    },

    /// Delete expired sessions and verification tokens
    Purge,
}

#[derive(Subcommand)]
enum VerifyCommands {
    /// Issue a token for an identifier (usually an email)
    Issue {
        identifier: String,
        /// Lifetime in hours
        #[arg(long, default_value = "24")]
        hours: i64,
    },

    /// Redeem a token; it cannot be used again
    Redeem {
        identifier: String,
        token: String,
    },
}

#[derive(Subcommand)]
enum SavedCommands {
    /// Bookmark a job
    Add {
        user: String,
        job_id: String,
        #[arg(short, long)]
        title: String,
        #[arg(short, long)]
        company: Option<String>,
        #[arg(short, long)]
        location: Option<String>,
        #[arg(long)]
        salary_min: Option<i64>,
        #[arg(long)]
        salary_max: Option<i64>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        remote: bool,
        #[arg(long)]
        description: Option<String>,
        /// Raw listing JSON to keep as a snapshot
        #[arg(long)]
        data: Option<String>,
        /// Refresh the snapshot if already saved
        #[arg(long)]
        upsert: bool,
    },

    /// List saved jobs
    List {
        user: String,
        #[arg(short, long)]
        company: Option<String>,
        /// Title contains
        #[arg(short, long)]
        query: Option<String>,
        #[arg(long)]
        remote: bool,
        #[arg(long)]
        min_salary: Option<i64>,
        #[arg(long)]
        max_salary: Option<i64>,
        #[arg(long, value_enum, default_value_t = SavedSort::Saved)]
        sort: SavedSort,
        #[command(flatten)]
        page: PageArgs,
    },

    /// Show a saved job
    Show {
        user: String,
        job_id: String,
    },

    /// Remove a saved job
    Remove {
        user: String,
        job_id: String,
    },

    /// Salary summary over saved jobs
    Stats {
        user: String,
    },
}

#[derive(Subcommand)]
enum ApplyCommands {
    /// Record an application
    Add {
        user: String,
        job_id: String,
        #[arg(short, long)]
        title: String,
        #[arg(short, long)]
        company: Option<String>,
        #[arg(short, long)]
        status: Option<ApplicationStatus>,
        #[arg(short, long)]
        notes: Option<String>,
        /// Follow up after this many days
        #[arg(long)]
        follow_up_days: Option<i64>,
    },

    /// List applications
    List {
        user: String,
        /// APPLIED, VIEWED, INTERVIEWING, REJECTED or HIRED
        #[arg(short, long)]
        status: Option<ApplicationStatus>,
        #[arg(short, long)]
        company: Option<String>,
        #[arg(long, value_enum, default_value_t = ApplySort::Applied)]
        sort: ApplySort,
        #[command(flatten)]
        page: PageArgs,
    },

    /// Change an application's status
    Status {
        id: String,
        status: ApplicationStatus,
    },

    /// Set or clear the follow-up date
    FollowUp {
        id: String,
        /// Days from now
        #[arg(long, conflicts_with = "clear")]
        days: Option<i64>,
        #[arg(long)]
        clear: bool,
    },

    /// Replace an application's notes
    Note {
        id: String,
        notes: Option<String>,
    },

    /// Applications whose follow-up is due
    Due {
        user: String,
    },

    /// Delete an application
    Remove {
        id: String,
    },

    /// Applications per status
    Stats {
        user: String,
    },
}

#[derive(Subcommand)]
enum SearchCommands {
    /// Record a search
    Log {
        user: String,
        query: String,
        #[arg(short, long)]
        location: Option<String>,
        /// Filters as JSON
        #[arg(short, long)]
        filters: Option<String>,
        #[arg(short, long)]
        results: Option<i64>,
    },

    /// Recent searches
    History {
        user: String,
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Forget a user's searches
    Clear {
        user: String,
    },
}

#[derive(Subcommand)]
enum ThemeCommands {
    /// List themes, marking the active one
    List,
    /// Print the active theme
    Current,
    /// Activate a theme
    Set { name: String },
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_env("JOBSEARCH_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::resolve(cli.database.clone(), cli.preferences.clone());

    match cli.command {
        Commands::Tokens { input, output } => {
            let summary = tokens::export_tokens(&input, &output)?;
            println!(
                "Wrote {} ({} themes, {} colors)",
                output.display(),
                summary.themes,
                summary.colors
            );
        }

        Commands::Theme { css, command } => {
            let mut store = load_theme_store(&css, &config)?;
            match command {
                ThemeCommands::List => {
                    for name in store.available() {
                        let marker = if name == store.current() { "*" } else { " " };
                        println!("{} {}", marker, name);
                    }
                }
                ThemeCommands::Current => println!("{}", store.current()),
                ThemeCommands::Set { name } => {
                    store.set(&name)?;
                    println!("Active theme: {} ({})", store.current(), store.class_name());
                }
            }
        }

        Commands::StyleGuide { css } => {
            let mut store = load_theme_store(&css, &config)?;
            let document = read_tokens(&css)?;
            tui::run_style_guide(document, &mut store)?;
        }

        command => {
            config.ensure_dirs()?;
            let db = Database::open(&config.database_path)
                .with_context(|| format!("Failed to open database {}", config.database_path.display()))?;
            if let Err(e) = run_data_command(&db, command) {
                match e.downcast_ref::<DbError>() {
                    Some(db_err) if !db_err.is_known() => warn!(error = %db_err, "unexpected database error"),
                    Some(db_err) => debug!(error = %db_err, "request rejected"),
                    None => {}
                }
                return Err(e);
            }
        }
    }

    Ok(())
}

fn read_tokens(css: &Path) -> Result<serde_json::Value> {
    let text = std::fs::read_to_string(css)
        .with_context(|| format!("Failed to read theme CSS: {}", css.display()))?;
    tokens::build_tokens(&text, &css.display().to_string())
}

fn load_theme_store(css: &Path, config: &Config) -> Result<ThemeStore> {
    let text = std::fs::read_to_string(css)
        .with_context(|| format!("Failed to read theme CSS: {}", css.display()))?;
    let available: Vec<String> = theme::extract_themes(&text).into_keys().collect();
    Ok(ThemeStore::load(available, Some(config.preferences_path.clone())))
}

fn resolve_user(db: &Database, key: &str) -> Result<User> {
    db.find_user_by_key(key)?
        .ok_or_else(|| anyhow!("User '{}' not found", key))
}

fn run_data_command(db: &Database, command: Commands) -> Result<()> {
    if let Commands::Init = command {
        db.init()?;
        println!("Database initialized at {}", db.path().display());
        return Ok(());
    }
    db.ensure_initialized()?;

    match command {
        Commands::User { command } => user_command(db, command),
        Commands::Account { command } => account_command(db, command),
        Commands::Session { command } => session_command(db, command),
        Commands::Verify { command } => verify_command(db, command),
        Commands::Saved { command } => saved_command(db, command),
        Commands::Apply { command } => apply_command(db, command),
        Commands::Search { command } => search_command(db, command),
        Commands::Init | Commands::Tokens { .. } | Commands::Theme { .. } | Commands::StyleGuide { .. } => {
            unreachable!("handled in main")
        }
    }
}

fn user_command(db: &Database, command: UserCommands) -> Result<()> {
    match command {
        UserCommands::Add { email, name, prefs } => {
            let created = db.create_user(&NewUser {
                email: email.clone(),
                name,
                location: prefs.location,
                remote_preference: prefs.remote.unwrap_or(false),
                salary_min: prefs.salary_min,
                salary_max: prefs.salary_max,
                skills: prefs.skills.unwrap_or_default(),
                experience_level: prefs.experience,
                ..NewUser::default()
            });
            match created {
                Ok(user) => println!("Added user {} ({})", user.email, user.id),
                Err(e) if e.is_unique_violation() => {
                    warn!(error = %e, "duplicate user");
                    return Err(anyhow!("A user with email {} already exists", email.trim()));
                }
                Err(e) => return Err(e.into()),
            }
        }

        UserCommands::List {
            location,
            remote,
            skill,
            sort,
            page,
        } => {
            let filter = UserFilter {
                location,
                remote_preference: remote.then_some(true),
                skill,
                ..UserFilter::default()
            };
            let users = db.find_users(&filter, (sort.into(), page.order()), page.page())?;
            if users.is_empty() {
                println!("No users found.");
            } else {
                println!("{:<38} {:<30} {:<20} {:<8}", "ID", "EMAIL", "LOCATION", "REMOTE");
                println!("{}", "-".repeat(98));
                for user in &users {
                    println!(
                        "{:<38} {:<30} {:<20} {:<8}",
                        user.id,
                        truncate(&user.email, 28),
                        truncate(user.location.as_deref().unwrap_or("-"), 18),
                        if user.remote_preference { "yes" } else { "no" }
                    );
                }
                println!("\n{} of {} user(s)", users.len(), db.count_users(&filter)?);
            }
        }

        UserCommands::Show { user } => {
            let user = resolve_user(db, &user)?;
            println!("User {}", user.id);
            println!("Email: {}{}", user.email, if user.email_verified.is_some() { " (verified)" } else { "" });
            if let Some(name) = &user.name {
                println!("Name: {}", name);
            }
            if let Some(location) = &user.location {
                println!("Location: {}", location);
            }
            println!("Remote: {}", if user.remote_preference { "yes" } else { "no" });
            if let Some(pay) = pay_range(user.salary_min, user.salary_max) {
                println!("Salary: {}", pay);
            }
            if !user.skills.is_empty() {
                println!("Skills: {}", user.skills.join(", "));
            }
            if let Some(level) = &user.experience_level {
                println!("Experience: {}", level);
            }
            println!(
                "Notifications: email {}, job alerts {}",
                on_off(user.email_notifications),
                on_off(user.job_alerts)
            );
            println!("Created: {}", user.created_at.format("%Y-%m-%d %H:%M"));

            let saved = db.count_saved_jobs(&SavedJobFilter::for_user(&user.id))?;
            let applications = db.count_applications(&ApplicationFilter::for_user(&user.id))?;
            let accounts = db.list_accounts(&user.id)?;
            println!("\nSaved jobs: {}  Applications: {}  Linked accounts: {}", saved, applications, accounts.len());
        }

        UserCommands::Update {
            user,
            name,
            prefs,
            email_notifications,
            job_alerts,
            verified,
            clear,
        } => {
            let user = resolve_user(db, &user)?;
            let cleared = |field| clear.contains(&field);
            let updated = db.update_user(
                &user.id,
                &UserChanges {
                    name: patch(name, cleared(ClearField::Name)),
                    email_verified: verified.then(|| Some(Utc::now())),
                    location: patch(prefs.location, cleared(ClearField::Location)),
                    remote_preference: prefs.remote,
                    salary_min: patch(prefs.salary_min, cleared(ClearField::SalaryMin)),
                    salary_max: patch(prefs.salary_max, cleared(ClearField::SalaryMax)),
                    skills: prefs.skills,
                    experience_level: patch(prefs.experience, cleared(ClearField::Experience)),
                    email_notifications,
                    job_alerts,
                    ..UserChanges::default()
                },
            )?;
            println!("Updated user {}", updated.email);
        }

        UserCommands::Delete { user } => {
            let user = resolve_user(db, &user)?;
            db.delete_user(&user.id)?;
            println!("Deleted user {} and all their data.", user.email);
        }
    }
    Ok(())
}

fn account_command(db: &Database, command: AccountCommands) -> Result<()> {
    match command {
        AccountCommands::Link {
            user,
            provider,
            provider_account_id,
            account_type,
            upsert,
        } => {
            let user = resolve_user(db, &user)?;
            let account = NewAccount {
                user_id: user.id,
                account_type,
                provider,
                provider_account_id,
                ..NewAccount::default()
            };
            let linked = if upsert {
                db.upsert_account(&account)?
            } else {
                db.link_account(&account)?
            };
            println!("Linked {} account {} to {}", linked.provider, linked.provider_account_id, user.email);
        }

        AccountCommands::List { user } => {
            let user = resolve_user(db, &user)?;
            let accounts = db.list_accounts(&user.id)?;
            if accounts.is_empty() {
                println!("No linked accounts.");
            } else {
                println!("{:<12} {:<30} {:<10}", "PROVIDER", "ACCOUNT", "TYPE");
                println!("{}", "-".repeat(54));
                for account in accounts {
                    println!(
                        "{:<12} {:<30} {:<10}",
                        account.provider,
                        truncate(&account.provider_account_id, 28),
                        account.account_type
                    );
                }
            }
        }

        AccountCommands::Unlink { provider, provider_account_id } => {
            db.unlink_account(&provider, &provider_account_id)?;
            println!("Unlinked {} account {}", provider, provider_account_id);
        }
    }
    Ok(())
}

fn session_command(db: &Database, command: SessionCommands) -> Result<()> {
    match command {
        SessionCommands::Create { user, days } => {
            let user = resolve_user(db, &user)?;
            let session = db.create_session(&user.id, days_arg(days)?)?;
            println!("Session token: {}", session.session_token);
            println!("Expires: {}", session.expires.format("%Y-%m-%d %H:%M"));
        }

        SessionCommands::List { user } => {
            let user = resolve_user(db, &user)?;
            let now = Utc::now();
            let sessions = db.list_sessions(&user.id)?;
            if sessions.is_empty() {
                println!("No sessions.");
            }
            for session in sessions {
                let state = if session.expires > now { "active" } else { "expired" };
                println!("{}  {}  {}", session.session_token, session.expires.format("%Y-%m-%d %H:%M"), state);
            }
        }

        SessionCommands::Show { token } => match db.find_session_and_user(&token, Utc::now())? {
            Some((session, user)) => {
                println!("{} until {}", user.email, session.expires.format("%Y-%m-%d %H:%M"));
            }
            None => println!("No active session for that token."),
        },

        SessionCommands::Extend { token, days } => {
            let session = db.update_session_expiry(&token, from_now(days_arg(days)?)?)?;
            println!("Session extended until {}", session.expires.format("%Y-%m-%d %H:%M"));
        }

        SessionCommands::End { token } => {
            db.delete_session(&token)?;
            println!("Session ended.");
        }

        SessionCommands::Purge => {
            let now = Utc::now();
            let (sessions, tokens) = db.transaction(|db| {
                Ok((db.delete_expired_sessions(now)?, db.delete_expired_verification_tokens(now)?))
            })?;
            println!("Removed {} expired session(s) and {} expired token(s).", sessions, tokens);
        }
    }
    Ok(())
}

fn verify_command(db: &Database, command: VerifyCommands) -> Result<()> {
    match command {
        VerifyCommands::Issue { identifier, hours } => {
            let token = db.create_verification_token(&identifier, hours_arg(hours)?)?;
            println!("Token: {}", token.token);
            println!("Expires: {}", token.expires.format("%Y-%m-%d %H:%M"));
        }

        VerifyCommands::Redeem { identifier, token } => {
            let now = Utc::now();
            let redeemed = db.transaction(|db| {
                if db.use_verification_token(&identifier, &token, now)?.is_none() {
                    return Ok(false);
                }
                if let Some(user) = db.find_user_by_email(&identifier)? {
                    db.update_user(
                        &user.id,
                        &UserChanges {
                            email_verified: Some(Some(now)),
                            ..UserChanges::default()
                        },
                    )?;
                }
                Ok(true)
            })?;
            if !redeemed {
                return Err(anyhow!("Invalid or expired token for {}", identifier));
            }
            println!("Verified {}", identifier);
        }
    }
    Ok(())
}

fn saved_command(db: &Database, command: SavedCommands) -> Result<()> {
    match command {
        SavedCommands::Add {
            user,
            job_id,
            title,
            company,
            location,
            salary_min,
            salary_max,
            url,
            remote,
            description,
            data,
            upsert,
        } => {
            let user = resolve_user(db, &user)?;
            let job_data = data
                .map(|raw| serde_json::from_str(&raw))
                .transpose()
                .context("--data must be valid JSON")?;
            let job = NewSavedJob {
                user_id: user.id,
                job_id,
                title,
                company,
                location,
                salary_min,
                salary_max,
                url,
                remote,
                description,
                job_data,
            };
            let saved = if upsert { db.upsert_saved_job(&job) } else { db.save_job(&job) };
            match saved {
                Ok(saved) => println!("Saved job {} ({})", saved.job_id, saved.title),
                Err(e) if e.is_unique_violation() => {
                    return Err(anyhow!("Job {} is already saved (use --upsert to refresh it)", job.job_id));
                }
                Err(e) => return Err(e.into()),
            }
        }

        SavedCommands::List {
            user,
            company,
            query,
            remote,
            min_salary,
            max_salary,
            sort,
            page,
        } => {
            let user = resolve_user(db, &user)?;
            let filter = SavedJobFilter {
                company,
                title_contains: query,
                remote: remote.then_some(true),
                min_salary,
                max_salary,
                ..SavedJobFilter::for_user(&user.id)
            };
            let jobs = db.find_saved_jobs(&filter, (sort.into(), page.order()), page.page())?;
            if jobs.is_empty() {
                println!("No saved jobs found.");
            } else {
                println!("{:<14} {:<30} {:<20} {:>14}", "JOB ID", "TITLE", "COMPANY", "PAY RANGE");
                println!("{}", "-".repeat(81));
                for job in &jobs {
                    println!(
                        "{:<14} {:<30} {:<20} {:>14}",
                        truncate(&job.job_id, 12),
                        truncate(&job.title, 28),
                        truncate(job.company.as_deref().unwrap_or("-"), 18),
                        short_pay(job.salary_min, job.salary_max)
                    );
                }
                println!("\n{} of {} saved job(s)", jobs.len(), db.count_saved_jobs(&filter)?);
            }
        }

        SavedCommands::Show { user, job_id } => {
            let user = resolve_user(db, &user)?;
            match db.find_saved_job(&user.id, &job_id)? {
                Some(job) => {
                    println!("{}", job.title);
                    if let Some(company) = &job.company {
                        println!("Company: {}", company);
                    }
                    if let Some(location) = &job.location {
                        println!("Location: {}{}", location, if job.remote { " (remote)" } else { "" });
                    }
                    if let Some(pay) = pay_range(job.salary_min, job.salary_max) {
                        println!("Pay: {}", pay);
                    }
                    if let Some(url) = &job.url {
                        println!("URL: {}", url);
                    }
                    println!("Saved: {}", job.saved_at.format("%Y-%m-%d %H:%M"));
                    if let Some(description) = &job.description {
                        println!("\n{}", textwrap::fill(description, 80));
                    }
                }
                None => println!("Job {} is not saved.", job_id),
            }
        }

        SavedCommands::Remove { user, job_id } => {
            let user = resolve_user(db, &user)?;
            match db.delete_saved_job(&user.id, &job_id) {
                Ok(_) => println!("Removed saved job {}", job_id),
                Err(e) if e.is_not_found() => return Err(anyhow!("Job {} is not saved", job_id)),
                Err(e) => return Err(e.into()),
            }
        }

        SavedCommands::Stats { user } => {
            let user = resolve_user(db, &user)?;
            let stats = db.saved_job_salary_stats(&user.id)?;
            println!("Saved jobs: {}", stats.count);
            if let Some(min) = stats.lowest_min {
                println!("Lowest minimum: ${}", min);
            }
            if let Some(max) = stats.highest_max {
                println!("Highest maximum: ${}", max);
            }
            if let (Some(lo), Some(hi)) = (stats.avg_min, stats.avg_max) {
                println!("Average range: ${:.0} - ${:.0}", lo, hi);
            }
        }
    }
    Ok(())
}

fn apply_command(db: &Database, command: ApplyCommands) -> Result<()> {
    match command {
        ApplyCommands::Add {
            user,
            job_id,
            title,
            company,
            status,
            notes,
            follow_up_days,
        } => {
            let user = resolve_user(db, &user)?;
            let application = db.create_application(&NewJobApplication {
                user_id: user.id,
                job_id,
                job_title: title,
                company,
                status,
                follow_up_at: follow_up_days.map(|d| from_now(days_arg(d)?)).transpose()?,
                notes,
            })?;
            println!("Recorded application {} ({})", application.id, application.status);
        }

        ApplyCommands::List {
            user,
            status,
            company,
            sort,
            page,
        } => {
            let user = resolve_user(db, &user)?;
            let filter = ApplicationFilter {
                status,
                company,
                ..ApplicationFilter::for_user(&user.id)
            };
            let applications = db.find_applications(&filter, (sort.into(), page.order()), page.page())?;
            if applications.is_empty() {
                println!("No applications found.");
            } else {
                println!("{:<38} {:<13} {:<28} {:<18} {:<10}", "ID", "STATUS", "TITLE", "COMPANY", "APPLIED");
                println!("{}", "-".repeat(110));
                for app in &applications {
                    println!(
                        "{:<38} {:<13} {:<28} {:<18} {:<10}",
                        app.id,
                        app.status,
                        truncate(&app.job_title, 26),
                        truncate(app.company.as_deref().unwrap_or("-"), 16),
                        app.applied_at.format("%Y-%m-%d")
                    );
                }
            }
        }

        ApplyCommands::Status { id, status } => {
            let application = db.update_application_status(&id, status)?;
            println!("{} is now {}", application.job_title, application.status);
        }

        ApplyCommands::FollowUp { id, days, clear } => {
            let when = match (days, clear) {
                (_, true) => None,
                (Some(days), false) => Some(from_now(days_arg(days)?)?),
                (None, false) => return Err(anyhow!("Pass --days N or --clear")),
            };
            let application = db.set_follow_up(&id, when)?;
            match application.follow_up_at {
                Some(at) => println!("Follow up on {}", at.format("%Y-%m-%d")),
                None => println!("Follow-up cleared."),
            }
        }

        ApplyCommands::Note { id, notes } => {
            db.update_application_notes(&id, notes.as_deref())?;
            println!("Notes updated.");
        }

        ApplyCommands::Due { user } => {
            let user = resolve_user(db, &user)?;
            let due = db.due_follow_ups(&user.id, Utc::now())?;
            if due.is_empty() {
                println!("Nothing to follow up on.");
            }
            for app in due {
                let when = app.follow_up_at.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default();
                println!("{}  {}  {} ({})", when, app.status, app.job_title, app.company.unwrap_or_default());
            }
        }

        ApplyCommands::Remove { id } => {
            let application = db.delete_application(&id)?;
            println!("Removed application for {}", application.job_title);
        }

        ApplyCommands::Stats { user } => {
            let user = resolve_user(db, &user)?;
            let counts = db.application_status_counts(&user.id)?;
            let total: i64 = counts.iter().map(|(_, n)| n).sum();
            for status in ApplicationStatus::ALL {
                let n = counts.iter().find(|(s, _)| *s == status).map_or(0, |(_, n)| *n);
                println!("{:<13} {:>5}", status, n);
            }
            println!("{:<13} {:>5}", "TOTAL", total);
        }
    }
    Ok(())
}

fn search_command(db: &Database, command: SearchCommands) -> Result<()> {
    match command {
        SearchCommands::Log {
            user,
            query,
            location,
            filters,
            results,
        } => {
            let user = resolve_user(db, &user)?;
            let filters: Option<serde_json::Value> = filters
                .map(|raw| serde_json::from_str(&raw))
                .transpose()
                .context("--filters must be valid JSON")?;
            db.record_search(&user.id, &query, location.as_deref(), filters.as_ref(), results)?;
            println!("Logged search '{}'", query);
        }

        SearchCommands::History { user, limit } => {
            let user = resolve_user(db, &user)?;
            let history = db.search_history(&user.id, limit)?;
            if history.is_empty() {
                println!("No searches yet.");
            }
            for record in history {
                let results = record.results_count.map(|n| format!("{} results", n)).unwrap_or_default();
                println!(
                    "{}  {:<30} {:<20} {}",
                    record.searched_at.format("%Y-%m-%d %H:%M"),
                    truncate(&record.query, 28),
                    truncate(record.location.as_deref().unwrap_or(""), 18),
                    results
                );
            }
        }

        SearchCommands::Clear { user } => {
            let user = resolve_user(db, &user)?;
            let removed = db.clear_search_history(&user.id)?;
            println!("Cleared {} search(es).", removed);
        }
    }
    Ok(())
}

fn days_arg(days: i64) -> Result<Duration> {
    Duration::try_days(days).ok_or_else(|| anyhow!("--days {} is out of range", days))
}

fn hours_arg(hours: i64) -> Result<Duration> {
    Duration::try_hours(hours).ok_or_else(|| anyhow!("--hours {} is out of range", hours))
}

fn from_now(offset: Duration) -> Result<DateTime<Utc>> {
    Utc::now()
        .checked_add_signed(offset)
        .ok_or_else(|| anyhow!("{} days from now is out of range", offset.num_days()))
}

/// `Some(None)` clears a nullable column, `Some(Some(v))` sets it.
fn patch<T>(value: Option<T>, clear: bool) -> Option<Option<T>> {
    if clear { Some(None) } else { value.map(Some) }
}

fn pay_range(min: Option<i64>, max: Option<i64>) -> Option<String> {
    match (min, max) {
        (Some(min), Some(max)) => Some(format!("${} - ${}", min, max)),
        (Some(min), None) => Some(format!("${}+", min)),
        (None, Some(max)) => Some(format!("up to ${}", max)),
        (None, None) => None,
    }
}

fn short_pay(min: Option<i64>, max: Option<i64>) -> String {
    match (min, max) {
        (Some(min), Some(max)) => format!("${}k-${}k", min / 1000, max / 1000),
        (Some(min), None) => format!("${}k+", min / 1000),
        (None, Some(max)) => format!("<${}k", max / 1000),
        (None, None) => "-".to_string(),
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag { "on" } else { "off" }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_status_argument_parses() {
        let cli = Cli::try_parse_from(["jobsearch", "apply", "status", "abc", "interviewing"]).unwrap();
        match cli.command {
            Commands::Apply {
                command: ApplyCommands::Status { id, status },
            } => {
                assert_eq!(id, "abc");
                assert_eq!(status, ApplicationStatus::Interviewing);
            }
            _ => panic!("wrong command"),
        }
        assert!(Cli::try_parse_from(["jobsearch", "apply", "status", "abc", "PENDING"]).is_err());
    }

    #[test]
    fn test_tokens_defaults() {
        let cli = Cli::try_parse_from(["jobsearch", "tokens"]).unwrap();
        match cli.command {
            Commands::Tokens { input, output } => {
                // Env overrides would change these; the test env does not set them.
                if std::env::var_os("JOBSEARCH_THEME_CSS").is_none() {
                    assert_eq!(input, PathBuf::from(DEFAULT_THEME_CSS));
                }
                if std::env::var_os("JOBSEARCH_TOKENS_OUT").is_none() {
                    assert_eq!(output, PathBuf::from(DEFAULT_TOKENS_OUT));
                }
            }
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn test_out_of_range_durations_are_errors() {
        assert!(days_arg(999_999_999_999).is_err());
        assert!(hours_arg(i64::MAX).is_err());
        assert!(from_now(days_arg(100_000_000_000).unwrap()).is_err());
        assert!(from_now(days_arg(30).unwrap()).is_ok());
    }

    #[test]
    fn test_patch_and_clear() {
        assert_eq!(patch(Some(5), false), Some(Some(5)));
        assert_eq!(patch(Some(5), true), Some(None));
        assert_eq!(patch::<i64>(None, false), None);

        let cli = Cli::try_parse_from(["jobsearch", "user", "update", "a@b.c", "--clear", "location,salary-min"]).unwrap();
        match cli.command {
            Commands::User {
                command: UserCommands::Update { clear, .. },
            } => assert!(clear == vec![ClearField::Location, ClearField::SalaryMin]),
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn test_pay_formatting() {
        assert_eq!(pay_range(Some(100), Some(200)).as_deref(), Some("$100 - $200"));
        assert_eq!(pay_range(None, None), None);
        assert_eq!(short_pay(Some(120_000), None), "$120k+");
        assert_eq!(short_pay(None, Some(90_000)), "<$90k");
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
        assert_eq!(truncate("ééééééééé", 6), "ééé...");
    }
}
