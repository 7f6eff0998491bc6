//! Badekompis CLI
//!
//! Runs the application in-process against a local data directory:
//! - Sign up, log in and out
//! - Log and plan baths, join and leave planned ones
//! - Comment and react
//! - Show the feed, planned baths, leaderboard and profiles
//! - Follow a live view until interrupted
//!
//! The bearer token and the notification watermarks are kept in
//! `DATA_DIR/local_storage.json`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use futures_util::StreamExt;
use serde::Serialize;

use badekompis::backend::Upload;
use badekompis::config::generate_default_config;
use badekompis::forms::{LogBathForm, LoginForm, PlanBathForm, ProfileForm, SignupForm};
use badekompis::local_storage::{FileLocalStorage, LocalStorage, TOKEN_KEY};
use badekompis::model::{BathEntry, PlannedBath, ReactionKind, UserProfile, WaterTemperature};
use badekompis::views::{
    feed_view, leaderboard_view, not_found_notice, planned_view, AttendeeDirectory, ProfileView,
    View,
};
use badekompis::{
    AttendanceOutcome, AttendanceService, Backend, BathService, Category, Config, Notice,
    NotificationTracker, Session,
};

#[derive(Parser)]
#[command(name = "badekompis-cli")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Track cold-water baths with your friends")]
#[command(long_about = "Badekompis keeps count of your cold-water baths.\nLog baths, plan group baths and climb the leaderboard.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Data directory (default: from config)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Config file (default: search the standard locations)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table", global = true)]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create an account and sign in
    Signup {
        username: String,
        #[arg(short, long)]
        password: String,
        /// Yearly target number of baths
        #[arg(short, long, default_value_t = 10)]
        target: i64,
    },

    /// Sign in
    Login {
        username: String,
        #[arg(short, long)]
        password: String,
    },

    /// Sign out
    Logout,

    /// Show the signed-in user
    Whoami,

    /// Log a bath
    Log {
        /// YYYY-MM-DD (default: today)
        #[arg(short, long)]
        date: Option<String>,
        /// HH:MM (default: now)
        #[arg(short, long)]
        time: Option<String>,
        #[arg(short, long)]
        location: Option<String>,
        /// kaldt, Passe, Digg or Glovarmt
        #[arg(short, long)]
        water: Option<WaterTemperature>,
        #[arg(short, long)]
        comments: Option<String>,
        /// Image to attach
        #[arg(short, long)]
        image: Option<PathBuf>,
    },

    /// Plan a group bath
    Plan {
        /// YYYY-MM-DD
        #[arg(short, long)]
        date: String,
        /// HH:MM
        #[arg(short, long)]
        time: String,
        #[arg(short, long)]
        location: String,
        /// Title of the bath
        #[arg(short = 'D', long)]
        description: String,
        /// Who you plan to invite (not stored)
        #[arg(long)]
        guests: Option<String>,
    },

    /// Join a planned bath
    Join { bath_id: String },

    /// Leave a planned bath
    Leave { bath_id: String },

    /// Comment on a bath
    Comment { bath_id: String, text: String },

    /// React to a bath (thumbsUp, heart, party)
    React {
        bath_id: String,
        reaction: ReactionKind,
    },

    /// Show the feed
    Feed {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Show upcoming planned baths
    Planned,

    /// Show the leaderboard
    Leaderboard,

    /// Show a profile, or edit your own
    Profile {
        /// User id (default: yourself)
        uid: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        bio: Option<String>,
        #[arg(long)]
        target: Option<i64>,
        /// New profile picture
        #[arg(long)]
        avatar: Option<PathBuf>,
    },

    /// Show whether the feed or planned list has news
    Notifications {
        /// Mark a category (feed, planned) as seen
        #[arg(long)]
        seen: Option<Category>,
    },

    /// Follow a live view until Ctrl+C
    Watch { view: WatchTarget },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum WatchTarget {
    Feed,
    Planned,
    Leaderboard,
}

/// Everything a command needs
struct Client {
    backend: Backend,
    storage: Arc<FileLocalStorage>,
    session: Session,
    format: OutputFormat,
}

impl Client {
    async fn open(cli: &Cli) -> anyhow::Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Config::load_with_env(path)?,
            None => Config::load_default(),
        };
        if let Some(dir) = &cli.data_dir {
            config.storage.data_dir = dir.clone();
        }

        let backend = Backend::open_local(&config)
            .await
            .with_context(|| format!("opening data directory {:?}", config.storage.data_dir))?;
        let storage = Arc::new(FileLocalStorage::open(
            config.storage.data_dir.join("local_storage.json"),
        )?);
        let session = Session::new(backend.clone(), storage.clone());

        if let Some(token) = storage.get(TOKEN_KEY) {
            if let Err(e) = session.restore(&token).await {
                tracing::debug!(error = %e, "Stored token rejected");
                storage.remove(TOKEN_KEY)?;
            }
        }

        Ok(Self {
            backend,
            storage,
            session,
            format: cli.format,
        })
    }

    fn tracker(&self) -> NotificationTracker {
        NotificationTracker::new(Arc::clone(&self.backend.store), self.storage.clone())
    }

    fn remember_token(&self) -> anyhow::Result<()> {
        if let Some(token) = self.session.token() {
            self.storage.set(TOKEN_KEY, &token)?;
        }
        Ok(())
    }

    fn print<T: Serialize>(&self, value: &T, table: impl FnOnce(&T)) -> anyhow::Result<()> {
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
            OutputFormat::Table => table(value),
        }
        Ok(())
    }

    fn notice(&self, notice: &Notice) -> anyhow::Result<()> {
        self.print(notice, |n| println!("{}", n))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "badekompis=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Config { output } = &cli.command {
        let config = generate_default_config();
        match output {
            Some(path) => {
                std::fs::write(path, config)?;
                println!("Config written to {:?}", path);
            }
            None => print!("{}", config),
        }
        return Ok(());
    }

    let client = Client::open(&cli).await?;
    run(&client, cli.command).await
}

async fn run(client: &Client, command: Commands) -> anyhow::Result<()> {
    let session = &client.session;
    let baths = BathService::new(client.backend.clone());

    match command {
        Commands::Signup {
            username,
            password,
            target,
        } => {
            let form = SignupForm {
                username,
                confirm_password: password.clone(),
                password,
                target_baths: target,
            };
            let notice = session
                .sign_up(&form)
                .await
                .map_err(|e| anyhow!(e.user_message()))?;
            client.remember_token()?;
            session.take_onboarding_flag()?;
            client.notice(&notice)?;
        }

        Commands::Login { username, password } => {
            let notice = session
                .sign_in(&LoginForm { username, password })
                .await
                .map_err(|e| anyhow!(e.user_message()))?;
            client.remember_token()?;
            client.notice(&notice)?;
        }

        Commands::Logout => {
            if session.current_user().is_none() {
                bail!("Du er ikke logget inn.");
            }
            let notice = session
                .logout()
                .await
                .map_err(|e| anyhow!(e.user_message()))?;
            client.storage.remove(TOKEN_KEY)?;
            client.notice(&notice)?;
        }

        Commands::Whoami => {
            client.print(&session.view(), |view| match (&view.user, &view.profile) {
                (Some(user), Some(profile)) => {
                    println!("{} ({})", profile.name, profile.username);
                    println!("  Uid: {}", user.uid);
                    println!("  Progress: {}", progress(profile));
                }
                (Some(user), None) => println!("{} (no profile)", user.uid),
                _ => println!("Not signed in"),
            })?;
        }

        Commands::Log {
            date,
            time,
            location,
            water,
            comments,
            image,
        } => {
            let now = chrono::Local::now();
            let form = LogBathForm {
                date: date.unwrap_or_else(|| now.format("%Y-%m-%d").to_string()),
                time: time.unwrap_or_else(|| now.format("%H:%M").to_string()),
                location,
                water_temperature: water,
                comments,
            };
            let image = image.as_deref().map(read_upload).transpose()?;
            let (bath, notice) = baths
                .log_bath(session, form, image)
                .await
                .map_err(|e| anyhow!(e.user_message()))?;
            client.notice(&notice)?;
            println!("Id: {}", bath.id());
        }

        Commands::Plan {
            date,
            time,
            location,
            description,
            guests,
        } => {
            let form = PlanBathForm {
                date,
                time,
                location,
                description,
                invited_guests: guests,
            };
            let today = chrono::Local::now().date_naive();
            let (bath, notice) = baths
                .plan_bath(session, form, today)
                .await
                .map_err(|e| anyhow!(e.user_message()))?;
            client.notice(&notice)?;
            println!("Id: {}", bath.id());
        }

        Commands::Join { bath_id } => {
            attend(client, &bath_id, true).await?;
        }

        Commands::Leave { bath_id } => {
            attend(client, &bath_id, false).await?;
        }

        Commands::Comment { bath_id, text } => {
            let comment = baths
                .add_comment(session, &bath_id, &text)
                .await
                .map_err(|e| anyhow!(e.user_message()))?;
            client.print(&comment, |c| println!("{}: {}", c.author.user_name, c.text))?;
        }

        Commands::React { bath_id, reaction } => {
            baths
                .react(session, &bath_id, reaction)
                .await
                .map_err(|e| anyhow!(e.user_message()))?;
        }

        Commands::Feed { limit } => {
            let mut entries = first(feed_view(client.backend.store.as_ref())).await?;
            entries.truncate(limit);
            client.tracker().mark_seen(Category::Feed)?;
            client.print(&entries, |entries| print_feed(entries))?;
        }

        Commands::Planned => {
            let planned = first(planned_view(client.backend.store.as_ref())).await?;
            client.tracker().mark_seen(Category::Planned)?;
            print_planned(client, &planned).await?;
        }

        Commands::Leaderboard => {
            let top = first(leaderboard_view(client.backend.store.as_ref())).await?;
            client.print(&top, |top| print_leaderboard(top))?;
        }

        Commands::Profile {
            uid,
            name,
            bio,
            target,
            avatar,
        } => {
            let editing = name.is_some() || bio.is_some() || target.is_some() || avatar.is_some();
            if editing {
                if uid.is_some() {
                    bail!("Du kan bare endre din egen profil.");
                }
                let (_, current) = session
                    .require_profile()
                    .map_err(|e| anyhow!(e.user_message()))?;
                let form = ProfileForm {
                    name: name.unwrap_or(current.name),
                    bio: Some(bio.unwrap_or(current.bio)),
                    target_baths: target.unwrap_or(i64::from(current.target_baths)),
                    username: None,
                    email: None,
                };
                let avatar = avatar.as_deref().map(read_upload).transpose()?;
                let notice = session
                    .update_profile(&form, avatar)
                    .await
                    .map_err(|e| anyhow!(e.user_message()))?;
                client.notice(&notice)?;
            } else {
                let uid = match uid {
                    Some(uid) => uid,
                    None => session
                        .require_user()
                        .map_err(|e| anyhow!(e.user_message()))?
                        .uid,
                };
                show_profile(client, &uid).await?;
            }
        }

        Commands::Notifications { seen } => {
            let tracker = client.tracker();
            if let Some(category) = seen {
                tracker.mark_seen(category)?;
            }
            let status = tracker.refresh().await?;
            client.print(&status, |s| {
                println!("Feed:    {}", if s.new_feed { "new" } else { "-" });
                println!("Planned: {}", if s.new_planned { "new" } else { "-" });
            })?;
        }

        Commands::Watch { view } => watch(client, view).await?,

        Commands::Config { .. } => {}
    }

    Ok(())
}

async fn attend(client: &Client, bath_id: &str, join: bool) -> anyhow::Result<()> {
    let user = client
        .session
        .require_user()
        .map_err(|e| anyhow!(e.user_message()))?;
    let attendance = AttendanceService::new(Arc::clone(&client.backend.store));

    let outcome = if join {
        attendance.join(Some(&user), bath_id, &user.uid).await?
    } else {
        attendance.leave(Some(&user), bath_id, &user.uid).await?
    };

    let description = match find_planned(client, bath_id).await? {
        Some(bath) => bath.description,
        None => bath_id.to_string(),
    };
    let notice = if join {
        badekompis::attendance::joined_notice(&description)
    } else {
        badekompis::attendance::left_notice(&description)
    };
    client.notice(&notice)?;
    if outcome == AttendanceOutcome::Unchanged {
        eprintln!("(no change)");
    }
    Ok(())
}

async fn find_planned(client: &Client, bath_id: &str) -> anyhow::Result<Option<PlannedBath>> {
    let path = format!("{}/{}", badekompis::model::collections::BATHS, bath_id);
    Ok(match client.backend.store.get(&path).await? {
        Some(doc) => match doc.decode::<BathEntry>()? {
            BathEntry::Planned(bath) => Some(bath),
            BathEntry::Logged(_) => None,
        },
        None => None,
    })
}

async fn show_profile(client: &Client, uid: &str) -> anyhow::Result<()> {
    let view = ProfileView::open(client.backend.store.as_ref(), uid, None).await?;
    let Some(profile) = view.profile else {
        bail!(not_found_notice().description);
    };
    let activity = first(view.activity).await?;

    #[derive(Serialize)]
    struct ProfilePage<'a> {
        profile: &'a UserProfile,
        activity: &'a [BathEntry],
    }
    let page = ProfilePage {
        profile: &profile,
        activity: &activity,
    };

    client.print(&page, |page| {
        println!("{} (@{})", page.profile.name, page.profile.username);
        if !page.profile.bio.is_empty() {
            println!("  {}", page.profile.bio);
        }
        println!("  Progress: {}", progress(page.profile));
        println!();
        print_feed(page.activity);
    })
}

async fn print_planned(client: &Client, planned: &[PlannedBath]) -> anyhow::Result<()> {
    let directory = AttendeeDirectory::new(Arc::clone(&client.backend.store));
    let uids: Vec<String> = planned
        .iter()
        .flat_map(|b| b.attendees.iter().cloned())
        .collect();
    if let Err(e) = directory.resolve(&uids).await {
        tracing::warn!(error = %e, "Attendee lookup failed");
    }

    if client.format == OutputFormat::Json {
        let rows: Vec<serde_json::Value> = planned
            .iter()
            .map(|bath| -> Result<serde_json::Value, serde_json::Error> {
                let mut row = serde_json::to_value(bath)?;
                row["attendeeDetails"] = serde_json::to_value(directory.render(&bath.attendees))?;
                Ok(row)
            })
            .collect::<Result<_, _>>()?;
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if planned.is_empty() {
        println!("Ingen planlagte bad.");
        return Ok(());
    }
    for bath in planned {
        println!(
            "{} {}  {}  @ {}  [{}]",
            bath.common.date, bath.common.time, bath.description, bath.common.location, bath.common.id
        );
        let names: Vec<String> = directory
            .render(&bath.attendees)
            .into_iter()
            .map(|a| a.name)
            .collect();
        println!("  Planlagt av {}", bath.common.author.user_name);
        println!("  Påmeldte ({}): {}", names.len(), names.join(", "));
    }
    Ok(())
}

fn print_feed(entries: &[BathEntry]) {
    if entries.is_empty() {
        println!("Ingen bad ennå.");
        return;
    }

    println!(
        "{:<12} {:<6} {:<16} {:<20} {}",
        "Date", "Time", "Who", "Where", "Id"
    );
    println!("{}", "-".repeat(80));
    for entry in entries {
        let common = entry.common();
        let what = match entry {
            BathEntry::Logged(b) => {
                let r = &b.reactions;
                format!(
                    "{} comments, {}/{}/{} reactions",
                    b.comment_count, r.thumbs_up, r.heart, r.party
                )
            }
            BathEntry::Planned(b) => format!("planned: {}", b.description),
        };
        println!(
            "{:<12} {:<6} {:<16} {:<20} {}",
            common.date,
            common.time,
            truncate(&common.author.user_name, 16),
            truncate(&common.location, 20),
            common.id
        );
        println!("  {}", what);
    }
}

fn print_leaderboard(top: &[UserProfile]) {
    if top.is_empty() {
        println!("Ingen brukere ennå.");
        return;
    }

    println!("{:<4} {:<20} {:>8} {:>8}", "#", "Name", "Baths", "Target");
    println!("{}", "-".repeat(44));
    for (i, profile) in top.iter().enumerate() {
        println!(
            "{:<4} {:<20} {:>8} {:>8}",
            i + 1,
            truncate(&profile.name, 20),
            profile.current_baths,
            profile.target_baths
        );
    }
}

async fn watch(client: &Client, target: WatchTarget) -> anyhow::Result<()> {
    let store = client.backend.store.as_ref();
    match target {
        WatchTarget::Feed => {
            follow(client, feed_view(store), |c, entries| {
                c.print(entries, |e| print_feed(e))
            })
            .await
        }
        WatchTarget::Planned => {
            follow(client, planned_view(store), |c, planned| {
                c.print(planned, |p| {
                    for bath in p.iter() {
                        println!(
                            "{} {}  {} ({} påmeldte)",
                            bath.common.date,
                            bath.common.time,
                            bath.description,
                            bath.attendees.len()
                        );
                    }
                })
            })
            .await
        }
        WatchTarget::Leaderboard => {
            follow(client, leaderboard_view(store), |c, top| {
                c.print(top, |t| print_leaderboard(t))
            })
            .await
        }
    }
}

/// Print every snapshot of a view until Ctrl+C
async fn follow<T>(
    client: &Client,
    mut view: View<T>,
    render: impl Fn(&Client, &T) -> anyhow::Result<()>,
) -> anyhow::Result<()>
where
    T: Clone + Send + Unpin + 'static,
{
    loop {
        tokio::select! {
            next = view.next() => match next {
                Some(value) => {
                    render(client, &value)?;
                    println!();
                }
                None => return Ok(()),
            },
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

/// First value of a view, or its error
async fn first<T>(mut view: View<T>) -> anyhow::Result<T>
where
    T: Clone + Send + 'static,
{
    match view.next_result().await {
        Some(result) => Ok(result?),
        None => bail!("view closed before its first snapshot"),
    }
}

fn read_upload(path: &Path) -> anyhow::Result<Upload> {
    let data = std::fs::read(path).with_context(|| format!("reading {:?}", path))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    let upload = Upload::new(filename, data);
    Ok(match content_type(path) {
        Some(content_type) => upload.with_content_type(content_type),
        None => upload,
    })
}

fn content_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "heic" => Some("image/heic"),
        _ => None,
    }
}

fn progress(profile: &UserProfile) -> String {
    format!(
        "{}/{} ({:.0}%)",
        profile.current_baths,
        profile.target_baths,
        profile.progress_percent()
    )
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}
