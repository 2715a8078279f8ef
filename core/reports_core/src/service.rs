//! Report commands, the chat watcher and the login notifier.
//!
//! Every entry point returns the [`Effect`]s the host should apply. Config and
//! settings are explicit values swapped by `/rsettings`; per-session state is
//! keyed by the host's session id and dropped on logout.

use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::{
    command::{self, Command, CAP_CHECK},
    config::{Config, ConfigError, CONFIG_FILE_NAME},
    host::{Account, AccountDirectory, Effect, Replies, SessionId, Tone},
    pagination::{self, PageError},
    report::{self, Position, Report, ReportStatus},
    settings::{ReportSettings, SettingsError, SETTINGS_FILE_NAME},
    store::{ReportStore, StoreError},
};

const NO_REASON: &str = "No reason defined";

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Where `/rsettings` reads from.
#[derive(Clone, Debug)]
pub struct DataPaths {
    pub config: PathBuf,
    pub settings: PathBuf,
}

impl DataPaths {
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        DataPaths {
            config: dir.join(CONFIG_FILE_NAME),
            settings: dir.join(SETTINGS_FILE_NAME),
        }
    }
}

/// Host-provided description of a session at login.
#[derive(Clone, Debug, Deserialize)]
pub struct Login {
    #[serde(default)]
    pub account: Option<Account>,
    pub name: String,
    #[serde(default)]
    pub capabilities: HashSet<String>,
    #[serde(default)]
    pub console: bool,
    #[serde(default)]
    pub position: Position,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct LastViewed {
    report_id: i64,
    position: Position,
}

#[derive(Clone, Debug)]
struct SessionState {
    account: Option<Account>,
    name: String,
    capabilities: HashSet<String>,
    console: bool,
    position: Position,
    last_viewed: Option<LastViewed>,
}

impl SessionState {
    fn can(&self, capability: &str) -> bool {
        command::has_capability(&self.capabilities, capability)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BatchOp {
    Delete,
    Handle,
}

impl BatchOp {
    fn usage(self) -> &'static str {
        match self {
            BatchOp::Delete => "Invalid usage. /dreports [id] <id2 id3 id4 ... idn>",
            BatchOp::Handle => "Invalid usage. /hreports [id] <id2 id3 id4 ... idn>",
        }
    }

    fn past_tense(self) -> &'static str {
        match self {
            BatchOp::Delete => "deleted",
            BatchOp::Handle => "updated",
        }
    }
}

/// Result of a `/dreports` or `/hreports` run, item by item.
#[derive(Debug, Default)]
struct BatchOutcome {
    succeeded: Vec<i64>,
    failed: Vec<i64>,
    skipped: Vec<String>,
}

#[derive(Clone)]
pub struct ReportService {
    store: ReportStore,
    accounts: Arc<dyn AccountDirectory>,
    config: Arc<Mutex<Config>>,
    settings: Arc<Mutex<ReportSettings>>,
    sessions: Arc<Mutex<HashMap<SessionId, SessionState>>>,
    paths: DataPaths,
}

impl ReportService {
    pub fn new(
        store: ReportStore,
        accounts: Arc<dyn AccountDirectory>,
        config: Config,
        settings: ReportSettings,
        paths: DataPaths,
    ) -> Self {
        ReportService {
            store,
            accounts,
            config: Arc::new(Mutex::new(config)),
            settings: Arc::new(Mutex::new(settings)),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            paths,
        }
    }

    pub fn store(&self) -> &ReportStore {
        &self.store
    }

    pub async fn config(&self) -> Config {
        self.config.lock().await.clone()
    }

    pub async fn settings(&self) -> ReportSettings {
        *self.settings.lock().await
    }

    // ========== Session events ==========

    /// Registers a session and, for staff, reports how much is waiting.
    pub async fn login(&self, session: SessionId, login: Login) -> Vec<Effect> {
        let state = SessionState {
            account: login.account,
            name: login.name,
            capabilities: login.capabilities,
            console: login.console,
            position: login.position,
            last_viewed: None,
        };
        let is_staff = state.can(CAP_CHECK);
        info!("session {session} logged in as {}", state.name);
        self.sessions.lock().await.insert(session, state);

        let mut replies = Replies::new(session);
        if is_staff {
            self.greet_staff(&mut replies).await;
        }
        replies.into_effects()
    }

    pub async fn logout(&self, session: SessionId) -> bool {
        let removed = self.sessions.lock().await.remove(&session).is_some();
        if removed {
            info!("session {session} logged out");
        }
        removed
    }

    pub async fn update_position(&self, session: SessionId, position: Position) -> bool {
        match self.sessions.lock().await.get_mut(&session) {
            Some(state) => {
                state.position = position;
                true
            }
            None => false,
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    async fn greet_staff(&self, replies: &mut Replies) {
        let (unread, unhandled) = match self.store.status_counts().await {
            Ok(v) => v,
            Err(err) => {
                error!("status_counts failed: {err}");
                return;
            }
        };
        if unread > 0 {
            replies.warning(format!(
                "There are {unread} unread, and {unhandled} unhandled report{} to view. Use /checkreports",
                suffix(unhandled)
            ));
        }
    }

    /// Sends the first configured phrase warning the message contains to its speaker.
    pub async fn chat(&self, session: SessionId, text: &str) -> Vec<Effect> {
        if !self.sessions.lock().await.contains_key(&session) {
            return Vec::new();
        }
        let config = self.config.lock().await;
        let mut replies = Replies::new(session);
        if let Some(warning) = config.phrase_warnings.first_match(text) {
            replies.send(Tone::ChatWatch, format!("<From ChatWatch> {warning}"));
        }
        replies.into_effects()
    }

    // ========== Commands ==========

    /// Runs one command line for `session`.
    pub async fn execute(&self, session: SessionId, line: &str) -> Result<Vec<Effect>, ServiceError> {
        let caller = self
            .sessions
            .lock()
            .await
            .get(&session)
            .cloned()
            .ok_or(ServiceError::UnknownSession(session))?;

        let mut replies = Replies::new(session);
        let Some((name, args)) = command::parse_line(line) else {
            replies.error("Invalid command entered. Type /help for a list of valid commands.");
            return Ok(replies.into_effects());
        };
        if name.eq_ignore_ascii_case("help") {
            help(&caller, &args, &mut replies);
            return Ok(replies.into_effects());
        }
        let Some(spec) = command::lookup(&name) else {
            replies.error("Invalid command entered. Type /help for a list of valid commands.");
            return Ok(replies.into_effects());
        };
        if caller.console && !spec.allow_console {
            replies.error("You must use this command in-game.");
            return Ok(replies.into_effects());
        }
        if !caller.can(spec.capability) {
            warn!("{} tried to execute /{name} without {}", caller.name, spec.capability);
            replies.error("You do not have access to this command.");
            return Ok(replies.into_effects());
        }

        match spec.command {
            Command::Report => self.file_report(&caller, &args, &mut replies).await,
            Command::CheckReports => {
                self.check_reports(session, &caller, &args, &mut replies)
                    .await
            }
            Command::Teleport => self.teleport(session, &caller, &mut replies).await,
            Command::DeleteReports => {
                self.run_batch(BatchOp::Delete, &args, &mut replies).await;
            }
            Command::HandleReports => {
                self.run_batch(BatchOp::Handle, &args, &mut replies).await;
            }
            Command::ReloadSettings => match self.reload().await {
                Ok(()) => replies.success("Reloaded Reports.json and ReportSettings.txt"),
                Err(err) => {
                    error!("reload failed: {err}");
                    replies.error("Failed to reload settings. Please check logs for details");
                }
            },
            Command::Reseed => self.reseed(&mut replies).await,
        }
        Ok(replies.into_effects())
    }

    async fn file_report(&self, caller: &SessionState, args: &[String], replies: &mut Replies) {
        let Some(filer) = caller.account.as_ref() else {
            replies.error("You must be logged in to use this command.");
            return;
        };
        let Some(target) = args.first() else {
            replies.error("Invalid report. Usage: /report <player/reason> [reason]");
            return;
        };

        let mut matches = self.accounts.find_by_name(target);
        let (reported, message) = match matches.len() {
            0 => {
                let words: Vec<&str> = args
                    .iter()
                    .map(|a| a.as_str())
                    .filter(|a| !a.trim().is_empty())
                    .collect();
                if words.is_empty() {
                    replies.error("Invalid report. Usage: /report <player/reason> [reason]");
                    return;
                }
                (None, words.join(" "))
            }
            1 => {
                let reported = matches.remove(0);
                let message = if args.len() > 1 {
                    args[1..].join(" ")
                } else {
                    NO_REASON.to_string()
                };
                (Some(reported), message)
            }
            _ => {
                let names: Vec<&str> = matches.iter().map(|a| a.name.as_str()).collect();
                replies.error(format!(
                    "More than one match found -- unable to decide which is correct: {}",
                    names.join(", ")
                ));
                return;
            }
        };

        let now = OffsetDateTime::now_utc().unix_timestamp();
        let id = match self
            .store
            .insert(
                filer.id,
                reported.as_ref().map(|a| a.id),
                &message,
                caller.position,
                ReportStatus::Unread,
                now,
            )
            .await
        {
            Ok(id) => id,
            Err(err) => {
                error!("insert report by {} failed: {err}", filer.name);
                replies.error("Report was not successful. Please check logs for details");
                return;
            }
        };
        info!("report #{id} filed by {}", filer.name);

        match &reported {
            Some(account) => replies.success(format!("Successfully reported {}.", account.name)),
            None => replies.success("Successfully created report."),
        }
        replies.success(format!("Reason: {message}"));
        replies.success(format!(
            "Position: ({},{})",
            caller.position.x as i32, caller.position.y as i32
        ));

        let notice = match &reported {
            Some(account) => format!(
                "{} has reported {}. Use /creports {id} to view it.",
                caller.name, account.name
            ),
            None => format!(
                "{} has filed a report. Use /creports {id} to view it.",
                caller.name
            ),
        };
        let sessions = self.sessions.lock().await;
        for (sid, state) in sessions.iter() {
            if !state.console && state.can(CAP_CHECK) {
                replies.notify(*sid, Tone::Warning, notice.clone());
            }
        }
    }

    async fn check_reports(
        &self,
        session: SessionId,
        caller: &SessionState,
        args: &[String],
        replies: &mut Replies,
    ) {
        let mut reports = match self.store.fetch_all().await {
            Ok(v) => v,
            Err(err) => {
                error!("fetch_all failed: {err}");
                replies.error("Failed to load reports. Please check logs for details");
                return;
            }
        };
        if reports.is_empty() {
            replies.success("There are no reports to view.");
            return;
        }
        report::sort_for_display(&mut reports);
        let config = self.config().await;

        let Some(first) = args.first() else {
            self.send_page(&reports, 1, &config, replies).await;
            return;
        };

        if first.eq_ignore_ascii_case("page") {
            match pagination::parse_page_number(args.get(1).map(|s| s.as_str())) {
                Ok(page) => self.send_page(&reports, page, &config, replies).await,
                Err(msg) => replies.error(msg),
            }
            return;
        }

        let report = match first.parse::<i64>() {
            Ok(id) => match reports.iter().find(|r| r.id == id) {
                Some(r) => r.clone(),
                None => {
                    replies.error(format!("No report ID matched your search '{id}'"));
                    return;
                }
            },
            Err(_) => {
                let search = args.join(" ");
                let needle = search.to_lowercase();
                let matches: Vec<&Report> = reports
                    .iter()
                    .filter(|r| r.message.to_lowercase().contains(&needle))
                    .collect();
                match matches.as_slice() {
                    [] => {
                        replies.error(format!(
                            "No report messages matched your search '{search}'"
                        ));
                        return;
                    }
                    [only] => (*only).clone(),
                    many => {
                        let entries: Vec<String> =
                            many.iter().map(|r| r.list_entry(&config)).collect();
                        replies.error(format!(
                            "Multiple reports IDs found matching your query: {}",
                            entries.join(", ")
                        ));
                        replies.error("Use \"my query\" for items with spaces");
                        return;
                    }
                }
            }
        };

        self.show_report(session, caller, &report, &config, replies)
            .await;
    }

    async fn send_page(
        &self,
        reports: &[Report],
        page: usize,
        config: &Config,
        replies: &mut Replies,
    ) {
        let per_page = self.settings().await.reports_per_page;
        let entries: Vec<String> = reports.iter().map(|r| r.list_entry(config)).collect();
        match pagination::page_of(&entries, page, per_page) {
            Ok(page) => {
                replies.success(page.header);
                for line in page.lines {
                    replies.send(Tone::Info, line);
                }
                if let Some(footer) = page.footer {
                    replies.success(footer);
                }
            }
            Err(PageError::Empty) => replies.success("There are no reports to view."),
            Err(PageError::OutOfRange { requested, last }) => replies.error(format!(
                "Page {requested} does not exist. The last page is {last}."
            )),
        }
    }

    async fn show_report(
        &self,
        session: SessionId,
        caller: &SessionState,
        report: &Report,
        config: &Config,
        replies: &mut Replies,
    ) {
        let header = report.header(config);
        if !header.is_empty() {
            replies.warning(format!("----{header}-----"));
        }
        replies.success(format!("Report ID: #{}", report.id));
        if let Some(reported) = report.reported_user_id {
            replies.success(format!("Reported user: {}", self.account_name(reported)));
        }
        replies.success(format!(
            "Reported by: {} at position ({},{})",
            self.account_name(report.reporter_user_id),
            report.position.x,
            report.position.y
        ));
        replies.success(format!("Report reason: {}", report.message));
        if let Some(filed) = report
            .created_time
            .and_then(|t| OffsetDateTime::from_unix_timestamp(t).ok())
            .and_then(|t| t.format(&Rfc3339).ok())
        {
            replies.info(format!("Filed at: {filed}"));
        }

        if caller.console {
            replies.warning("Failed to assign a teleport for this report.");
            replies.warning("Please make sure you are logged in while using this command");
        } else {
            if let Some(state) = self.sessions.lock().await.get_mut(&session) {
                state.last_viewed = Some(LastViewed {
                    report_id: report.id,
                    position: report.position,
                });
            }
            replies.warning("Use /rteleport to move to the report location.");
        }

        if let Err(err) = self.store.mark_viewed(report.id).await {
            error!("mark_viewed #{} failed: {err}", report.id);
            replies.error("Failed to update the report state. Please check logs for details");
        }
    }

    fn account_name(&self, id: i64) -> String {
        self.accounts
            .name_of(id)
            .unwrap_or_else(|| format!("unknown account #{id}"))
    }

    async fn teleport(&self, session: SessionId, caller: &SessionState, replies: &mut Replies) {
        let Some(last) = caller.last_viewed else {
            replies.error("You have no report location to move to.");
            return;
        };
        self.update_position(session, last.position).await;
        replies.teleport(last.position);
        replies.success(format!(
            "You have been moved to the location of report #{}",
            last.report_id
        ));
    }

    async fn run_batch(&self, op: BatchOp, args: &[String], replies: &mut Replies) {
        if args.is_empty() {
            replies.error(op.usage());
            return;
        }

        let mut outcome = BatchOutcome::default();
        for token in args {
            let Ok(id) = token.parse::<i64>() else {
                replies.error(format!(
                    "{token} is not a valid report ID and has been skipped"
                ));
                outcome.skipped.push(token.clone());
                continue;
            };
            let result = match op {
                BatchOp::Delete => self.store.delete(id).await,
                BatchOp::Handle => self.store.set_status(id, ReportStatus::Handled).await,
            };
            match result {
                Ok(true) => outcome.succeeded.push(id),
                Ok(false) => outcome.failed.push(id),
                Err(err) => {
                    error!("{op:?} report #{id} failed: {err}");
                    outcome.failed.push(id);
                }
            }
        }

        if !outcome.failed.is_empty() {
            let ids: Vec<String> = outcome.failed.iter().map(|id| id.to_string()).collect();
            replies.error(format!(
                "The following reports failed to be {}: {}",
                op.past_tense(),
                ids.join(", ")
            ));
        }
        let n = outcome.succeeded.len();
        let verb = match op {
            BatchOp::Delete => "Deleted",
            BatchOp::Handle => "Updated",
        };
        replies.success(format!("{verb} {n} report{}.", suffix(n as i64)));
        info!(
            "{op:?}: {} ok, {} failed, {} skipped",
            n,
            outcome.failed.len(),
            outcome.skipped.len()
        );
    }

    async fn reseed(&self, replies: &mut Replies) {
        match self.store.is_empty().await {
            Ok(true) => {}
            Ok(false) => {
                replies.error("Your reports database is not empty! Cannot reseed.");
                return;
            }
            Err(err) => {
                error!("is_empty failed: {err}");
                replies.error("Reseed failed.");
                return;
            }
        }
        match self.store.reseed().await {
            Ok(()) => {
                info!("reports table reseeded");
                replies.success("Successfully reseeded the reports database.");
            }
            Err(StoreError::NotEmpty) => {
                replies.error("Your reports database is not empty! Cannot reseed.");
            }
            Err(err) => {
                error!("reseed failed: {err}");
                replies.error("Reseed failed.");
            }
        }
    }

    /// Re-reads both files and swaps them in. On error the previous values stay.
    pub async fn reload(&self) -> Result<(), ServiceError> {
        let config = Config::load_or_create(&self.paths.config)?;
        let settings = ReportSettings::load_or_create(&self.paths.settings)?;
        self.store
            .set_query_timeout(Duration::from_millis(settings.query_timeout_ms))
            .await?;
        *self.config.lock().await = config;
        *self.settings.lock().await = settings;
        info!("reloaded {} and {}", CONFIG_FILE_NAME, SETTINGS_FILE_NAME);
        Ok(())
    }
}

/// `/help` lists the commands the caller may run; `/help <command>` prints
/// that command's usage lines.
fn help(caller: &SessionState, args: &[String], replies: &mut Replies) {
    let usable = |spec: &command::CommandSpec| {
        caller.can(spec.capability) && (spec.allow_console || !caller.console)
    };

    if let Some(name) = args.first() {
        match command::lookup(name) {
            Some(spec) if usable(spec) => {
                for line in spec.help {
                    replies.info(*line);
                }
            }
            _ => replies.error(format!("No help available for \"{name}\".")),
        }
        return;
    }

    let names: Vec<&str> = command::COMMANDS
        .iter()
        .filter(|spec| usable(*spec))
        .map(|spec| spec.names[0])
        .collect();
    if names.is_empty() {
        replies.error("You do not have access to any report commands.");
        return;
    }
    replies.info(format!("Report commands: /{}", names.join(", /")));
    replies.info("Type /help <command> for more information.");
}

fn suffix(n: i64) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}
