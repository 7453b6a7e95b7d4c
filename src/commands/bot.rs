//! Subscription bot (polling mode)
//!
//! Users register with /start, subscribers run collections with /parse and
//! receive the exported files. Collection jobs share one Telegram session
//! and run one at a time.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{Local, Utc};
use teloxide::dispatching::UpdateFilterExt;
use teloxide::prelude::*;
use teloxide::types::{InputFile, Message};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::admin::{access_text, admin_text, plans_text, subscription_text, user_stats_text};
use super::collect::{build_request, collect_cached};
use crate::cache::ResultCache;
use crate::collector::{Collector, Method};
use crate::config::Config;
use crate::export::{self, ExportFormat};
use crate::session::{self, SessionLock, TelegramClient};
use crate::subscription::{open_or_reset, SubscriptionStore};
use crate::telegram::TelegramSource;

/// Pause between broadcast messages to stay below bot API limits.
const BROADCAST_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    Start,
    Help,
    Buy,
    My,
    Parse {
        channel: String,
        methods: Vec<Method>,
        limit: Option<usize>,
    },
    Stats,
    Admin,
    Grant { user_id: i64, plan: String },
    Extend { user_id: i64, days: i64 },
    Broadcast(String),
    Logout,
}

impl BotCommand {
    pub fn is_admin_only(&self) -> bool {
        matches!(
            self,
            BotCommand::Admin
                | BotCommand::Grant { .. }
                | BotCommand::Extend { .. }
                | BotCommand::Broadcast(_)
                | BotCommand::Logout
        )
    }

    /// `None` for text that is not a command; `Some(Err)` for malformed arguments.
    pub fn parse(text: &str) -> Option<std::result::Result<Self, String>> {
        let text = text.trim();
        let rest = text.strip_prefix('/')?;
        let (head, args) = match rest.split_once(char::is_whitespace) {
            Some((head, args)) => (head, args.trim()),
            None => (rest, ""),
        };
        // `/cmd@bot_name` in groups
        let name = head.split('@').next().unwrap_or(head).to_lowercase();
        let parts: Vec<&str> = args.split_whitespace().collect();

        let command = match name.as_str() {
            "start" => Ok(BotCommand::Start),
            "help" => Ok(BotCommand::Help),
            "buy" => Ok(BotCommand::Buy),
            "my" => Ok(BotCommand::My),
            "stats" => Ok(BotCommand::Stats),
            "admin" => Ok(BotCommand::Admin),
            "logout" => Ok(BotCommand::Logout),
            "parse" => parse_parse_args(&parts),
            "grant" => match parts.as_slice() {
                [user, plan] => user
                    .parse()
                    .map(|user_id| BotCommand::Grant {
                        user_id,
                        plan: plan.to_string(),
                    })
                    .map_err(|_| "usage: /grant <user_id> <plan>".to_string()),
                _ => Err("usage: /grant <user_id> <plan>".to_string()),
            },
            "extend" => match parts.as_slice() {
                [user, days] => match (user.parse(), days.parse()) {
                    (Ok(user_id), Ok(days)) => Ok(BotCommand::Extend { user_id, days }),
                    _ => Err("usage: /extend <user_id> <days>".to_string()),
                },
                _ => Err("usage: /extend <user_id> <days>".to_string()),
            },
            "broadcast" if args.is_empty() => Err("usage: /broadcast <text>".to_string()),
            "broadcast" => Ok(BotCommand::Broadcast(args.to_string())),
            _ => return None,
        };
        Some(command)
    }
}

fn parse_parse_args(parts: &[&str]) -> std::result::Result<BotCommand, String> {
    const USAGE: &str = "usage: /parse <channel> [methods|all] [limit]";
    let Some(channel) = parts.first() else {
        return Err(USAGE.to_string());
    };
    let mut methods = Method::ALL.to_vec();
    let mut limit = None;
    for arg in &parts[1..] {
        if let Ok(n) = arg.parse::<usize>() {
            limit = Some(n);
        } else {
            methods = Method::parse_list(arg).map_err(|e| format!("{} ({})", e, USAGE))?;
        }
    }
    Ok(BotCommand::Parse {
        channel: channel.to_string(),
        methods,
        limit,
    })
}

pub fn help_text() -> String {
    [
        "Member collector bot",
        "",
        "/parse <channel> [methods] [limit] - collect members",
        "  channel: @name, t.me/name or an invite link t.me/+hash",
        "  methods: participants,messages,comments,reactions or all",
        "/my - subscription status",
        "/buy - plans",
        "/stats - your jobs",
        "/help - this text",
    ]
    .join("\n")
}

/// Connected collector client plus the session lock it holds.
struct Connection {
    _lock: SessionLock,
    client: TelegramClient,
}

struct BotState {
    config: Config,
    store: SubscriptionStore,
    cache: ResultCache,
    connection: Mutex<Option<Connection>>,
}

pub async fn run(config: Config) -> Result<()> {
    if config.bot_token.is_empty() {
        return Err(anyhow!("BOT_TOKEN is not set"));
    }
    config.validate_telegram()?;

    let store = open_or_reset(config.store_path())?;
    let removed = store.cleanup_jobs(Utc::now())?;
    if removed > 0 {
        info!("Dropped {} finished jobs older than a week", removed);
    }
    let cache = ResultCache::from_config(&config);
    if let Err(err) = cache.purge_expired() {
        warn!("Cache purge failed: {}", err);
    }

    let bot = Bot::new(config.bot_token.clone());
    let state = Arc::new(BotState {
        cache,
        store,
        config,
        connection: Mutex::new(None),
    });

    info!("Bot started, admins: {:?}", state.config.admin_ids);

    let handler = dptree::entry().branch(Update::filter_message().endpoint({
        move |bot: Bot, msg: Message, state: Arc<BotState>| async move {
            if let Err(err) = handle_message(&bot, &state, &msg).await {
                error!("Handler error: {err:?}");
                let _ = bot
                    .send_message(msg.chat.id, "Internal error, try again later")
                    .await;
            }
            Ok::<_, teloxide::RequestError>(())
        }
    }));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_message(bot: &Bot, state: &BotState, msg: &Message) -> Result<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let user_id = user.id.0 as i64;
    let is_admin = state.config.is_admin(user_id);

    let command = match BotCommand::parse(text) {
        None => {
            bot.send_message(msg.chat.id, "Unknown command, see /help").await?;
            return Ok(());
        }
        Some(Err(usage)) => {
            bot.send_message(msg.chat.id, usage).await?;
            return Ok(());
        }
        Some(Ok(command)) => command,
    };

    if command.is_admin_only() && !is_admin {
        warn!("User {} tried admin command {:?}", user_id, command);
        bot.send_message(msg.chat.id, "This command is for administrators")
            .await?;
        return Ok(());
    }

    let now = Utc::now();
    let reply = match command {
        BotCommand::Start => {
            let created =
                state
                    .store
                    .ensure_user(user_id, user.username.as_deref(), &user.first_name, now)?;
            let greeting = if created {
                "Welcome! A trial subscription is active."
            } else {
                "Welcome back!"
            };
            format!("{}\n\n{}", greeting, help_text())
        }
        BotCommand::Help => help_text(),
        BotCommand::Buy => plans_text(),
        BotCommand::My => {
            let access = state.store.check_access(user_id, is_admin, now)?;
            access_text(&access, is_admin)
        }
        BotCommand::Stats => {
            let mut text = user_stats_text(&state.store.user_stats(user_id)?);
            if is_admin {
                text.push_str("\n\n");
                text.push_str(&admin_text(&state.store.stats(now)?));
            }
            text
        }
        BotCommand::Admin => admin_text(&state.store.stats(now)?),
        BotCommand::Grant { user_id: target, plan } => {
            match state.store.grant(target, &plan, now) {
                Ok(subscription) => format!("Granted {}", subscription_text(&subscription)),
                Err(err) => err.to_string(),
            }
        }
        BotCommand::Extend { user_id: target, days } => {
            match state.store.extend(target, days, now) {
                Ok(subscription) => format!("Extended: {}", subscription_text(&subscription)),
                Err(err) => err.to_string(),
            }
        }
        BotCommand::Broadcast(text) => broadcast(bot, state, &text).await?,
        BotCommand::Logout => {
            state.connection.lock().await.take();
            session::logout(&state.config).await?;
            "Collector session logged out; run init-session to sign in again".to_string()
        }
        BotCommand::Parse {
            channel,
            methods,
            limit,
        } => {
            let access = state.store.check_access(user_id, is_admin, now)?;
            if !access.is_granted() {
                access_text(&access, is_admin)
            } else {
                run_parse(bot, state, msg.chat.id, user_id, &channel, methods, limit).await?
            }
        }
    };

    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

async fn broadcast(bot: &Bot, state: &BotState, text: &str) -> Result<String> {
    let ids = state.store.user_ids()?;
    let mut sent = 0;
    for id in &ids {
        match bot.send_message(ChatId(*id), text).await {
            Ok(_) => sent += 1,
            Err(err) => warn!("Broadcast to {} failed: {}", id, err),
        }
        tokio::time::sleep(BROADCAST_DELAY).await;
    }
    Ok(format!("Broadcast delivered to {} of {} users", sent, ids.len()))
}

async fn run_parse(
    bot: &Bot,
    state: &BotState,
    chat_id: ChatId,
    user_id: i64,
    channel: &str,
    methods: Vec<Method>,
    limit: Option<usize>,
) -> Result<String> {
    let limit = limit.unwrap_or(state.config.collector.max_participants);
    let request = match build_request(channel, None, methods, limit) {
        Ok(request) => request,
        Err(err) => return Ok(err.to_string()),
    };

    let method_names: Vec<String> = request.methods.iter().map(|m| m.to_string()).collect();
    let job = state
        .store
        .record_job(user_id, &request.target.to_string(), &method_names, Utc::now())?;
    bot.send_message(
        chat_id,
        format!("Collecting from {} via {}...", request.target, method_names.join(", ")),
    )
    .await?;

    // One job at a time on the shared session.
    let mut connection = state.connection.lock().await;
    if connection.is_none() {
        let lock = SessionLock::acquire(&state.config)?;
        let client = session::connect(&state.config).await?;
        *connection = Some(Connection {
            _lock: lock,
            client,
        });
    }
    let client = match connection.as_ref() {
        Some(conn) => conn.client.client.clone(),
        None => return Err(anyhow!("collector session unavailable")),
    };

    let collector = Collector::new(TelegramSource::new(client), state.config.collector.clone());
    let outcome = collect_cached(&collector, &state.cache, &request).await;
    drop(connection);

    let collected = match outcome {
        Ok(collected) => collected,
        Err(err) => {
            state
                .store
                .finish_job(job, Err(err.to_string()), Utc::now())?;
            return Ok(err.user_message());
        }
    };
    let result = &collected.result;

    let base = export::base_file_name(&request.target.label(), Local::now());
    let dir = state.config.export_dir().join(user_id.to_string());
    let files = match export::export(result, ExportFormat::Txt, &dir, &base).and_then(|mut txt| {
        txt.extend(export::export(result, ExportFormat::Csv, &dir, &base)?);
        Ok(txt)
    }) {
        Ok(files) => files,
        Err(err) => {
            state
                .store
                .finish_job(job, Err(err.to_string()), Utc::now())?;
            return Err(err.into());
        }
    };

    send_files(bot, chat_id, &files, result.members.len()).await?;
    state.store.finish_job(
        job,
        Ok((
            result.members.len(),
            files.first().map(|p| p.display().to_string()),
        )),
        Utc::now(),
    )?;
    export::cleanup_files(&files);

    let mut summary = export::stats_summary(
        &result.stats,
        Duration::from_millis(result.stats.duration_ms),
    );
    if collected.from_cache {
        summary.push_str("\n(served from cache)");
    }
    Ok(summary)
}

async fn send_files(bot: &Bot, chat_id: ChatId, files: &[PathBuf], count: usize) -> Result<()> {
    for file in files {
        bot.send_document(chat_id, InputFile::file(file.clone()))
            .caption(format!("{} members", count))
            .await?;
    }
    Ok(())
}
