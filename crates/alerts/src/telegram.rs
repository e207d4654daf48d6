//! Telegram bot handlers.

use crate::sink::{DeliveryError, NotificationSink};
use crate::state::SharedState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pricewatch_core::{
    format_duration, parse_duration, Exchange, InstrumentKey, UpsertOutcome, ValidationError,
    WatchLimits, WatchSpec,
};
use pricewatch_engine::PriceChange;
use pricewatch_feeds::PriceSource;
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use teloxide::utils::command::BotCommands;
use teloxide::utils::html;
use teloxide::{ApiError, RequestError};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum TelegramError {
    #[error("Telegram API error: {0}")]
    Api(#[from] RequestError),
}

/// Bot commands.
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "Start the bot and register for alerts")]
    Start,
    #[command(
        description = "Add or update a watch. Usage: /watch <exchange> <symbol> <threshold%> <period> [cooldown]"
    )]
    Watch(String),
    #[command(description = "Remove a watch. Usage: /unwatch <exchange> <symbol>")]
    Unwatch(String),
    #[command(description = "List your watches")]
    List,
    #[command(description = "Show the current price. Usage: /price <exchange> <symbol>")]
    Price(String),
    #[command(description = "Show help")]
    Help,
}

const WATCH_USAGE: &str = "Usage: /watch <exchange> <symbol> <threshold%> <period> [cooldown]\n\
                           Example: /watch bybit SOLUSDT 2 5m 10m";
const INSTRUMENT_USAGE: &str = "Usage: /<command> <exchange> <symbol>\nExample: binance BTCUSDT";

/// Why a command's arguments were rejected.
#[derive(Error, Debug, PartialEq)]
pub enum CommandError {
    #[error("{0}")]
    Usage(&'static str),
    #[error("Unknown exchange '{0}'. Supported: binance, bybit, coinbase, gateio, upbit")]
    UnknownExchange(String),
    #[error("Invalid duration '{0}'. Use e.g. 30s, 5m, 1h")]
    BadDuration(String),
    #[error("Invalid threshold '{0}'")]
    BadThreshold(String),
    #[error("{0}")]
    Invalid(#[from] ValidationError),
}

/// Parse `<exchange> <symbol>`.
pub fn parse_instrument_args(args: &str) -> Result<InstrumentKey, CommandError> {
    let parts: Vec<&str> = args.split_whitespace().collect();
    let [exchange, symbol] = parts.as_slice() else {
        return Err(CommandError::Usage(INSTRUMENT_USAGE));
    };
    let exchange = Exchange::from_name(exchange)
        .ok_or_else(|| CommandError::UnknownExchange(exchange.to_string()))?;
    Ok(InstrumentKey::new(exchange, symbol))
}

/// Parse `<exchange> <symbol> <threshold%> <period> [cooldown]` into a
/// validated spec. A missing cooldown defaults to the period.
pub fn parse_watch_args(args: &str, limits: &WatchLimits) -> Result<WatchSpec, CommandError> {
    let parts: Vec<&str> = args.split_whitespace().collect();
    if parts.len() < 4 || parts.len() > 5 {
        return Err(CommandError::Usage(WATCH_USAGE));
    }

    let instrument = parse_instrument_args(&format!("{} {}", parts[0], parts[1]))?;
    let raw_threshold = parts[2].trim_end_matches('%');
    let threshold_pct = raw_threshold
        .parse::<f64>()
        .map_err(|_| CommandError::BadThreshold(parts[2].to_string()))?;
    let period =
        parse_duration(parts[3]).ok_or_else(|| CommandError::BadDuration(parts[3].to_string()))?;
    let cooldown = match parts.get(4) {
        Some(raw) => parse_duration(raw).ok_or_else(|| CommandError::BadDuration(raw.to_string()))?,
        None => period,
    };

    Ok(WatchSpec::new(instrument, threshold_pct, period, cooldown, limits)?)
}

/// Telegram delivery for fired alerts.
#[derive(Clone)]
pub struct TelegramSink {
    bot: Bot,
}

impl TelegramSink {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

/// Errors after which the chat id can never receive a message again.
fn classify(err: RequestError) -> DeliveryError {
    match err {
        RequestError::Api(
            ApiError::BotBlocked
            | ApiError::ChatNotFound
            | ApiError::UserDeactivated
            | ApiError::BotKicked
            | ApiError::BotKickedFromSupergroup
            | ApiError::CantInitiateConversation
            | ApiError::CantTalkWithBots,
        ) => DeliveryError::RecipientGone(err.to_string()),
        // The group became a supergroup under a new id; the old one is dead.
        RequestError::MigrateToChatId(_) => DeliveryError::RecipientGone(err.to_string()),
        other => DeliveryError::Transient(other.to_string()),
    }
}

#[async_trait]
impl NotificationSink for TelegramSink {
    async fn send(&self, owner_id: &str, message: &str) -> Result<(), DeliveryError> {
        let chat_id: i64 = owner_id
            .parse()
            .map_err(|_| DeliveryError::RecipientGone(format!("invalid chat id {}", owner_id)))?;
        self.bot
            .send_message(ChatId(chat_id), message)
            .parse_mode(ParseMode::Html)
            .await
            .map_err(classify)?;
        Ok(())
    }
}

/// Telegram command handler: maps chat commands onto registry operations.
pub struct TelegramBot {
    bot: Bot,
    state: SharedState,
    source: Arc<dyn PriceSource>,
    limits: WatchLimits,
}

impl TelegramBot {
    pub fn new(
        bot: Bot,
        state: SharedState,
        source: Arc<dyn PriceSource>,
        limits: WatchLimits,
    ) -> Self {
        Self {
            bot,
            state,
            source,
            limits,
        }
    }

    /// Run the bot command handler.
    pub async fn run(self: Arc<Self>) {
        let bot = self.bot.clone();
        let handler = Update::filter_message().filter_command::<Command>().endpoint(
            move |bot: Bot, msg: Message, cmd: Command| {
                let this = Arc::clone(&self);
                async move { this.handle_command(bot, msg, cmd).await }
            },
        );

        Dispatcher::builder(bot, handler)
            .build()
            .dispatch()
            .await;
    }

    async fn handle_command(
        &self,
        bot: Bot,
        msg: Message,
        cmd: Command,
    ) -> Result<(), TelegramError> {
        let chat_id = msg.chat.id.to_string();

        let reply = match cmd {
            Command::Start => {
                let mut state = self.state.lock().await;
                if let Err(e) = state.registry.ensure_subscriber(&chat_id).await {
                    warn!(owner = chat_id.as_str(), error = %e, "Registration not yet persisted");
                }
                format!(
                    "Welcome to the price watcher!\n\n\
                     You will get an alert when a watched price moves by your threshold.\n\
                     {}\n\nUse /help to see available commands.",
                    WATCH_USAGE
                )
            }

            Command::Watch(args) => match parse_watch_args(&args, &self.limits) {
                Ok(spec) => {
                    let summary = describe_watch(&spec);
                    let mut state = self.state.lock().await;
                    match state.registry.upsert(&chat_id, spec).await {
                        Ok(UpsertOutcome::Created) => format!("Watch added: {}", summary),
                        Ok(UpsertOutcome::Updated) => format!("Watch updated: {}", summary),
                        Err(_) => format!(
                            "Watch active: {}\n(saving to disk failed, will retry)",
                            summary
                        ),
                    }
                }
                Err(e) => e.to_string(),
            },

            Command::Unwatch(args) => match parse_instrument_args(&args) {
                Ok(instrument) => {
                    let mut state = self.state.lock().await;
                    match state.registry.remove(&chat_id, &instrument).await {
                        Ok(Some(_)) | Err(_) => format!("Stopped watching {}", instrument),
                        Ok(None) => format!("You are not watching {}", instrument),
                    }
                }
                Err(e) => e.to_string(),
            },

            Command::List => {
                let state = self.state.lock().await;
                let watches = state.registry.list(&chat_id);
                if watches.is_empty() {
                    "You have no watches. Add one with /watch".to_string()
                } else {
                    let lines: Vec<String> = watches.iter().map(describe_watch).collect();
                    format!("Your watches:\n\n{}", lines.join("\n"))
                }
            }

            Command::Price(args) => match parse_instrument_args(&args) {
                Ok(instrument) => match self.source.fetch(&instrument).await {
                    Ok(price) => format!("{} = {}", instrument, format_price(price)),
                    Err(e) => {
                        warn!(instrument = %instrument, error = %e, "One-shot price fetch failed");
                        format!("Could not fetch {}: {}", instrument, e)
                    }
                },
                Err(e) => e.to_string(),
            },

            Command::Help => Command::descriptions().to_string(),
        };

        info!(owner = chat_id.as_str(), "Command handled");
        bot.send_message(msg.chat.id, reply).await?;
        Ok(())
    }
}

fn describe_watch(spec: &WatchSpec) -> String {
    format!(
        "{} ±{}% over {} (cooldown {})",
        spec.instrument,
        spec.threshold_pct,
        format_duration(spec.period),
        format_duration(spec.cooldown)
    )
}

/// Format price with appropriate precision based on magnitude.
fn format_price(price: f64) -> String {
    if price == 0.0 {
        return "0".to_string();
    }
    let abs_price = price.abs();
    if abs_price >= 1000.0 {
        format!("{:.2}", price)
    } else if abs_price >= 1.0 {
        format!("{:.4}", price)
    } else if abs_price >= 0.01 {
        format!("{:.6}", price)
    } else {
        format!("{:.10}", price)
    }
}

/// Format a fired watch as an alert message.
pub fn format_alert_message(
    instrument: &InstrumentKey,
    change: &PriceChange,
    period: Duration,
    now: DateTime<Utc>,
) -> String {
    let emoji = if change.percent >= 0.0 { "📈" } else { "📉" };

    format!(
        "{} <b>{}</b> ({}) moved {:+.2}% in {}\n\
         Was: {}\n\
         Now: {}\n\n\
         ⏰ {}",
        emoji,
        html::escape(instrument.symbol()),
        instrument.exchange,
        change.percent,
        format_duration(period),
        format_price(change.past_price),
        format_price(change.latest_price),
        now.format("%Y-%m-%d %H:%M:%S UTC")
    )
}
