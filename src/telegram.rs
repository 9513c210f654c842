//! Telegram client using teloxide.

use std::time::Instant;

use teloxide::prelude::*;
use teloxide::types::{ChatAction, InlineKeyboardButton, InlineKeyboardMarkup, MessageId};
use tracing::warn;

use crate::agent::AgentDescriptor;
use crate::agent::service::ConversationStatus;
use crate::agent::session::format_age;

/// Telegram's limit on message text length, in UTF-16 code units.
const MAX_MESSAGE_UNITS: usize = 4096;

/// Callback data prefix for agent selection buttons.
pub const SELECT_AGENT_PREFIX: &str = "select_agent:";

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    /// Send plain text, split across several messages if too long.
    pub async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<(), String> {
        for chunk in split_message(text, MAX_MESSAGE_UNITS) {
            self.bot.send_message(chat_id, chunk).await.map_err(|e| {
                let msg = format!("Failed to send: {e}");
                warn!("{}", msg);
                msg
            })?;
        }
        Ok(())
    }

    /// Send the agent menu: one button per agent type.
    pub async fn send_agent_menu(
        &self,
        chat_id: ChatId,
        current: Option<&str>,
        agents: &[AgentDescriptor],
    ) -> Result<(), String> {
        let text = format!("Current agent: {}\nAvailable agents:", current.unwrap_or("None"));
        self.bot
            .send_message(chat_id, text)
            .reply_markup(agent_keyboard(agents))
            .await
            .map_err(|e| {
                let msg = format!("Failed to send agent menu: {e}");
                warn!("{}", msg);
                msg
            })?;
        Ok(())
    }

    /// Replace the text of a message the bot sent (drops its keyboard).
    pub async fn edit_text(&self, chat_id: ChatId, message_id: MessageId, text: &str) -> Result<(), String> {
        self.bot
            .edit_message_text(chat_id, message_id, text)
            .await
            .map_err(|e| {
                let msg = format!("Failed to edit message: {e}");
                warn!("{}", msg);
                msg
            })?;
        Ok(())
    }

    /// Show "typing..." while the agent works.
    pub async fn send_typing(&self, chat_id: ChatId) {
        if let Err(e) = self.bot.send_chat_action(chat_id, ChatAction::Typing).await {
            warn!("Failed to send typing action: {e}");
        }
    }

    /// Acknowledge a button press so the client stops its spinner.
    pub async fn answer_callback(&self, query: &CallbackQuery) {
        if let Err(e) = self.bot.answer_callback_query(query.id.clone()).await {
            warn!("Failed to answer callback query: {e}");
        }
    }
}

fn agent_keyboard(agents: &[AgentDescriptor]) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(agents.iter().map(|agent| {
        vec![InlineKeyboardButton::callback(
            agent.name.clone(),
            format!("{}{}", SELECT_AGENT_PREFIX, agent.name),
        )]
    }))
}

/// Agent type named by a `select_agent:<type>` callback payload.
pub fn parse_agent_selection(data: &str) -> Option<&str> {
    data.strip_prefix(SELECT_AGENT_PREFIX)
        .map(str::trim)
        .filter(|name| !name.is_empty())
}

/// Describe what a conversation is bound to, for `/status`.
pub fn format_status(status: &ConversationStatus, now: Instant) -> String {
    if let Some(agent_type) = &status.awaiting_url_for {
        return format!("Waiting for a URL for the {} agent.", agent_type);
    }
    let Some(session) = &status.session else {
        return "No active agent. Use /agents to pick one.".to_string();
    };

    let mut lines = vec![
        format!("Agent: {}", session.agent_type),
        format!("Session: {}", session.session_id),
        format!(
            "Started: {} ({} ago)",
            session.created_wall.format("%Y-%m-%d %H:%M UTC"),
            format_age(now.saturating_duration_since(session.created_at))
        ),
        format!("Idle: {}", format_age(session.idle_for(now))),
    ];
    for (key, value) in &session.metadata {
        lines.push(format!("{}: {}", key, value));
    }
    lines.join("\n")
}

/// Length of `text` as Telegram counts it (UTF-16 code units).
pub fn utf16_len(text: &str) -> usize {
    text.chars().map(char::len_utf16).sum()
}

/// Split text into chunks of at most `max_units` UTF-16 units, preferring line breaks.
pub fn split_message(text: &str, max_units: usize) -> Vec<String> {
    if text.is_empty() {
        return vec![String::new()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split_inclusive('\n') {
        let line_len = utf16_len(line);
        if current_len + line_len <= max_units {
            current.push_str(line);
            current_len += line_len;
            continue;
        }
        if !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        // A single line longer than the limit is cut on char boundaries.
        for c in line.chars() {
            let width = c.len_utf16();
            if current_len + width > max_units && !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            current.push(c);
            current_len += width;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
