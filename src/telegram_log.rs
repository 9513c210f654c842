//! Mirrors log events into a Telegram chat.

use std::fmt::Write as _;
use std::time::Duration;

use teloxide::prelude::*;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

use crate::telegram::utf16_len;

const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const MAX_BATCH_LINES: usize = 50;
/// Leaves room for the "..." marker under Telegram's 4096-unit limit.
const MAX_LOG_UNITS: usize = 4000;

struct LogLine {
    level: Level,
    text: String,
}

impl LogLine {
    fn is_urgent(&self) -> bool {
        self.level <= Level::WARN
    }

    fn render(&self) -> String {
        match self.level {
            Level::ERROR => format!("❌ {}", self.text),
            Level::WARN => format!("⚠️ {}", self.text),
            _ => self.text.clone(),
        }
    }
}

/// Layer that forwards INFO and above to a chat. WARN/ERROR go out at once,
/// INFO is batched.
pub struct TelegramLogLayer {
    tx: mpsc::UnboundedSender<LogLine>,
}

impl TelegramLogLayer {
    /// Must be called from within a tokio runtime.
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(forward(bot, chat_id, rx));
        Self { tx }
    }
}

async fn forward(bot: Bot, chat_id: ChatId, mut rx: mpsc::UnboundedReceiver<LogLine>) {
    let mut batch: Vec<String> = Vec::new();
    let mut ticker = tokio::time::interval(FLUSH_INTERVAL);

    loop {
        tokio::select! {
            line = rx.recv() => match line {
                Some(line) if line.is_urgent() => send(&bot, chat_id, &line.render()).await,
                Some(line) => {
                    batch.push(line.render());
                    if batch.len() >= MAX_BATCH_LINES {
                        send(&bot, chat_id, &batch.join("\n")).await;
                        batch.clear();
                    }
                }
                None => break,
            },
            _ = ticker.tick() => {
                if !batch.is_empty() {
                    send(&bot, chat_id, &batch.join("\n")).await;
                    batch.clear();
                }
            }
        }
    }
}

async fn send(bot: &Bot, chat_id: ChatId, text: &str) {
    // Logging through tracing here would feed back into this layer.
    if let Err(e) = bot.send_message(chat_id, truncate(text, MAX_LOG_UNITS)).await {
        eprintln!("Failed to send log to Telegram: {e}");
    }
}

/// Cut `text` to at most `max_units` UTF-16 units, marking the cut with "...".
fn truncate(text: &str, max_units: usize) -> String {
    if utf16_len(text) <= max_units {
        return text.to_string();
    }
    let mut truncated = String::new();
    let mut units = 0;
    for c in text.chars() {
        units += c.len_utf16();
        if units > max_units {
            break;
        }
        truncated.push(c);
    }
    truncated.push_str("...");
    truncated
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

impl<S: Subscriber> Layer<S> for TelegramLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > Level::INFO {
            return;
        }
        // teloxide's own request logs would echo every forwarded line.
        if event.metadata().target().starts_with("teloxide") {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let line = LogLine {
            level,
            text: format!("{}{}", visitor.message, visitor.fields),
        };
        if self.tx.send(line).is_err() {
            eprintln!("Log channel closed, message dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }

    #[test]
    fn test_truncate_counts_utf16_units() {
        let text = "🔥".repeat(MAX_LOG_UNITS);
        let truncated = truncate(&text, MAX_LOG_UNITS);
        assert!(utf16_len(&truncated) <= 4096);
        assert_eq!(truncated.chars().filter(|&c| c == '🔥').count(), MAX_LOG_UNITS / 2);
        assert_eq!(truncate("a🔥b", 2), "a...");
    }

    #[test]
    fn test_levels() {
        let warn = LogLine { level: Level::WARN, text: "disk".to_string() };
        let info = LogLine { level: Level::INFO, text: "ok".to_string() };
        assert!(warn.is_urgent());
        assert!(!info.is_urgent());
        assert_eq!(warn.render(), "⚠️ disk");
        assert_eq!(info.render(), "ok");
    }
}
