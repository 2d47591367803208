//! Telegram side of the bridge: turns updates into `InboundEvent`s and sends
//! replies back through the bot.

use crate::dispatch::{Dispatcher, InboundEvent, MessageKind, Notifier};
use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::prelude::*;
use tracing::{debug, instrument};

/// Users are addressed by chat id, so replies land in the chat they wrote from.
pub fn external_user_id(msg: &Message) -> String {
    msg.chat.id.0.to_string()
}

pub fn classify(text: Option<&str>, has_photo: bool) -> MessageKind {
    match (text, has_photo) {
        (_, true) => MessageKind::Image,
        (Some(_), false) => MessageKind::Text,
        (None, false) => MessageKind::Other,
    }
}

/// An empty allow-list admits everyone.
pub fn is_allowed(allowed_users: &[i64], sender: Option<i64>) -> bool {
    allowed_users.is_empty() || sender.is_some_and(|id| allowed_users.contains(&id))
}

pub fn to_event(msg: &Message) -> InboundEvent {
    let text = msg.text().or_else(|| msg.caption());
    InboundEvent {
        user: external_user_id(msg),
        kind: classify(msg.text(), msg.photo().is_some()),
        text: text.unwrap_or_default().to_string(),
    }
}

#[instrument(skip_all)]
pub async fn handle_message(dispatcher: &Dispatcher, allowed_users: &[i64], msg: &Message) -> Result<()> {
    let sender = msg.from().map(|u| u.id.0 as i64);
    if !is_allowed(allowed_users, sender) {
        debug!(?sender, "ignoring message from user outside the allow-list");
        return Ok(());
    }
    dispatcher.submit(to_event(msg)).await
}

pub struct TelegramNotifier {
    bot: Bot,
}

impl TelegramNotifier {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, external_user_id: &str, text: &str) -> Result<()> {
        let chat: i64 = external_user_id
            .parse()
            .with_context(|| format!("not a telegram chat id: {external_user_id}"))?;
        self.bot.send_message(ChatId(chat), text).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_kinds() {
        assert_eq!(classify(Some("hi"), false), MessageKind::Text);
        assert_eq!(classify(None, true), MessageKind::Image);
        assert_eq!(classify(Some("caption"), true), MessageKind::Image);
        assert_eq!(classify(None, false), MessageKind::Other);
    }

    #[test]
    fn allow_list() {
        assert!(is_allowed(&[], None));
        assert!(is_allowed(&[], Some(5)));
        assert!(is_allowed(&[5, 6], Some(6)));
        assert!(!is_allowed(&[5], Some(7)));
        assert!(!is_allowed(&[5], None));
    }
}
