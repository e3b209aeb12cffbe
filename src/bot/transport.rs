//! `Messenger` over the Telegram Bot API.

use crate::error::TransportError;
use crate::services::{MessageRef, Messenger, Reply};
use crate::state::ConversationId;
use async_trait::async_trait;
use teloxide::adaptors::Throttle;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{
    CallbackQueryId, FileId, InlineKeyboardButton, InlineKeyboardMarkup, MessageId, ThreadId,
};
use tracing::debug;

pub type ThrottledBot = Throttle<Bot>;

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: ThrottledBot,
    /// Unthrottled handle for file downloads, which are not rate limited
    raw: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: ThrottledBot, raw: Bot) -> Self {
        Self { bot, raw }
    }
}

fn keyboard(reply: &Reply) -> Option<InlineKeyboardMarkup> {
    if reply.keyboard.is_empty() {
        return None;
    }
    Some(InlineKeyboardMarkup::new(reply.keyboard.iter().map(|row| {
        row.iter()
            .map(|button| InlineKeyboardButton::callback(button.label.clone(), button.data.clone()))
            .collect::<Vec<_>>()
    })))
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send(&self, to: &ConversationId, reply: Reply) -> Result<MessageRef, TransportError> {
        let markup = keyboard(&reply);
        let mut request = self.bot.send_message(ChatId(to.chat_id), reply.text);
        if let Some(thread) = to.thread_id {
            request = request.message_thread_id(ThreadId(MessageId(thread)));
        }
        if let Some(markup) = markup {
            request = request.reply_markup(markup);
        }

        let sent = request.await?;
        Ok(MessageRef(sent.id.0))
    }

    async fn edit(
        &self,
        to: &ConversationId,
        message: MessageRef,
        reply: Reply,
    ) -> Result<(), TransportError> {
        let markup = keyboard(&reply);
        let mut request =
            self.bot
                .edit_message_text(ChatId(to.chat_id), MessageId(message.0), reply.text);
        if let Some(markup) = markup {
            request = request.reply_markup(markup);
        }
        request.await?;
        Ok(())
    }

    async fn delete(&self, to: &ConversationId, message: MessageRef) -> Result<(), TransportError> {
        self.bot
            .delete_message(ChatId(to.chat_id), MessageId(message.0))
            .await?;
        Ok(())
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<String>,
    ) -> Result<(), TransportError> {
        let mut request = self
            .bot
            .answer_callback_query(CallbackQueryId(callback_id.to_string()));
        if let Some(text) = text {
            request = request.text(text);
        }
        request.await?;
        Ok(())
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>, TransportError> {
        let file = self.raw.get_file(FileId(file_id.to_string())).await?;
        debug!("Downloading {} ({} bytes)", file.path, file.size);

        let mut data = Vec::with_capacity(file.size as usize);
        self.raw
            .download_file(&file.path, &mut data)
            .await
            .map_err(|e| TransportError::Download(e.to_string()))?;
        Ok(data)
    }
}
