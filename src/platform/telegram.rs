//! Telegram adapter (long polling).
//!
//! Live messages map onto a sent message that is repeatedly edited via
//! `editMessageText`. Telegram rejects edits that do not change the text
//! with "message is not modified" — those are swallowed here so the core
//! can flush blindly.

use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::{ChatAction, MessageId};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::pipeline::chunker::smart_chunks;
use crate::platform::{AdapterFuture, ChatAdapter, IncomingMessage};
use crate::{AppError, Result};

/// Telegram's hard per-message character limit.
const TELEGRAM_MAX_LEN: usize = 4096;

/// Telegram chat platform adapter.
pub struct TelegramAdapter {
    bot: Bot,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl TelegramAdapter {
    /// Build an adapter over a bot token.
    #[must_use]
    pub fn new(token: &str) -> Self {
        Self {
            bot: Bot::new(token),
            dispatcher: Mutex::new(None),
        }
    }

    fn parse_chat(chat_id: &str) -> Result<ChatId> {
        chat_id
            .parse::<i64>()
            .map(ChatId)
            .map_err(|_| AppError::Platform(format!("invalid telegram chat id '{chat_id}'")))
    }

    fn parse_message(message_id: &str) -> Result<MessageId> {
        message_id
            .parse::<i32>()
            .map(MessageId)
            .map_err(|_| AppError::Platform(format!("invalid telegram message id '{message_id}'")))
    }
}

impl ChatAdapter for TelegramAdapter {
    fn name(&self) -> &'static str {
        "telegram"
    }

    fn max_message_length(&self) -> usize {
        TELEGRAM_MAX_LEN
    }

    fn launch(&self, inbound: mpsc::Sender<IncomingMessage>) -> AdapterFuture<'_, ()> {
        Box::pin(async move {
            let bot = self.bot.clone();
            let handler = Update::filter_message().endpoint(
                move |msg: Message, tx: mpsc::Sender<IncomingMessage>| async move {
                    if let Some(text) = msg.text() {
                        let incoming = IncomingMessage {
                            text: text.to_owned(),
                            chat_id: msg.chat.id.to_string(),
                            user_id: msg.from.as_ref().map(|u| u.id.to_string()),
                            username: msg.from.as_ref().and_then(|u| u.username.clone()),
                        };
                        if let Err(err) = tx.send(incoming).await {
                            error!(%err, "telegram: inbound channel closed");
                        }
                    }
                    respond(())
                },
            );

            let task = tokio::spawn(async move {
                Dispatcher::builder(bot, handler)
                    .dependencies(dptree::deps![inbound])
                    .build()
                    .dispatch()
                    .await;
            });

            *self.dispatcher.lock().await = Some(task);
            info!("telegram adapter launched");
            Ok(())
        })
    }

    fn stop(&self, reason: &str) -> AdapterFuture<'_, ()> {
        let reason = reason.to_owned();
        Box::pin(async move {
            if let Some(task) = self.dispatcher.lock().await.take() {
                task.abort();
            }
            info!(reason, "telegram adapter stopped");
            Ok(())
        })
    }

    fn send_text(&self, chat_id: &str, text: &str) -> AdapterFuture<'_, ()> {
        let chat_id = chat_id.to_owned();
        let text = text.to_owned();
        Box::pin(async move {
            let chat = Self::parse_chat(&chat_id)?;
            for chunk in smart_chunks(&text, TELEGRAM_MAX_LEN) {
                self.bot
                    .send_message(chat, chunk)
                    .await
                    .map_err(|err| AppError::Platform(format!("telegram send failed: {err}")))?;
            }
            Ok(())
        })
    }

    fn start_live_message(&self, chat_id: &str, text: &str) -> AdapterFuture<'_, String> {
        let chat_id = chat_id.to_owned();
        let text = text.to_owned();
        Box::pin(async move {
            let chat = Self::parse_chat(&chat_id)?;
            let sent = self
                .bot
                .send_message(chat, text)
                .await
                .map_err(|err| AppError::Platform(format!("telegram send failed: {err}")))?;
            Ok(sent.id.0.to_string())
        })
    }

    fn update_live_message(
        &self,
        chat_id: &str,
        message_id: &str,
        text: &str,
    ) -> AdapterFuture<'_, ()> {
        let chat_id = chat_id.to_owned();
        let message_id = message_id.to_owned();
        let text = text.to_owned();
        Box::pin(async move {
            let chat = Self::parse_chat(&chat_id)?;
            let msg = Self::parse_message(&message_id)?;
            match self.bot.edit_message_text(chat, msg, text).await {
                Ok(_) => Ok(()),
                Err(err) if err.to_string().contains("message is not modified") => Ok(()),
                Err(err) => Err(AppError::Platform(format!("telegram edit failed: {err}"))),
            }
        })
    }

    fn finalize_live_message(
        &self,
        chat_id: &str,
        message_id: &str,
        text: &str,
    ) -> AdapterFuture<'_, ()> {
        let chat_id = chat_id.to_owned();
        let message_id = message_id.to_owned();
        let text = text.to_owned();
        Box::pin(async move {
            let chat = Self::parse_chat(&chat_id)?;
            let msg = Self::parse_message(&message_id)?;
            let chunks = smart_chunks(&text, TELEGRAM_MAX_LEN);
            let mut chunks = chunks.into_iter();

            if let Some(first) = chunks.next() {
                match self.bot.edit_message_text(chat, msg, first).await {
                    Ok(_) => {}
                    Err(err) if err.to_string().contains("message is not modified") => {}
                    Err(err) => {
                        return Err(AppError::Platform(format!(
                            "telegram final edit failed: {err}"
                        )))
                    }
                }
            }
            for chunk in chunks {
                self.bot
                    .send_message(chat, chunk)
                    .await
                    .map_err(|err| AppError::Platform(format!("telegram send failed: {err}")))?;
            }
            Ok(())
        })
    }

    fn remove_message(&self, chat_id: &str, message_id: &str) -> AdapterFuture<'_, ()> {
        let chat_id = chat_id.to_owned();
        let message_id = message_id.to_owned();
        Box::pin(async move {
            let chat = Self::parse_chat(&chat_id)?;
            let msg = Self::parse_message(&message_id)?;
            match self.bot.delete_message(chat, msg).await {
                Ok(_) => Ok(()),
                Err(err) if err.to_string().contains("message to delete not found") => Ok(()),
                Err(err) => {
                    warn!(%err, "telegram delete failed");
                    Err(AppError::Platform(format!("telegram delete failed: {err}")))
                }
            }
        })
    }

    fn send_typing(&self, chat_id: &str) -> AdapterFuture<'_, ()> {
        let chat_id = chat_id.to_owned();
        Box::pin(async move {
            let chat = Self::parse_chat(&chat_id)?;
            self.bot
                .send_chat_action(chat, ChatAction::Typing)
                .await
                .map_err(|err| AppError::Platform(format!("telegram typing failed: {err}")))?;
            Ok(())
        })
    }
}
