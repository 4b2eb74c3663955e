//! Slack adapter (Socket Mode).
//!
//! Inbound messages arrive through a Socket Mode listener; outbound
//! traffic uses the Web API with the bot token. Live messages map onto
//! `chat.postMessage` + `chat.update`; Slack has no bot-visible typing
//! indicator, so `send_typing` is a no-op.

use std::sync::Arc;

use slack_morphism::prelude::{
    SlackApiChatDeleteRequest, SlackApiChatPostMessageRequest, SlackApiChatUpdateRequest,
    SlackApiToken, SlackApiTokenType, SlackApiTokenValue, SlackChannelId, SlackClient,
    SlackClientEventsListenerEnvironment, SlackClientEventsUserState,
    SlackClientHyperHttpsConnector, SlackClientSession,
    SlackClientSocketModeConfig, SlackClientSocketModeListener, SlackEventCallbackBody,
    SlackMessageContent, SlackPushEventCallback, SlackSocketModeListenerCallbacks, SlackTs,
};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::pipeline::chunker::smart_chunks;
use crate::platform::{AdapterFuture, ChatAdapter, IncomingMessage};
use crate::{AppError, Result};

/// Practical per-message character limit for Slack text bodies.
const SLACK_MAX_LEN: usize = 4000;

/// Shared state handed to the Socket Mode callbacks.
#[derive(Clone)]
struct InboundShared {
    tx: mpsc::Sender<IncomingMessage>,
}

/// Slack chat platform adapter.
pub struct SlackAdapter {
    client: Arc<SlackClient<SlackClientHyperHttpsConnector>>,
    bot_token: SlackApiToken,
    app_token: SlackApiToken,
    socket_task: Mutex<Option<JoinHandle<()>>>,
}

impl SlackAdapter {
    /// Build an adapter over bot and app tokens.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Platform` when the HTTPS connector cannot be
    /// created.
    pub fn new(bot_token: &str, app_token: &str) -> Result<Self> {
        let connector = SlackClientHyperHttpsConnector::new()
            .map_err(|err| AppError::Platform(format!("failed to init slack connector: {err}")))?;
        let client = Arc::new(SlackClient::new(connector));
        let bot_token = SlackApiToken {
            token_value: SlackApiTokenValue(bot_token.to_owned()),
            cookie: None,
            team_id: None,
            scope: None,
            token_type: Some(SlackApiTokenType::Bot),
        };
        let app_token = SlackApiToken {
            token_value: SlackApiTokenValue(app_token.to_owned()),
            cookie: None,
            team_id: None,
            scope: None,
            token_type: Some(SlackApiTokenType::App),
        };
        Ok(Self {
            client,
            bot_token,
            app_token,
            socket_task: Mutex::new(None),
        })
    }

    fn session(&self) -> SlackClientSession<'_, SlackClientHyperHttpsConnector> {
        self.client.open_session(&self.bot_token)
    }

    fn content(text: String) -> SlackMessageContent {
        SlackMessageContent {
            text: Some(text),
            blocks: None,
            attachments: None,
            upload: None,
            files: None,
            reactions: None,
            metadata: None,
        }
    }
}

/// Push-event handler: forwards user messages into the inbound channel.
async fn handle_push(
    event: SlackPushEventCallback,
    _client: Arc<SlackClient<SlackClientHyperHttpsConnector>>,
    states: SlackClientEventsUserState,
) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let SlackEventCallbackBody::Message(message) = event.event else {
        debug!("slack push: ignoring non-message event");
        return Ok(());
    };
    // Skip bot echoes and message edits/deletions.
    if message.sender.bot_id.is_some() || message.subtype.is_some() {
        return Ok(());
    }
    let Some(channel) = message.origin.channel else {
        return Ok(());
    };
    let Some(text) = message.content.as_ref().and_then(|c| c.text.clone()) else {
        return Ok(());
    };

    let shared = {
        let guard = states.read().await;
        guard.get_user_state::<InboundShared>().cloned()
    };
    if let Some(shared) = shared {
        let incoming = IncomingMessage {
            text,
            chat_id: channel.0,
            user_id: message.sender.user.map(|u| u.0),
            username: None,
        };
        if let Err(err) = shared.tx.send(incoming).await {
            error!(%err, "slack: inbound channel closed");
        }
    }
    Ok(())
}

impl ChatAdapter for SlackAdapter {
    fn name(&self) -> &'static str {
        "slack"
    }

    fn max_message_length(&self) -> usize {
        SLACK_MAX_LEN
    }

    fn launch(&self, inbound: mpsc::Sender<IncomingMessage>) -> AdapterFuture<'_, ()> {
        Box::pin(async move {
            let listener_env = Arc::new(
                SlackClientEventsListenerEnvironment::new(Arc::clone(&self.client))
                    .with_user_state(InboundShared { tx: inbound }),
            );
            let callbacks = SlackSocketModeListenerCallbacks::new().with_push_events(handle_push);
            let config = SlackClientSocketModeConfig {
                max_connections_count: SlackClientSocketModeConfig::DEFAULT_CONNECTIONS_COUNT,
                debug_connections: SlackClientSocketModeConfig::DEFAULT_DEBUG_CONNECTIONS,
                initial_backoff_in_seconds:
                    SlackClientSocketModeConfig::DEFAULT_INITIAL_BACKOFF_IN_SECONDS,
                reconnect_timeout_in_seconds:
                    SlackClientSocketModeConfig::DEFAULT_RECONNECT_TIMEOUT_IN_SECONDS,
                ping_interval_in_seconds:
                    SlackClientSocketModeConfig::DEFAULT_PING_INTERVAL_IN_SECONDS,
                ping_failure_threshold_times:
                    SlackClientSocketModeConfig::DEFAULT_PING_FAILURE_THRESHOLD_TIMES,
            };
            let listener =
                SlackClientSocketModeListener::new(&config, listener_env, callbacks);

            let app_token = self.app_token.clone();
            let task = tokio::spawn(async move {
                if let Err(err) = listener.listen_for(&app_token).await {
                    error!(%err, "slack socket mode listen failed");
                    return;
                }
                listener.serve().await;
                info!("slack socket mode listener exited");
            });

            *self.socket_task.lock().await = Some(task);
            info!("slack adapter launched");
            Ok(())
        })
    }

    fn stop(&self, reason: &str) -> AdapterFuture<'_, ()> {
        let reason = reason.to_owned();
        Box::pin(async move {
            if let Some(task) = self.socket_task.lock().await.take() {
                task.abort();
            }
            info!(reason, "slack adapter stopped");
            Ok(())
        })
    }

    fn send_text(&self, chat_id: &str, text: &str) -> AdapterFuture<'_, ()> {
        let chat_id = chat_id.to_owned();
        let text = text.to_owned();
        Box::pin(async move {
            let channel = SlackChannelId(chat_id);
            for chunk in smart_chunks(&text, SLACK_MAX_LEN) {
                let request =
                    SlackApiChatPostMessageRequest::new(channel.clone(), Self::content(chunk));
                self.session()
                    .chat_post_message(&request)
                    .await
                    .map_err(|err| AppError::Platform(format!("slack post failed: {err}")))?;
            }
            Ok(())
        })
    }

    fn start_live_message(&self, chat_id: &str, text: &str) -> AdapterFuture<'_, String> {
        let chat_id = chat_id.to_owned();
        let text = text.to_owned();
        Box::pin(async move {
            let channel = SlackChannelId(chat_id);
            let request = SlackApiChatPostMessageRequest::new(channel, Self::content(text));
            let response = self
                .session()
                .chat_post_message(&request)
                .await
                .map_err(|err| AppError::Platform(format!("slack post failed: {err}")))?;
            Ok(response.ts.0)
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
            let request = SlackApiChatUpdateRequest::new(
                SlackChannelId(chat_id),
                Self::content(text),
                SlackTs(message_id),
            );
            self.session()
                .chat_update(&request)
                .await
                .map_err(|err| AppError::Platform(format!("slack update failed: {err}")))?;
            Ok(())
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
            let channel = SlackChannelId(chat_id);
            let chunks = smart_chunks(&text, SLACK_MAX_LEN);
            let mut chunks = chunks.into_iter();

            if let Some(first) = chunks.next() {
                let request = SlackApiChatUpdateRequest::new(
                    channel.clone(),
                    Self::content(first),
                    SlackTs(message_id),
                );
                self.session()
                    .chat_update(&request)
                    .await
                    .map_err(|err| AppError::Platform(format!("slack final update failed: {err}")))?;
            }
            for chunk in chunks {
                let request =
                    SlackApiChatPostMessageRequest::new(channel.clone(), Self::content(chunk));
                self.session()
                    .chat_post_message(&request)
                    .await
                    .map_err(|err| AppError::Platform(format!("slack post failed: {err}")))?;
            }
            Ok(())
        })
    }

    fn remove_message(&self, chat_id: &str, message_id: &str) -> AdapterFuture<'_, ()> {
        let chat_id = chat_id.to_owned();
        let message_id = message_id.to_owned();
        Box::pin(async move {
            let request =
                SlackApiChatDeleteRequest::new(SlackChannelId(chat_id), SlackTs(message_id));
            match self.session().chat_delete(&request).await {
                Ok(_) => Ok(()),
                Err(err) if err.to_string().contains("message_not_found") => Ok(()),
                Err(err) => {
                    warn!(%err, "slack delete failed");
                    Err(AppError::Platform(format!("slack delete failed: {err}")))
                }
            }
        })
    }

    fn send_typing(&self, _chat_id: &str) -> AdapterFuture<'_, ()> {
        // Slack exposes no typing indicator to bots.
        Box::pin(async move { Ok(()) })
    }
}
