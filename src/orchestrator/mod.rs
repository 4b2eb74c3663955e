//! Process-wide wiring.
//!
//! The orchestrator owns the singletons — agent runtime, scheduler, HTTP
//! server, platform adapter, bound chat — and drives the per-message flow:
//! whitelist, bound-chat update, abort commands, FIFO queue, hybrid
//! pipeline, delivery. Construction is cycle-free: the adapter talks back
//! through an inbound channel, the HTTP layer through the
//! [`OutboundSender`] trait, and the scheduler through a [`JobHandler`].

pub mod bound_chat;

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::validate::validate_agent;
use crate::agent::AgentProfile;
use crate::config::Settings;
use crate::http::server::{self as http_server, HttpState};
use crate::http::OutboundSender;
use crate::orchestrator::bound_chat::BoundChatStore;
use crate::pipeline::hybrid::{HybridStream, StreamOutcome};
use crate::pipeline::mode::hybrid_wrap;
use crate::pipeline::queue::MessageQueue;
use crate::platform::{ChatAdapter, IncomingMessage, TypingGuard};
use crate::runtime::collector::ChunkSink;
use crate::runtime::{oneshot, AcpRuntime};
use crate::scheduler::model::{
    new_job_ref, NewSchedule, ScheduleConfig, ScheduleMetadata, ScheduleType,
};
use crate::scheduler::store::ScheduleStore;
use crate::scheduler::{JobHandler, Scheduler};
use crate::{AppError, Result};

/// One queued unit of work: a chat message to run through the pipeline.
#[derive(Debug, Clone)]
pub struct QueuedContext {
    /// The user's message text.
    pub text: String,
    /// Originating chat.
    pub chat_id: String,
    /// Bypass the hybrid-mode wrapping and detection.
    pub skip_hybrid_mode: bool,
}

/// Process-wide orchestrator.
pub struct Orchestrator {
    settings: Arc<Settings>,
    adapter: Arc<dyn ChatAdapter>,
    runtime: Arc<AcpRuntime>,
    scheduler: Arc<Scheduler>,
    bound_chat: Arc<BoundChatStore>,
    queue: OnceLock<MessageQueue<QueuedContext>>,
    http_cancel: CancellationToken,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Wire the singletons; nothing is started yet.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for an invalid timezone.
    pub fn build(
        settings: Arc<Settings>,
        profile: AgentProfile,
        adapter: Arc<dyn ChatAdapter>,
    ) -> Result<Arc<Self>> {
        let runtime = AcpRuntime::new(profile, Arc::clone(&settings));
        let bound_chat = Arc::new(BoundChatStore::new(settings.bound_chat_path()));

        let handler: Arc<dyn JobHandler> = Arc::new(JobRunner {
            settings: Arc::clone(&settings),
            runtime: Arc::clone(&runtime),
            adapter: Arc::clone(&adapter),
            bound_chat: Arc::clone(&bound_chat),
        });
        let scheduler = Scheduler::new(
            ScheduleStore::new(settings.schedules_path()),
            settings.parsed_timezone()?,
            handler,
        );

        Ok(Arc::new(Self {
            settings,
            adapter,
            runtime,
            scheduler,
            bound_chat,
            queue: OnceLock::new(),
            http_cancel: CancellationToken::new(),
            background: Mutex::new(Vec::new()),
        }))
    }

    /// The scheduler singleton (exposed for the HTTP layer and tests).
    #[must_use]
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// The runtime singleton.
    #[must_use]
    pub fn runtime(&self) -> &Arc<AcpRuntime> {
        &self.runtime
    }

    // ── Startup ──────────────────────────────────────────────────────────

    /// Validate the agent, prepare state, and start every surface.
    ///
    /// # Errors
    ///
    /// Agent validation and adapter launch failures are fatal; a busy
    /// callback port and schedule-load problems are not.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        validate_agent(self.runtime.profile()).await?;
        self.prepare_state_dir()?;
        self.bound_chat.load();

        if let Err(err) = self.scheduler.load_and_start().await {
            warn!(%err, "cannot load persisted schedules; starting with an empty set");
        }

        let outbound: Arc<dyn OutboundSender> = Arc::new(Outbound {
            adapter: Arc::clone(&self.adapter),
            bound_chat: Arc::clone(&self.bound_chat),
        });
        let http_state = Arc::new(HttpState {
            settings: Arc::clone(&self.settings),
            scheduler: Arc::clone(&self.scheduler),
            outbound,
        });
        if let Some((_, task)) = http_server::start(http_state, self.http_cancel.clone()).await? {
            self.track(task);
        }

        // Queue drain loop: each message runs the full hybrid pipeline.
        let processor_self = Arc::clone(self);
        let queue = MessageQueue::start(move |ctx, request_id| {
            let orchestrator = Arc::clone(&processor_self);
            async move { orchestrator.process_message(ctx, request_id).await }
        });
        let _ = self.queue.set(queue);

        let (inbound_tx, mut inbound_rx) = mpsc::channel::<IncomingMessage>(64);
        self.adapter.launch(inbound_tx).await?;

        let consumer_self = Arc::clone(self);
        self.track(tokio::spawn(async move {
            while let Some(message) = inbound_rx.recv().await {
                consumer_self.handle_inbound(message).await;
            }
            debug!("inbound consumer stopped");
        }));

        let heartbeat_self = Arc::clone(self);
        let heartbeat = Duration::from_millis(self.settings.heartbeat_interval_ms.max(1_000));
        self.track(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let queue_len = heartbeat_self.queue.get().map_or(0, MessageQueue::len);
                info!(
                    queue_len,
                    session_ready = heartbeat_self.runtime.is_healthy(),
                    prompt_active = heartbeat_self.runtime.has_active_prompt(),
                    "heartbeat"
                );
            }
        }));

        self.runtime.schedule_prewarm("startup");
        info!(platform = self.adapter.name(), "bridge started");
        Ok(())
    }

    fn prepare_state_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.settings.home_dir).map_err(|err| {
            AppError::Config(format!(
                "cannot create state directory '{}': {err}",
                self.settings.home_dir.display()
            ))
        })?;
        let notes = self.settings.memory_notes_path();
        if !notes.exists() {
            std::fs::write(&notes, "# Memory\n").map_err(|err| {
                AppError::Config(format!("cannot create '{}': {err}", notes.display()))
            })?;
        }
        Ok(())
    }

    fn track(&self, task: JoinHandle<()>) {
        if let Ok(mut tasks) = self.background.lock() {
            tasks.push(task);
        }
    }

    // ── Inbound handling ─────────────────────────────────────────────────

    /// Whitelist → bound-chat update → abort command → queue.
    pub async fn handle_inbound(self: &Arc<Self>, message: IncomingMessage) {
        let chat_id = message.chat_id.clone();

        if !self.settings.allowed_chat_ids.is_empty()
            && !self.settings.allowed_chat_ids.contains(&chat_id)
        {
            warn!(chat_id, "rejecting message from unauthorized chat");
            self.send_best_effort(
                &chat_id,
                "🚫 Unauthorized. This chat is not allowed to control the agent.",
            )
            .await;
            return;
        }

        self.bound_chat.bind(&chat_id);

        if is_abort_command(&message.text) {
            if self.runtime.has_active_prompt() {
                info!(chat_id, "abort command received; cancelling active prompt");
                self.runtime.request_manual_abort();
                self.runtime.cancel_active_prompt().await;
                self.send_best_effort(
                    &chat_id,
                    "⏹️ Abort requested — stopping the current agent action.",
                )
                .await;
            } else {
                self.send_best_effort(&chat_id, "ℹ️ No active agent action to abort.")
                    .await;
            }
            return;
        }

        let Some(queue) = self.queue.get() else {
            warn!("message arrived before the queue was started");
            return;
        };
        let outcome = queue.enqueue(QueuedContext {
            text: message.text,
            chat_id: chat_id.clone(),
            skip_hybrid_mode: false,
        });
        tokio::spawn(async move {
            match outcome.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => debug!(chat_id, %err, "message processing failed"),
                Err(_) => debug!(chat_id, "queue dropped before processing"),
            }
        });
    }

    // ── Message pipeline ─────────────────────────────────────────────────

    /// Run one queued message through the hybrid pipeline.
    async fn process_message(self: &Arc<Self>, ctx: QueuedContext, request_id: u64) -> Result<()> {
        debug!(request_id, chat_id = ctx.chat_id, "processing message");
        let _typing = TypingGuard::start(Arc::clone(&self.adapter), ctx.chat_id.clone());

        let wrapped = if ctx.skip_hybrid_mode {
            ctx.text.clone()
        } else {
            hybrid_wrap(&ctx.text)
        };

        let mut stream = HybridStream::new(
            Arc::clone(&self.adapter),
            ctx.chat_id.clone(),
            Arc::clone(&self.settings),
            ctx.skip_hybrid_mode,
        );

        let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel::<String>();
        let delivery = tokio::spawn(async move {
            let mut task_text = String::new();
            while let Some(chunk) = chunk_rx.recv().await {
                stream.on_chunk(&chunk, &mut task_text).await;
            }
            (stream, task_text)
        });

        let sink: ChunkSink = Box::new(move |chunk| {
            let _ = chunk_tx.send(chunk.to_owned());
        });
        let result = self.runtime.run_prompt(&wrapped, Some(sink)).await;

        let Ok((stream, task_text)) = delivery.await else {
            return Err(AppError::Platform("chunk delivery task failed".into()));
        };

        match result {
            Ok(full_response) => {
                match stream.complete(&full_response, task_text).await {
                    StreamOutcome::Quick => Ok(()),
                    StreamOutcome::AsyncTask(task) => {
                        self.schedule_async_job(&task, &ctx.chat_id).await
                    }
                }
            }
            Err(err) => {
                stream.fail().await;
                self.send_best_effort(&ctx.chat_id, &user_error_text(&err)).await;
                Err(err)
            }
        }
    }

    /// Fire-and-forget scheduling of an ASYNC background task, plus the
    /// confirmation message back to the chat.
    async fn schedule_async_job(self: &Arc<Self>, task: &str, chat_id: &str) -> Result<()> {
        if task.is_empty() {
            self.send_best_effort(chat_id, "❌ Error: the agent returned an empty background task.")
                .await;
            return Err(AppError::Acp("empty background task description".into()));
        }

        let job_ref = new_job_ref();
        let new = NewSchedule {
            message: task.to_owned(),
            description: Some(format!("Background task {job_ref}")),
            cron_expression: None,
            one_time: true,
            run_at: Some(chrono::Utc::now() + chrono::Duration::seconds(1)),
            schedule_type: ScheduleType::AsyncConversation,
            metadata: ScheduleMetadata {
                chat_id: Some(chat_id.to_owned()),
            },
        };
        let created = self.scheduler.create(new).await?;
        info!(schedule_id = created.id, job_ref, "background task scheduled");

        self.send_best_effort(
            chat_id,
            &format!("[MODE: ASYNC] {task} (Reference: {job_ref})"),
        )
        .await;
        Ok(())
    }

    async fn send_best_effort(&self, chat_id: &str, text: &str) {
        if let Err(err) = self.adapter.send_text(chat_id, text).await {
            warn!(chat_id, %err, "platform send failed");
        }
    }

    // ── Shutdown ─────────────────────────────────────────────────────────

    /// Graceful shutdown: scheduler, HTTP server, adapter, then runtime.
    pub async fn shutdown(self: &Arc<Self>) {
        info!("orchestrator shutting down");
        self.scheduler.stop().await;
        self.http_cancel.cancel();
        if let Err(err) = self.adapter.stop("shutdown").await {
            warn!(%err, "adapter stop failed");
        }
        self.runtime.shutdown("shutdown").await;
        if let Ok(mut tasks) = self.background.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

/// Map a pipeline failure to its user-visible message.
fn user_error_text(err: &AppError) -> String {
    match err {
        AppError::Aborted(_) => "⏹️ Agent action stopped.".to_owned(),
        other => format!("❌ Error: {other}"),
    }
}

/// The abort-command set, matched case- and punctuation-insensitively.
#[must_use]
pub fn is_abort_command(text: &str) -> bool {
    let normalized: String = text
        .trim()
        .trim_start_matches('/')
        .chars()
        .filter(|c| !matches!(c, '.' | ',' | '!' | '?'))
        .collect::<String>()
        .to_lowercase();
    let normalized = normalized.split_whitespace().collect::<Vec<_>>().join(" ");
    matches!(
        normalized.as_str(),
        "abort" | "cancel" | "stop" | "please abort" | "please cancel" | "please stop"
    )
}

// ── Outbound surface for the HTTP layer ──────────────────────────────────────

struct Outbound {
    adapter: Arc<dyn ChatAdapter>,
    bound_chat: Arc<BoundChatStore>,
}

impl OutboundSender for Outbound {
    fn send(
        &self,
        chat_id: &str,
        text: &str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let chat_id = chat_id.to_owned();
        let text = text.to_owned();
        Box::pin(async move { self.adapter.send_text(&chat_id, &text).await })
    }

    fn bound_chat(&self) -> Option<String> {
        self.bound_chat.get()
    }
}

// ── Scheduled job execution ──────────────────────────────────────────────────

/// Runs schedule firings through the one-shot worker and delivers results.
struct JobRunner {
    settings: Arc<Settings>,
    runtime: Arc<AcpRuntime>,
    adapter: Arc<dyn ChatAdapter>,
    bound_chat: Arc<BoundChatStore>,
}

impl JobRunner {
    async fn deliver(&self, chat_id: Option<&str>, text: &str) -> Result<()> {
        let Some(chat_id) = chat_id else {
            warn!("scheduled job has no target chat; dropping result");
            return Ok(());
        };
        self.adapter.send_text(chat_id, text).await
    }

    async fn execute(&self, config: &ScheduleConfig) -> Result<String> {
        oneshot::run_oneshot_prompt(
            self.runtime.profile(),
            &self.settings.workspace_dir,
            &config.message,
            Duration::from_millis(self.settings.oneshot_timeout_ms),
        )
        .await
    }
}

impl JobHandler for JobRunner {
    fn run(&self, config: ScheduleConfig) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let chat_id = config
                .metadata
                .chat_id
                .clone()
                .or_else(|| self.bound_chat.get());
            let outcome = self.execute(&config).await;

            match config.schedule_type {
                ScheduleType::AsyncConversation => match outcome {
                    Ok(output) => {
                        let text = format!(
                            "📢 Background task completed.\n\nOriginal Request: \"{}\"\n\nResult:\n{}",
                            config.message, output
                        );
                        self.deliver(chat_id.as_deref(), &text).await?;

                        // Re-inject the finished work into the live session;
                        // contention with a foreground prompt must not stall
                        // the scheduler, so this is fire-and-forget.
                        let runtime = Arc::clone(&self.runtime);
                        let context = format!(
                            "[Background task completed] Original request: {}\nResult: {}",
                            config.message, output
                        );
                        tokio::spawn(async move {
                            if let Err(err) = runtime.append_context(&context).await {
                                debug!(%err, "context re-injection failed");
                            }
                        });
                        Ok(())
                    }
                    Err(err) => {
                        let text = format!(
                            "📢 Background task failed.\n\nOriginal Request: \"{}\"\n\nError: {err}",
                            config.message
                        );
                        self.deliver(chat_id.as_deref(), &text).await
                    }
                },
                ScheduleType::Standard => match outcome {
                    Ok(output) => {
                        let heading = config
                            .description
                            .clone()
                            .unwrap_or_else(|| config.message.clone());
                        self.deliver(chat_id.as_deref(), &format!("⏰ {heading}\n\n{output}"))
                            .await
                    }
                    Err(err) => {
                        warn!(id = config.id, %err, "scheduled task failed");
                        self.deliver(
                            chat_id.as_deref(),
                            &format!("❌ Scheduled task failed: {err}"),
                        )
                        .await
                    }
                },
            }
        })
    }
}
