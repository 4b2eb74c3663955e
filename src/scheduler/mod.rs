//! Persisted cron and one-shot job scheduler.
//!
//! One scheduler per process, configured with a timezone and a persistence
//! path. Firings of the same job never overlap (`in_flight` guard);
//! firings of different jobs may interleave and independently contend for
//! the shared runtime. One-shot jobs remove themselves after firing;
//! one-shots already past due at load time are dropped.

pub mod model;
pub mod store;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use chrono_tz::Tz;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::scheduler::model::{
    new_schedule_id, parse_cron, NewSchedule, ScheduleConfig, ScheduleKind, SchedulePatch,
};
use crate::scheduler::store::ScheduleStore;
use crate::{AppError, Result};

/// Executes one schedule firing.
///
/// Handler failures are logged by the scheduler and never escape it; the
/// handler owns any user-facing error messaging.
pub trait JobHandler: Send + Sync {
    /// Run the job described by `config` to completion.
    fn run(&self, config: ScheduleConfig) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

struct Job {
    config: ScheduleConfig,
    task: Option<JoinHandle<()>>,
    in_flight: Arc<AtomicBool>,
}

struct Inner {
    jobs: HashMap<String, Job>,
    store: ScheduleStore,
}

/// Process-wide scheduler.
pub struct Scheduler {
    inner: tokio::sync::Mutex<Inner>,
    tz: Tz,
    handler: Arc<dyn JobHandler>,
    cancel: CancellationToken,
}

impl Scheduler {
    /// Build a scheduler over `store` firing in `tz` through `handler`.
    #[must_use]
    pub fn new(store: ScheduleStore, tz: Tz, handler: Arc<dyn JobHandler>) -> Arc<Self> {
        Arc::new(Self {
            inner: tokio::sync::Mutex::new(Inner {
                jobs: HashMap::new(),
                store,
            }),
            tz,
            handler,
            cancel: CancellationToken::new(),
        })
    }

    /// Load persisted schedules and wire the runtime handles.
    ///
    /// One-time schedules already past due are dropped; recurring schedules
    /// with invalid cron are skipped with a warning. Returns the number of
    /// live jobs.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Schedule` when the persisted document cannot be
    /// read or parsed.
    pub async fn load_and_start(self: &Arc<Self>) -> Result<usize> {
        let persisted = {
            let inner = self.inner.lock().await;
            inner.store.load()?
        };

        let now = Utc::now();
        let mut kept = Vec::new();
        let mut dropped = 0usize;
        for config in persisted {
            match config.kind {
                ScheduleKind::OneTime => match config.run_at {
                    Some(run_at) if run_at > now => kept.push(config),
                    _ => {
                        warn!(id = config.id, "dropping past-due one-time schedule");
                        dropped += 1;
                    }
                },
                ScheduleKind::Recurring => {
                    let expr = config.cron_expression.clone().unwrap_or_default();
                    if parse_cron(&expr).is_ok() {
                        kept.push(config);
                    } else {
                        warn!(
                            id = config.id,
                            cron = expr,
                            "skipping schedule with invalid cron expression"
                        );
                        dropped += 1;
                    }
                }
            }
        }

        let count = kept.len();
        let mut inner = self.inner.lock().await;
        for config in kept {
            let id = config.id.clone();
            let mut job = Job {
                config,
                task: None,
                in_flight: Arc::new(AtomicBool::new(false)),
            };
            if job.config.active {
                job.task = Some(self.arm(&job.config, &job.in_flight));
            }
            inner.jobs.insert(id, job);
        }
        if dropped > 0 {
            Self::persist_locked(&mut inner);
        }
        info!(jobs = count, dropped, "scheduler started");
        Ok(count)
    }

    /// Stop all job handles; in-flight handler calls finish on their own.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let mut inner = self.inner.lock().await;
        for job in inner.jobs.values_mut() {
            if let Some(task) = job.task.take() {
                task.abort();
            }
        }
        info!("scheduler stopped");
    }

    // ── CRUD ─────────────────────────────────────────────────────────────

    /// Create, arm, and persist a schedule.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Schedule` when validation fails: one-time
    /// schedules need a strictly future `run_at`; recurring schedules need
    /// a valid cron expression.
    pub async fn create(self: &Arc<Self>, new: NewSchedule) -> Result<ScheduleConfig> {
        if new.message.trim().is_empty() {
            return Err(AppError::Schedule("message must not be empty".into()));
        }
        let kind = if new.one_time {
            let run_at = new
                .run_at
                .ok_or_else(|| AppError::Schedule("one-time schedule needs runAt".into()))?;
            if run_at <= Utc::now() {
                return Err(AppError::Schedule("runAt must be in the future".into()));
            }
            ScheduleKind::OneTime
        } else {
            let expr = new
                .cron_expression
                .as_deref()
                .ok_or_else(|| AppError::Schedule("recurring schedule needs cronExpression".into()))?;
            parse_cron(expr)?;
            ScheduleKind::Recurring
        };

        let config = ScheduleConfig {
            id: new_schedule_id(),
            message: new.message,
            description: new.description,
            kind,
            cron_expression: new.cron_expression,
            run_at: new.run_at,
            schedule_type: new.schedule_type,
            metadata: new.metadata,
            created_at: Utc::now(),
            last_run: None,
            active: true,
        };

        let mut inner = self.inner.lock().await;
        let in_flight = Arc::new(AtomicBool::new(false));
        let task = Some(self.arm(&config, &in_flight));
        inner.jobs.insert(
            config.id.clone(),
            Job {
                config: config.clone(),
                task,
                in_flight,
            },
        );
        Self::persist_locked(&mut inner);
        info!(id = config.id, kind = ?config.kind, "schedule created");
        Ok(config)
    }

    /// Apply a partial update, reconfiguring runtime handles before
    /// persisting.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown id and
    /// `AppError::Schedule` when the patched configuration is invalid.
    pub async fn update(self: &Arc<Self>, id: &str, patch: SchedulePatch) -> Result<ScheduleConfig> {
        let mut inner = self.inner.lock().await;
        let job = inner
            .jobs
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("no schedule '{id}'")))?;

        let mut config = job.config.clone();
        if let Some(message) = patch.message {
            if message.trim().is_empty() {
                return Err(AppError::Schedule("message must not be empty".into()));
            }
            config.message = message;
        }
        if let Some(description) = patch.description {
            config.description = description;
        }
        if let Some(expr) = patch.cron_expression {
            if config.kind != ScheduleKind::Recurring {
                return Err(AppError::Schedule(
                    "cronExpression only applies to recurring schedules".into(),
                ));
            }
            parse_cron(&expr)?;
            config.cron_expression = Some(expr);
        }
        if let Some(run_at) = patch.run_at {
            if config.kind != ScheduleKind::OneTime {
                return Err(AppError::Schedule(
                    "runAt only applies to one-time schedules".into(),
                ));
            }
            if run_at <= Utc::now() {
                return Err(AppError::Schedule("runAt must be in the future".into()));
            }
            config.run_at = Some(run_at);
        }
        if let Some(active) = patch.active {
            config.active = active;
        }

        if let Some(task) = job.task.take() {
            task.abort();
        }
        job.config = config.clone();
        if job.config.active {
            job.task = Some(self.arm(&job.config, &job.in_flight));
        }
        Self::persist_locked(&mut inner);
        info!(id, "schedule updated");
        Ok(config)
    }

    /// Stop and remove a schedule, then persist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown id.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let mut job = inner
            .jobs
            .remove(id)
            .ok_or_else(|| AppError::NotFound(format!("no schedule '{id}'")))?;
        if let Some(task) = job.task.take() {
            task.abort();
        }
        Self::persist_locked(&mut inner);
        info!(id, "schedule removed");
        Ok(())
    }

    /// Snapshot of all schedules, newest first.
    pub async fn list(&self) -> Vec<ScheduleConfig> {
        let inner = self.inner.lock().await;
        let mut all: Vec<_> = inner.jobs.values().map(|j| j.config.clone()).collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    /// Fetch one schedule by id.
    pub async fn get(&self, id: &str) -> Option<ScheduleConfig> {
        let inner = self.inner.lock().await;
        inner.jobs.get(id).map(|j| j.config.clone())
    }

    // ── Firing ───────────────────────────────────────────────────────────

    fn arm(self: &Arc<Self>, config: &ScheduleConfig, in_flight: &Arc<AtomicBool>) -> JoinHandle<()> {
        match config.kind {
            ScheduleKind::Recurring => self.arm_recurring(config, in_flight),
            ScheduleKind::OneTime => self.arm_one_time(config, in_flight),
        }
    }

    fn arm_recurring(
        self: &Arc<Self>,
        config: &ScheduleConfig,
        in_flight: &Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        let id = config.id.clone();
        let expr = config.cron_expression.clone().unwrap_or_default();
        let in_flight = Arc::clone(in_flight);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let Ok(schedule) = parse_cron(&expr) else {
                warn!(id, cron = expr, "recurring job armed with invalid cron");
                return;
            };
            loop {
                let Some(next) = schedule.upcoming(scheduler.tz).next() else {
                    debug!(id, "cron schedule has no further firings");
                    return;
                };
                let delay = (next.with_timezone(&Utc) - Utc::now())
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(delay) => {}
                }
                // The cron driver keeps ticking regardless of handler
                // duration; overlapping fires are skipped by the guard.
                let fire_target = Arc::clone(&scheduler);
                let fire_id = id.clone();
                let fire_guard = Arc::clone(&in_flight);
                tokio::spawn(async move {
                    fire_target.fire(&fire_id, &fire_guard, false).await;
                });
            }
        })
    }

    fn arm_one_time(
        self: &Arc<Self>,
        config: &ScheduleConfig,
        in_flight: &Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        let id = config.id.clone();
        let run_at = config.run_at;
        let in_flight = Arc::clone(in_flight);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let delay = run_at
                .map(|at| (at - Utc::now()).to_std().unwrap_or(Duration::ZERO))
                .unwrap_or(Duration::ZERO);
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
            scheduler.fire(&id, &in_flight, true).await;
        })
    }

    async fn fire(self: &Arc<Self>, id: &str, in_flight: &Arc<AtomicBool>, one_time: bool) {
        let config = {
            let mut inner = self.inner.lock().await;
            let Some(job) = inner.jobs.get_mut(id) else {
                debug!(id, "fire: schedule vanished before firing");
                return;
            };
            if !job.config.active {
                debug!(id, "fire: schedule inactive, skipping");
                return;
            }
            if in_flight.swap(true, Ordering::SeqCst) {
                warn!(id, "fire: previous run still in flight, skipping");
                return;
            }
            job.config.last_run = Some(Utc::now());
            let config = job.config.clone();
            Self::persist_locked(&mut inner);
            config
        };

        info!(id, kind = ?config.kind, "schedule firing");
        if let Err(err) = self.handler.run(config).await {
            warn!(id, %err, "schedule handler failed");
        }
        in_flight.store(false, Ordering::SeqCst);

        if one_time {
            let mut inner = self.inner.lock().await;
            if let Some(mut job) = inner.jobs.remove(id) {
                if let Some(task) = job.task.take() {
                    task.abort();
                }
            }
            Self::persist_locked(&mut inner);
            debug!(id, "one-time schedule removed after firing");
        }
    }

    /// Persist the current job set; failures are logged, never thrown —
    /// the in-memory map stays authoritative for this process.
    fn persist_locked(inner: &mut Inner) {
        let configs: Vec<_> = inner.jobs.values().map(|j| j.config.clone()).collect();
        if let Err(err) = inner.store.persist(&configs) {
            warn!(%err, "schedule persistence failed; in-memory set remains authoritative");
        }
    }
}
