// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Session Scheduler
//!
//! The orchestration core: accepts submissions, admits them against the
//! global resource pool, and drives each session's seven-stage state machine
//! in a supervised background task.
//!
//! ## Per-stage Flow
//!
//! ```text
//! stage-started -> execute (budgeted, cancellable) -> quality gate
//!   pass     -> checkpoint -> journal -> stage-completed -> [HITL] -> next stage
//!   retry    -> checkpoint (superseded attempt) -> stage-started(attempt+1)
//!   fallback -> checkpoint placeholder -> stage-completed -> next stage
//!   fatal    -> pipeline-failed (critical stages only)
//! ```
//!
//! ## Ordering Guarantees
//!
//! Within a session: the stage index is monotonic; every transition is
//! published on the bus before the next begins; the version-log checkpoint
//! is journaled before `stage-completed` publishes. Nothing is ordered
//! across sessions.
//!
//! ## Cancellation
//!
//! `cancel` trips the session's token. Every suspension point - worker
//! acquisition, model calls, the HITL rendezvous, retry pauses - races
//! against it, and in-flight stage futures are dropped (RAII permits
//! release, late model results are discarded). At the completion boundary,
//! cancel wins only if observed before the completion event publishes.
//!
//! The scheduler is the single writer of session state; observers consume
//! event copies and cloned snapshots.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use comicforge_bootstrap::CancellationToken;
use comicforge_domain::repositories::session_journal::{JournalEntry, JournalRecord, SessionJournal};
use comicforge_domain::services::quality_evaluator::CategoryEvaluator;
use comicforge_domain::services::{ImageModelService, ProgressSink, StageContext, StageWorker, TextModelService};
use comicforge_domain::value_objects::feedback::{FeedbackKind, FeedbackOrigin, ModificationDescriptor};
use comicforge_domain::{
    ChangeSet, EngineError, EventPayload, GenerationMetrics, OwnerId, QualityScore, Session, SessionId,
    StageIndex, StageOutput, StageResult, SubmissionOptions, VersionAuthor, VersionId, VersionLog,
};

use crate::application::services::hitl::{HitlCoordinator, RendezvousOutcome};
use crate::application::services::preview::PreviewService;
use crate::application::services::quality_gate::{GateOutcome, QualityGate};
use crate::infrastructure::adapters::image_cache::ImageCache;
use crate::infrastructure::bus::update_bus::{Subscription, UpdateBus};
use crate::infrastructure::config::engine_config::EngineConfig;
use crate::infrastructure::metrics::service::MetricsService;
use crate::infrastructure::quality::evaluators::default_evaluators;
use crate::infrastructure::runtime::image_executor::ImageExecutor;
use crate::infrastructure::runtime::resource_pool::{PoolConfig, ResourcePool};
use crate::infrastructure::runtime::supervisor::{join_supervised, spawn_supervised, EngineResult};
use crate::infrastructure::stages::build_stage_workers;

/// Returned by `submit`.
#[derive(Debug)]
pub struct SubmissionReceipt {
    pub session_id: SessionId,
    /// Sum of effective stage budgets.
    pub expected_duration: Duration,
    /// Live subscription opened at admission.
    pub events: Subscription,
}

/// Returned by `submit_feedback`.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackAck {
    pub accepted: bool,
    pub next_stage: Option<StageIndex>,
}

/// Mutable state owned by one session's driver task.
struct SessionShared {
    session: RwLock<Session>,
    version_log: Mutex<VersionLog>,
    metrics: Mutex<GenerationMetrics>,
    journal_seq: std::sync::atomic::AtomicU64,
}

impl SessionShared {
    fn id(&self) -> SessionId {
        self.session.read().id()
    }

    fn next_seq(&self) -> u64 {
        self.journal_seq.fetch_add(1, std::sync::atomic::Ordering::SeqCst)
    }
}

struct SessionHandle {
    cancel: CancellationToken,
    shared: Arc<SessionShared>,
    driver: Mutex<Option<JoinHandle<EngineResult<()>>>>,
}

/// How one stage ultimately settled.
enum StageEnd {
    Settled { result: StageResult, fell_back: bool },
    Cancelled,
    Fatal(EngineError),
}

struct Core {
    config: EngineConfig,
    pool: Arc<ResourcePool>,
    bus: Arc<UpdateBus>,
    journal: Arc<dyn SessionJournal>,
    metrics: MetricsService,
    workers: HashMap<u8, Arc<dyn StageWorker>>,
    gate: Arc<QualityGate>,
    hitl: Arc<HitlCoordinator>,
    previews: Arc<PreviewService>,
    image_cache: Arc<ImageCache>,
    sessions: RwLock<HashMap<SessionId, Arc<SessionHandle>>>,
    dedupe: Mutex<HashMap<(OwnerId, String), SessionId>>,
}

/// The engine facade: one scheduler drives all sessions of a process.
#[derive(Clone)]
pub struct SessionScheduler {
    core: Arc<Core>,
}

/// Assembles a scheduler with explicit backends.
pub struct EngineBuilder {
    config: EngineConfig,
    text_model: Arc<dyn TextModelService>,
    image_model: Arc<dyn ImageModelService>,
    journal: Arc<dyn SessionJournal>,
    evaluators: Vec<Arc<dyn CategoryEvaluator>>,
}

impl EngineBuilder {
    pub fn new(
        config: EngineConfig,
        text_model: Arc<dyn TextModelService>,
        image_model: Arc<dyn ImageModelService>,
        journal: Arc<dyn SessionJournal>,
    ) -> Self {
        Self {
            config,
            text_model,
            image_model,
            journal,
            evaluators: default_evaluators(),
        }
    }

    /// Replaces the pluggable category evaluators.
    pub fn with_evaluators(mut self, evaluators: Vec<Arc<dyn CategoryEvaluator>>) -> Self {
        self.evaluators = evaluators;
        self
    }

    pub fn build(self) -> Result<SessionScheduler, EngineError> {
        self.config.validate()?;
        let pool = Arc::new(ResourcePool::new(PoolConfig {
            max_sessions: self.config.limits.max_sessions,
            max_stage_workers: self.config.limits.max_stage_workers,
            max_image_tasks: self.config.limits.max_image_tasks_global,
        })?);
        let image_cache = Arc::new(ImageCache::new());
        let image_executor = Arc::new(ImageExecutor::new(
            self.image_model,
            Arc::clone(&image_cache),
            Arc::clone(&pool),
        ));
        let workers = build_stage_workers(self.text_model, image_executor, &self.config);
        let gate = Arc::new(QualityGate::from_config(&self.config, self.evaluators)?);
        let bus = Arc::new(UpdateBus::new(self.config.bus.queue_capacity));
        let metrics = MetricsService::new()?;

        Ok(SessionScheduler {
            core: Arc::new(Core {
                config: self.config,
                pool,
                bus,
                journal: self.journal,
                metrics,
                workers,
                gate,
                hitl: Arc::new(HitlCoordinator::new()),
                previews: Arc::new(PreviewService::new()),
                image_cache,
                sessions: RwLock::new(HashMap::new()),
                dedupe: Mutex::new(HashMap::new()),
            }),
        })
    }
}

impl SessionScheduler {
    /// Accepts a submission, admitting it against the session cap.
    ///
    /// Fails with `capacity` when the cap is exhausted - without creating a
    /// session record. Resubmitting the same (owner, client token) pair
    /// returns the existing session id with a fresh subscription.
    pub async fn submit(
        &self,
        owner: OwnerId,
        text: String,
        options: SubmissionOptions,
    ) -> Result<SubmissionReceipt, EngineError> {
        let core = &self.core;

        if let Some(token) = &options.client_token {
            let dedupe = core.dedupe.lock();
            if let Some(existing) = dedupe.get(&(owner, token.clone())) {
                let session_id = *existing;
                drop(dedupe);
                let events = core.bus.subscribe(session_id)?;
                let expected_duration = core.expected_duration(&options);
                return Ok(SubmissionReceipt {
                    session_id,
                    expected_duration,
                    events,
                });
            }
        }

        let session = Session::new(owner, text, options.clone())?;
        let session_id = session.id();

        // Admission: fail fast, no record on capacity exhaustion.
        let permit = core.pool.try_admit_session()?;

        core.bus.register(session_id);
        let shared = Arc::new(SessionShared {
            version_log: Mutex::new(VersionLog::new(session_id)),
            metrics: Mutex::new(GenerationMetrics::new(session_id)),
            journal_seq: std::sync::atomic::AtomicU64::new(0),
            session: RwLock::new(session),
        });

        if let Err(error) = core
            .append_journal(
                &shared,
                JournalRecord::Admitted {
                    owner,
                    submission: shared.session.read().submission().to_string(),
                    options: options.clone(),
                },
            )
            .await
        {
            core.bus.drop_channel(session_id);
            return Err(error);
        }

        core.pool.allocate_memory(shared.session.read().submission().len());
        core.metrics.record_submission();

        let cancel = CancellationToken::new();
        let handle = Arc::new(SessionHandle {
            cancel: cancel.clone(),
            shared: Arc::clone(&shared),
            driver: Mutex::new(None),
        });
        core.sessions.write().insert(session_id, Arc::clone(&handle));
        if let Some(token) = &options.client_token {
            core.dedupe.lock().insert((owner, token.clone()), session_id);
        }

        let events = core.bus.subscribe(session_id)?;
        let expected_duration = core.expected_duration(&options);

        let driver_core = Arc::clone(core);
        let driver = spawn_supervised("session-driver", async move {
            driver_core.drive(shared, cancel, permit).await
        });
        *handle.driver.lock() = Some(driver);

        info!(session = %session_id, ?expected_duration, "session admitted");
        Ok(SubmissionReceipt {
            session_id,
            expected_duration,
            events,
        })
    }

    /// Cancels a session. Idempotent; effective only while non-terminal.
    pub fn cancel(&self, session_id: SessionId) -> Result<(), EngineError> {
        let handle = self.handle(session_id)?;
        handle.cancel.cancel();
        Ok(())
    }

    /// Opens a new subscription to a session's event stream.
    pub fn subscribe(&self, session_id: SessionId) -> Result<Subscription, EngineError> {
        self.core.bus.subscribe(session_id)
    }

    /// Delivers observer feedback into the session's open rendezvous.
    pub fn submit_feedback(
        &self,
        session_id: SessionId,
        stage: StageIndex,
        kind: FeedbackKind,
        content: Option<String>,
    ) -> Result<FeedbackAck, EngineError> {
        // Unknown sessions are invalid input, not a protocol violation.
        let _handle = self.handle(session_id)?;
        self.core.hitl.submit_feedback(session_id, stage, kind, content)?;
        Ok(FeedbackAck {
            accepted: true,
            next_stage: stage.next(),
        })
    }

    /// Registers an admin override forcing the next gate decision for
    /// (session, stage) to pass. Recorded on the checkpoint version.
    pub fn override_quality(&self, session_id: SessionId, stage: StageIndex, operator: impl Into<String>) {
        self.core.gate.register_override(session_id, stage.value(), operator);
    }

    /// Snapshot of the session entity.
    pub fn session_snapshot(&self, session_id: SessionId) -> Result<Session, EngineError> {
        Ok(self.handle(session_id)?.shared.session.read().clone())
    }

    /// Snapshot of the session's version log.
    pub fn version_log(&self, session_id: SessionId) -> Result<VersionLog, EngineError> {
        Ok(self.handle(session_id)?.shared.version_log.lock().clone())
    }

    /// Structural diff between two versions of a session.
    pub fn diff(&self, session_id: SessionId, a: VersionId, b: VersionId) -> Result<ChangeSet, EngineError> {
        self.handle(session_id)?.shared.version_log.lock().diff(a, b)
    }

    /// Restores an older version onto a fresh branch; returns its name.
    pub fn restore(&self, session_id: SessionId, version: VersionId) -> Result<String, EngineError> {
        self.handle(session_id)?.shared.version_log.lock().restore(version)
    }

    /// Waits for the session's driver task to finish.
    pub async fn join_session(&self, session_id: SessionId) -> Result<(), EngineError> {
        let handle = self.handle(session_id)?;
        let driver = handle.driver.lock().take();
        match driver {
            Some(task) => join_supervised(task).await,
            None => Ok(()),
        }
    }

    /// Drops all retained state of a terminal session.
    pub fn remove_session(&self, session_id: SessionId) -> Result<(), EngineError> {
        let handle = self.handle(session_id)?;
        if !handle.shared.session.read().is_terminal() {
            return Err(EngineError::invalid_input("cannot remove a live session"));
        }
        self.core.sessions.write().remove(&session_id);
        self.core.bus.drop_channel(session_id);
        self.core.hitl.forget_session(session_id);
        Ok(())
    }

    pub fn metrics(&self) -> &MetricsService {
        &self.core.metrics
    }

    pub fn image_cache(&self) -> &Arc<ImageCache> {
        &self.core.image_cache
    }

    pub fn journal(&self) -> &Arc<dyn SessionJournal> {
        &self.core.journal
    }

    pub fn config(&self) -> &EngineConfig {
        &self.core.config
    }

    fn handle(&self, session_id: SessionId) -> Result<Arc<SessionHandle>, EngineError> {
        self.core
            .sessions
            .read()
            .get(&session_id)
            .cloned()
            .ok_or_else(|| EngineError::SessionNotFound(format!("{}", session_id)))
    }
}

impl Core {
    fn expected_duration(&self, options: &SubmissionOptions) -> Duration {
        StageIndex::all().map(|stage| self.effective_budget(options, stage)).sum()
    }

    fn effective_budget(&self, options: &SubmissionOptions, stage: StageIndex) -> Duration {
        match &options.stage_budget_overrides {
            Some(overrides) => Duration::from_secs(overrides[stage.as_offset()]),
            None => self.config.stage_budget(stage),
        }
    }

    /// Publishes an event; a missing channel is logged, never fatal.
    fn publish(&self, session_id: SessionId, payload: EventPayload) {
        if let Err(error) = self.bus.publish(session_id, payload) {
            warn!(session = %session_id, error = %error, "event publish failed");
        }
    }

    async fn append_journal(&self, shared: &SessionShared, record: JournalRecord) -> Result<(), EngineError> {
        let entry = JournalEntry::new(shared.id(), shared.next_seq(), record);
        self.journal.append(entry).await
    }

    /// The supervised driver of one session.
    async fn drive(
        self: Arc<Self>,
        shared: Arc<SessionShared>,
        cancel: CancellationToken,
        _admission: tokio::sync::OwnedSemaphorePermit,
    ) -> EngineResult<()> {
        let session_id = shared.id();
        shared.session.write().begin()?;
        shared.metrics.lock().mark_started();

        let mut pending_mods: Vec<ModificationDescriptor> = Vec::new();
        let mut final_pointer = format!("artifact://sessions/{}/final", session_id);

        for stage in StageIndex::all() {
            if cancel.is_cancelled() {
                return self.finish_cancelled(&shared).await;
            }

            match self.run_stage(&shared, stage, &mut pending_mods, &cancel).await {
                StageEnd::Settled { result, fell_back: _ } => {
                    // A modification descriptor applies to exactly one
                    // stage's input; it was consumed by the stage that just
                    // settled.
                    pending_mods.clear();
                    if stage.is_last() {
                        if let StageOutput::Final(fin) = result.output() {
                            final_pointer = fin.output_pointer.clone();
                        }
                    } else {
                        let hitl_wanted = shared.session.read().options().hitl_enabled
                            && self.config.hitl_enabled_for(stage);
                        if hitl_wanted {
                            let proceed = self
                                .run_rendezvous(&shared, stage, &result, &mut pending_mods, &cancel)
                                .await;
                            match proceed {
                                Ok(true) => {}
                                Ok(false) => return self.finish_cancelled(&shared).await,
                                Err(error) => return self.finish_failed(&shared, error).await,
                            }
                        }
                        shared.session.write().advance()?;
                    }
                }
                StageEnd::Cancelled => return self.finish_cancelled(&shared).await,
                StageEnd::Fatal(error) => return self.finish_failed(&shared, error).await,
            }
        }

        // Simultaneous completion and cancel: cancel wins only if observed
        // before the completion event publishes.
        if cancel.is_cancelled() {
            return self.finish_cancelled(&shared).await;
        }

        shared.session.write().complete()?;
        shared.metrics.lock().mark_finished();
        let (overall_quality, elapsed_ms) = {
            let metrics = shared.metrics.lock();
            (metrics.overall_quality(), metrics.total_elapsed_ms())
        };

        let terminal_state = shared.session.read().state();
        self.append_journal(
            &shared,
            JournalRecord::Terminal {
                state: terminal_state,
                artifact_pointer: Some(final_pointer.clone()),
            },
        )
        .await?;
        self.metrics.record_completed(elapsed_ms as f64 / 1000.0);
        self.pool.release_memory(shared.session.read().submission().len());
        self.publish(
            session_id,
            EventPayload::PipelineCompleted {
                artifact_pointer: final_pointer,
                overall_quality,
                elapsed_ms,
            },
        );
        info!(session = %session_id, elapsed_ms, overall_quality, "pipeline completed");
        Ok(())
    }

    /// Runs one stage to settlement: pass, fallback, cancel, or fatal.
    async fn run_stage(
        &self,
        shared: &Arc<SessionShared>,
        stage: StageIndex,
        pending_mods: &mut Vec<ModificationDescriptor>,
        cancel: &CancellationToken,
    ) -> StageEnd {
        let session_id = shared.id();
        let worker = match self.workers.get(&stage.value()) {
            Some(worker) => Arc::clone(worker),
            None => return StageEnd::Fatal(EngineError::internal(format!("no worker for stage {}", stage))),
        };
        let critical = self.config.is_critical(stage);
        let max_attempts = self.gate.max_attempts();

        loop {
            let attempt = match shared.session.write().begin_attempt(stage) {
                Ok(attempt) => attempt,
                Err(error) => return StageEnd::Fatal(error),
            };
            let ctx = self.build_context(shared, stage, attempt, pending_mods);
            self.publish(session_id, EventPayload::StageStarted { stage, attempt });

            let attempt_started = Instant::now();
            let attempt_result = self.run_attempt(shared, &worker, &ctx, cancel).await;
            let elapsed_ms = attempt_started.elapsed().as_millis() as u64;

            match attempt_result {
                Ok(output) => {
                    let decision = self.gate.evaluate(&ctx, worker.as_ref(), &output);
                    let result = StageResult::new(
                        session_id,
                        stage,
                        attempt,
                        ctx.fingerprint(),
                        output,
                        decision.score,
                        elapsed_ms,
                        Vec::new(),
                    );

                    match decision.outcome {
                        GateOutcome::Pass => {
                            let mut tags = Vec::new();
                            if let Some(operator) = &decision.override_operator {
                                tags.push(format!("quality-override:{}", operator));
                            }
                            return self
                                .settle(shared, stage, result, attempt, tags, false)
                                .await;
                        }
                        GateOutcome::Retry => {
                            // Superseded attempts stay addressable in the log
                            if let Err(error) = self
                                .checkpoint(shared, result, VersionAuthor::System,
                                    format!("{} attempt {} below threshold", stage.name(), attempt),
                                    vec!["quality-retry".to_string()])
                                .await
                            {
                                return StageEnd::Fatal(error);
                            }
                            self.previews.invalidate_stage(stage);
                            self.publish(
                                session_id,
                                EventPayload::StageFailed {
                                    stage,
                                    error_kind: "quality-below-threshold".to_string(),
                                    message: format!("score {} below {}", decision.score, self.gate.threshold()),
                                    will_retry: true,
                                    fallback: false,
                                },
                            );
                            continue;
                        }
                        GateOutcome::Fallback => {
                            // The scored attempt is archived, then the stage
                            // settles with a placeholder.
                            if let Err(error) = self
                                .checkpoint(shared, result, VersionAuthor::System,
                                    format!("{} attempts exhausted", stage.name()),
                                    vec!["quality-exhausted".to_string()])
                                .await
                            {
                                return StageEnd::Fatal(error);
                            }
                            if critical {
                                return StageEnd::Fatal(EngineError::QualityBelowThreshold(format!(
                                    "critical stage {} below threshold after {} attempts",
                                    stage, attempt
                                )));
                            }
                            self.publish(
                                session_id,
                                EventPayload::StageFailed {
                                    stage,
                                    error_kind: "quality-below-threshold".to_string(),
                                    message: format!("score {} below {}", decision.score, self.gate.threshold()),
                                    will_retry: false,
                                    fallback: true,
                                },
                            );
                            let placeholder = StageResult::new(
                                session_id,
                                stage,
                                attempt,
                                ctx.fingerprint(),
                                worker.placeholder("quality below threshold after final attempt"),
                                decision.score,
                                elapsed_ms,
                                vec![format!("quality {} below threshold", decision.score)],
                            );
                            return self
                                .settle(shared, stage, placeholder, attempt, vec!["fallback".to_string()], true)
                                .await;
                        }
                    }
                }
                Err(error) if error.kind() == "cancelled" => return StageEnd::Cancelled,
                Err(error) => {
                    let will_retry = error.is_retryable() && attempt < max_attempts;
                    if let Err(journal_error) = self
                        .append_journal(
                            shared,
                            JournalRecord::StageFailed {
                                stage,
                                error_kind: error.kind().to_string(),
                                message: error.to_string(),
                            },
                        )
                        .await
                    {
                        return StageEnd::Fatal(journal_error);
                    }
                    self.publish(
                        session_id,
                        EventPayload::StageFailed {
                            stage,
                            error_kind: error.kind().to_string(),
                            message: error.to_string(),
                            will_retry,
                            fallback: !will_retry && !critical,
                        },
                    );

                    if will_retry {
                        continue;
                    }
                    if critical {
                        return StageEnd::Fatal(error);
                    }
                    // Non-critical exhaustion: placeholder and move on
                    let placeholder = StageResult::new(
                        session_id,
                        stage,
                        attempt,
                        ctx.fingerprint(),
                        worker.placeholder(&error.to_string()),
                        QualityScore::zero(),
                        elapsed_ms,
                        vec![error.to_string()],
                    );
                    return self
                        .settle(shared, stage, placeholder, attempt, vec!["fallback".to_string()], true)
                        .await;
                }
            }
        }
    }

    /// One attempt: validate, acquire a worker slot, execute under the
    /// wall-clock budget, validate the output. Every await races the cancel
    /// token.
    async fn run_attempt(
        &self,
        shared: &Arc<SessionShared>,
        worker: &Arc<dyn StageWorker>,
        ctx: &StageContext,
        cancel: &CancellationToken,
    ) -> Result<StageOutput, EngineError> {
        worker.validate_input(ctx)?;

        let _worker_slot = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::cancelled("cancelled awaiting worker slot")),
            permit = self.pool.acquire_stage_worker() => permit?,
        };

        let budget = {
            let session = shared.session.read();
            self.effective_budget(session.options(), ctx.stage)
        };
        let progress = BusProgress::new(Arc::clone(&self.bus), ctx.session_id, ctx.stage);

        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::cancelled("cancelled mid-stage")),
            executed = tokio::time::timeout(budget, worker.execute(ctx, &progress)) => match executed {
                Ok(result) => result?,
                Err(_) => {
                    return Err(EngineError::stage_timeout(format!(
                        "stage {} exceeded its {}s budget",
                        ctx.stage,
                        budget.as_secs()
                    )))
                }
            },
        };

        worker.validate_output(ctx, &output)?;
        Ok(output)
    }

    /// Checkpoints a result and journals the version.
    async fn checkpoint(
        &self,
        shared: &Arc<SessionShared>,
        result: StageResult,
        author: VersionAuthor,
        label: String,
        tags: Vec<String>,
    ) -> Result<VersionId, EngineError> {
        let (version_id, version) = {
            let mut log = shared.version_log.lock();
            let version_id = log.checkpoint(result, author, label, tags)?;
            let version = log
                .version(version_id)
                .cloned()
                .ok_or_else(|| EngineError::internal("checkpoint vanished"))?;
            (version_id, version)
        };
        shared.session.write().set_version_head(version_id);
        self.append_journal(shared, JournalRecord::Checkpoint { version: Box::new(version) })
            .await?;
        Ok(version_id)
    }

    /// Final checkpoint of a settled stage: journal, metrics, and the
    /// `stage-completed` publication - in that order.
    async fn settle(
        &self,
        shared: &Arc<SessionShared>,
        stage: StageIndex,
        result: StageResult,
        attempts: u32,
        mut tags: Vec<String>,
        fell_back: bool,
    ) -> StageEnd {
        let session_id = shared.id();
        let quality = result.quality();
        let elapsed_ms = result.elapsed_ms();
        if fell_back && !tags.contains(&"fallback".to_string()) {
            tags.push("fallback".to_string());
        }

        let version_id = match self
            .checkpoint(shared, result.clone(), VersionAuthor::System, format!("{} settled", stage.name()), tags)
            .await
        {
            Ok(version_id) => version_id,
            Err(error) => return StageEnd::Fatal(error),
        };

        {
            let mut metrics = shared.metrics.lock();
            metrics.record_stage(stage, elapsed_ms, attempts, quality.value());
            if fell_back {
                metrics.record_degraded(stage);
            }
            if let StageOutput::SceneImages(images) = result.output() {
                let hits = images.images.iter().filter(|i| i.cache_hit).count() as u32;
                let failures = images.images.iter().filter(|i| i.placeholder).count() as u32;
                metrics.record_fanout(images.images.len() as u32, hits, failures, images.efficiency);
                self.metrics.record_fanout(images.images.len() as u32, hits);
            }
        }
        self.metrics
            .record_stage_settled(stage, elapsed_ms as f64 / 1000.0, attempts.saturating_sub(1), fell_back);

        self.publish(
            session_id,
            EventPayload::StageCompleted {
                stage,
                version_id,
                quality: quality.value(),
                elapsed_ms,
            },
        );
        debug!(session = %session_id, stage = %stage, attempts, fell_back, "stage settled");
        StageEnd::Settled { result, fell_back }
    }

    /// The HITL rendezvous after a settled stage. Returns `Ok(false)` when
    /// the session was cancelled while waiting.
    async fn run_rendezvous(
        &self,
        shared: &Arc<SessionShared>,
        stage: StageIndex,
        result: &StageResult,
        pending_mods: &mut Vec<ModificationDescriptor>,
        cancel: &CancellationToken,
    ) -> Result<bool, EngineError> {
        let session_id = shared.id();
        let quality_level = shared.session.read().options().quality;

        let preview = self.previews.derive(quality_level, result);
        self.append_journal(shared, JournalRecord::Preview { preview: preview.clone() })
            .await?;
        self.publish(session_id, EventPayload::PreviewAvailable { stage, preview });

        shared.session.write().await_feedback(stage)?;
        let timeout = Duration::from_secs(self.config.hitl.timeout_secs);
        let deadline = HitlCoordinator::deadline_for(timeout);
        self.publish(session_id, EventPayload::AwaitingFeedback { stage, deadline });
        shared.metrics.lock().record_hitl_opened();
        self.metrics.record_hitl_opened();

        let outcome = self.hitl.rendezvous(session_id, stage, timeout, cancel).await;
        shared.session.write().resume()?;

        let envelope = match outcome {
            RendezvousOutcome::Cancelled => return Ok(false),
            RendezvousOutcome::Timeout => self.hitl.mint_default_accepted(session_id, stage),
            RendezvousOutcome::Feedback(envelope) => {
                if envelope.origin == FeedbackOrigin::Observer {
                    shared.metrics.lock().record_hitl_feedback();
                    self.metrics.record_hitl_feedback();
                }
                envelope
            }
        };

        self.append_journal(shared, JournalRecord::Feedback { envelope: envelope.clone() })
            .await?;

        // The envelope is archived in the version log so the transition
        // cause is always recorded.
        let author = match ModificationDescriptor::from_envelope(&envelope) {
            Some(descriptor) => {
                pending_mods.push(descriptor);
                VersionAuthor::UserFeedbackApplied
            }
            None => VersionAuthor::System,
        };
        let label = match &envelope.content {
            Some(content) => format!("feedback[{}] {}", envelope.origin.as_str(), content),
            None => format!("feedback[{}]", envelope.origin.as_str()),
        };
        self.checkpoint(shared, result.clone(), author, label, vec![envelope.origin.as_str().to_string()])
            .await?;

        self.publish(
            session_id,
            EventPayload::FeedbackAccepted {
                stage,
                origin: envelope.origin,
                next_stage: stage.next(),
            },
        );
        Ok(true)
    }

    fn build_context(
        &self,
        shared: &Arc<SessionShared>,
        stage: StageIndex,
        attempt: u32,
        pending_mods: &[ModificationDescriptor],
    ) -> StageContext {
        let (quality, submission, elapsed_ms) = {
            let session = shared.session.read();
            (
                session.options().quality,
                session.submission().to_string(),
                session.elapsed_ms(),
            )
        };

        let mut prior = BTreeMap::new();
        {
            let log = shared.version_log.lock();
            for earlier in StageIndex::all().take_while(|s| *s < stage) {
                if let Some(result) = log.current_result(earlier) {
                    prior.insert(earlier.value(), result.output().clone());
                }
            }
        }

        let (stage_scores, stage_attempts) = {
            let metrics = shared.metrics.lock();
            let mut scores = BTreeMap::new();
            let mut attempts = BTreeMap::new();
            for earlier in StageIndex::all().take_while(|s| *s < stage) {
                if let Some(score) = metrics.stage_score(earlier) {
                    scores.insert(earlier.value(), score);
                }
                let spent = shared.session.read().attempts(earlier);
                if spent > 0 {
                    attempts.insert(earlier.value(), spent);
                }
            }
            (scores, attempts)
        };

        StageContext {
            session_id: shared.id(),
            stage,
            attempt,
            quality,
            submission,
            prior,
            modifications: pending_mods.to_vec(),
            stage_scores,
            stage_attempts,
            elapsed_ms,
        }
    }

    async fn finish_cancelled(&self, shared: &Arc<SessionShared>) -> EngineResult<()> {
        let session_id = shared.id();
        shared.session.write().cancel();
        shared.metrics.lock().mark_finished();

        let terminal_state = shared.session.read().state();
        if let Err(error) = self
            .append_journal(
                shared,
                JournalRecord::Terminal {
                    state: terminal_state,
                    artifact_pointer: None,
                },
            )
            .await
        {
            warn!(session = %session_id, error = %error, "terminal journal write failed");
        }
        self.metrics.record_cancelled();
        self.pool.release_memory(shared.session.read().submission().len());
        self.publish(
            session_id,
            EventPayload::PipelineCancelled {
                reason: "cancelled by request".to_string(),
            },
        );
        info!(session = %session_id, "pipeline cancelled");
        Ok(())
    }

    async fn finish_failed(&self, shared: &Arc<SessionShared>, error: EngineError) -> EngineResult<()> {
        let session_id = shared.id();
        shared.session.write().fail()?;
        shared.metrics.lock().mark_finished();

        let terminal_state = shared.session.read().state();
        if let Err(journal_error) = self
            .append_journal(
                shared,
                JournalRecord::Terminal {
                    state: terminal_state,
                    artifact_pointer: None,
                },
            )
            .await
        {
            warn!(session = %session_id, error = %journal_error, "terminal journal write failed");
        }
        self.metrics.record_failed();
        self.pool.release_memory(shared.session.read().submission().len());
        self.publish(
            session_id,
            EventPayload::PipelineFailed {
                error_kind: error.kind().to_string(),
                message: error.to_string(),
            },
        );
        warn!(session = %session_id, error = %error, "pipeline failed");
        Err(error)
    }
}

/// Progress sink publishing monotonic `stage-progress` events.
struct BusProgress {
    bus: Arc<UpdateBus>,
    session_id: SessionId,
    stage: StageIndex,
    last: std::sync::atomic::AtomicU8,
}

impl BusProgress {
    fn new(bus: Arc<UpdateBus>, session_id: SessionId, stage: StageIndex) -> Self {
        Self {
            bus,
            session_id,
            stage,
            last: std::sync::atomic::AtomicU8::new(0),
        }
    }
}

impl ProgressSink for BusProgress {
    fn report(&self, percent: u8) {
        let clamped = percent.min(100);
        let previous = self.last.fetch_max(clamped, std::sync::atomic::Ordering::SeqCst);
        if clamped > previous {
            let _ = self.bus.publish(
                self.session_id,
                EventPayload::StageProgress {
                    stage: self.stage,
                    percent: clamped,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::adapters::scripted_image_model::ScriptedImageModel;
    use crate::infrastructure::adapters::scripted_text_model::ScriptedTextModel;
    use crate::infrastructure::persistence::memory_journal::MemoryJournal;
    use comicforge_domain::QualityLevel;

    fn fast_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.retry.cap_secs = 1;
        config.retry.jitter = 0.0;
        config.hitl.timeout_secs = 1;
        config
    }

    fn engine(config: EngineConfig) -> SessionScheduler {
        EngineBuilder::new(
            config,
            Arc::new(ScriptedTextModel::new()),
            Arc::new(ScriptedImageModel::new()),
            Arc::new(MemoryJournal::new()),
        )
        .build()
        .unwrap()
    }

    fn options_no_hitl() -> SubmissionOptions {
        SubmissionOptions {
            quality: QualityLevel::Medium,
            hitl_enabled: false,
            stage_budget_overrides: None,
            client_token: None,
        }
    }

    #[tokio::test]
    async fn test_happy_path_reaches_completed() {
        let scheduler = engine(fast_config());
        let receipt = scheduler
            .submit(OwnerId::new(), "A courier crosses a flooded city to deliver one letter.".to_string(), options_no_hitl())
            .await
            .unwrap();

        let events = receipt.events.collect_to_end().await.unwrap();
        let completed: Vec<u8> = events
            .iter()
            .filter(|e| e.kind() == "stage-completed")
            .map(|e| e.stage.unwrap().value())
            .collect();
        assert_eq!(completed, vec![1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(events.last().unwrap().kind(), "pipeline-completed");

        scheduler.join_session(receipt.session_id).await.unwrap();
        let session = scheduler.session_snapshot(receipt.session_id).unwrap();
        assert_eq!(session.state(), comicforge_domain::SessionState::Completed);
    }

    #[tokio::test]
    async fn test_admission_at_capacity_creates_no_record() {
        let mut config = fast_config();
        config.limits.max_sessions = 1;
        let scheduler = engine(config);

        let first = scheduler
            .submit(OwnerId::new(), "occupies the only slot for a while".to_string(), options_no_hitl())
            .await
            .unwrap();

        let err = scheduler
            .submit(OwnerId::new(), "rejected".to_string(), options_no_hitl())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "capacity");

        // The rejected submission left no trace
        assert_eq!(scheduler.core.sessions.read().len(), 1);
        first.events.collect_to_end().await.unwrap();
    }

    #[tokio::test]
    async fn test_idempotent_admission_by_client_token() {
        let scheduler = engine(fast_config());
        let owner = OwnerId::new();
        let options = SubmissionOptions {
            client_token: Some("token-1".to_string()),
            hitl_enabled: false,
            ..Default::default()
        };

        let first = scheduler
            .submit(owner, "same story".to_string(), options.clone())
            .await
            .unwrap();
        let second = scheduler.submit(owner, "same story".to_string(), options).await.unwrap();
        assert_eq!(first.session_id, second.session_id);
    }

    #[tokio::test]
    async fn test_checkpoint_precedes_stage_completed() {
        let scheduler = engine(fast_config());
        let receipt = scheduler
            .submit(OwnerId::new(), "A tiny story.".to_string(), options_no_hitl())
            .await
            .unwrap();

        let mut events = receipt.events;
        while let Some(event) = events.recv().await.unwrap() {
            if let EventPayload::StageCompleted { version_id, .. } = &event.payload {
                let log = scheduler.version_log(receipt.session_id).unwrap();
                assert!(log.version(*version_id).is_some(), "checkpoint visible before publication");
            }
        }
    }

    #[tokio::test]
    async fn test_cancel_mid_flight() {
        let scheduler = engine(fast_config());
        let receipt = scheduler
            .submit(OwnerId::new(), "a story to cancel".to_string(), options_no_hitl())
            .await
            .unwrap();

        scheduler.cancel(receipt.session_id).unwrap();
        let events = receipt.events.collect_to_end().await.unwrap();
        assert_eq!(events.last().unwrap().kind(), "pipeline-cancelled");

        // Idempotent after terminal
        scheduler.cancel(receipt.session_id).unwrap();
        let _ = scheduler.join_session(receipt.session_id).await;
        let session = scheduler.session_snapshot(receipt.session_id).unwrap();
        assert_eq!(session.state(), comicforge_domain::SessionState::Cancelled);
    }

    #[tokio::test]
    async fn test_feedback_without_open_rendezvous_is_protocol_error() {
        let scheduler = engine(fast_config());
        let receipt = scheduler
            .submit(OwnerId::new(), "a story".to_string(), options_no_hitl())
            .await
            .unwrap();

        let err = scheduler
            .submit_feedback(receipt.session_id, StageIndex::new(3).unwrap(), FeedbackKind::Skip, None)
            .unwrap_err();
        assert!(err.is_hitl_protocol_error());
        receipt.events.collect_to_end().await.unwrap();
    }
}
