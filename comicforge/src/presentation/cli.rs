// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Command-Line Interface
//!
//! Subcommands:
//!
//! - `run <story-file>` - submit a story, stream events to stdout, and
//!   write the final artifact
//! - `replay <session-id>` - reconstruct a journaled session
//! - `sessions` - list journaled sessions
//! - `validate` - validate the engine configuration
//!
//! The CLI wires the scripted model backends; production deployments embed
//! the engine and provide real backends through the model ports.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use comicforge_bootstrap::{watch_interrupt, ShutdownCoordinator};
use comicforge_domain::{EventPayload, OwnerId, QualityLevel, SessionId, SubmissionOptions};

use crate::application::services::scheduler::EngineBuilder;
use crate::application::use_cases::replay_session::ReplaySessionUseCase;
use crate::application::use_cases::run_session::RunSessionUseCase;
use crate::infrastructure::adapters::scripted_image_model::ScriptedImageModel;
use crate::infrastructure::adapters::scripted_text_model::ScriptedTextModel;
use crate::infrastructure::config::engine_config::EngineConfig;
use crate::infrastructure::persistence::journal_writer::FileJournal;

/// Seven-stage comic generation pipeline engine.
#[derive(Parser)]
#[command(name = "comicforge", version, about)]
pub struct Cli {
    /// Engine configuration file (TOML); defaults apply when absent.
    #[arg(long, global = true, default_value = "comicforge.toml")]
    pub config: PathBuf,

    /// Journal root directory.
    #[arg(long, global = true, default_value = "comicforge-journal")]
    pub journal: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Submit a story file and stream the pipeline to completion.
    Run {
        /// Path to the story text.
        story: PathBuf,

        /// Generation quality level.
        #[arg(long, default_value = "medium")]
        quality: QualityLevel,

        /// Open feedback rendezvous at the configured stages (the run
        /// proceeds with defaults when no feedback arrives).
        #[arg(long)]
        hitl: bool,

        /// Write the final artifact JSON here.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Print collected Prometheus metrics after the run.
        #[arg(long)]
        metrics: bool,
    },
    /// Reconstruct a journaled session.
    Replay {
        /// Session id (26-character ULID).
        session: String,
    },
    /// List journaled sessions.
    Sessions,
    /// Validate the configuration file and print the effective settings.
    Validate,
}

/// Executes a parsed CLI invocation.
pub async fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = EngineConfig::load(&cli.config)
        .await
        .with_context(|| format!("loading configuration {:?}", cli.config))?;

    match cli.command {
        Command::Run {
            story,
            quality,
            hitl,
            output,
            metrics,
        } => run(config, cli.journal, story, quality, hitl, output, metrics).await,
        Command::Replay { session } => replay(cli.journal, &session).await,
        Command::Sessions => sessions(cli.journal).await,
        Command::Validate => {
            println!("configuration valid");
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run(
    config: EngineConfig,
    journal_root: PathBuf,
    story_path: PathBuf,
    quality: QualityLevel,
    hitl: bool,
    output: Option<PathBuf>,
    metrics: bool,
) -> anyhow::Result<()> {
    let story = tokio::fs::read_to_string(&story_path)
        .await
        .with_context(|| format!("reading story {:?}", story_path))?;

    let journal = Arc::new(FileJournal::open(&journal_root).await?);
    let scheduler = EngineBuilder::new(
        config,
        Arc::new(ScriptedTextModel::new()),
        Arc::new(ScriptedImageModel::new()),
        journal,
    )
    .build()?;

    let coordinator = ShutdownCoordinator::default();
    watch_interrupt(coordinator.clone());

    let options = SubmissionOptions {
        quality,
        hitl_enabled: hitl,
        stage_budget_overrides: None,
        client_token: None,
    };

    let use_case = RunSessionUseCase::new(scheduler.clone());
    let outcome = use_case
        .run(OwnerId::new(), story, options, coordinator.token(), print_event)
        .await?;

    println!();
    println!("session {} finished: {}", outcome.session_id, outcome.state.as_str());
    if let Some(artifact) = &outcome.artifact {
        println!(
            "artifact: {} ({} pages, quality block over {} stages)",
            artifact.output_pointer,
            artifact.pages.len(),
            artifact.quality_scores.len()
        );
        if !artifact.stats.degraded_sections.is_empty() {
            println!("degraded sections: {}", artifact.stats.degraded_sections.join(", "));
        }
        if let Some(path) = output {
            tokio::fs::write(&path, serde_json::to_vec_pretty(artifact)?)
                .await
                .with_context(|| format!("writing artifact {:?}", path))?;
            println!("artifact written to {:?}", path);
        }
    }
    if metrics {
        println!();
        println!("{}", scheduler.metrics().gather()?);
    }
    Ok(())
}

fn print_event(event: &comicforge_domain::SessionEvent) {
    let stage = event
        .stage
        .map(|s| format!(" stage {}", s))
        .unwrap_or_default();
    match &event.payload {
        EventPayload::StageProgress { percent, .. } => {
            println!("[{:>4}]{} progress {}%", event.sequence, stage, percent);
        }
        EventPayload::StageCompleted { quality, elapsed_ms, .. } => {
            println!("[{:>4}]{} completed (quality {:.2}, {} ms)", event.sequence, stage, quality, elapsed_ms);
        }
        EventPayload::AwaitingFeedback { deadline, .. } => {
            println!("[{:>4}]{} awaiting feedback until {}", event.sequence, stage, deadline.to_rfc3339());
        }
        EventPayload::StageFailed {
            error_kind,
            will_retry,
            fallback,
            ..
        } => {
            println!(
                "[{:>4}]{} failed: {} (retry={}, fallback={})",
                event.sequence, stage, error_kind, will_retry, fallback
            );
        }
        _ => println!("[{:>4}]{} {}", event.sequence, stage, event.kind()),
    }
}

async fn replay(journal_root: PathBuf, session: &str) -> anyhow::Result<()> {
    let session_id = SessionId::parse(session)?;
    let journal = Arc::new(FileJournal::open(&journal_root).await?);
    let report = ReplaySessionUseCase::new(journal).replay(session_id).await?;

    println!("session   {}", report.session_id);
    println!("state     {}{}", report.state.as_str(), if report.recovered { " (recovered)" } else { "" });
    println!("checkpoints {}", report.checkpoints);
    println!("feedback    {}", report.feedback_events);
    if let Some(stage) = report.last_stage {
        println!("last stage  {}", stage);
    }
    if let Some(pointer) = report.artifact_pointer {
        println!("artifact    {}", pointer);
    }
    Ok(())
}

async fn sessions(journal_root: PathBuf) -> anyhow::Result<()> {
    let journal = Arc::new(FileJournal::open(&journal_root).await?);
    let ids = ReplaySessionUseCase::new(journal).list_sessions().await?;
    if ids.is_empty() {
        println!("no journaled sessions");
    }
    for id in ids {
        println!("{}", id);
    }
    Ok(())
}
