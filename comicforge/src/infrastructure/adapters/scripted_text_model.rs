// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Scripted Text Model
//!
//! Deterministic, template-driven implementation of the text model port.
//! It backs the CLI demo and the test suite: given the same submission it
//! always produces the same drafts, derived from a content hash rather than
//! any randomness, so end-to-end runs are reproducible.
//!
//! The adapter also supports failure injection (per-stage error queues) so
//! tests can exercise the retry, fallback, and failure paths without a real
//! backend.

use std::collections::HashMap;
use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use comicforge_domain::services::{TextGenRequest, TextGenResponse, TextModelService};
use comicforge_domain::{
    BubbleType, CharacterSheet, CharactersOutput, ConceptOutput, DialogueLine, DialogueOutput, EmotionalTone,
    EngineError, PageSpec, PanelId, PanelSize, PanelSpec, PlotOutput, SceneBeat, SoundEffect, StoryboardOutput,
};

use crate::infrastructure::stages::finalize::FinalDraft;

const THEMES: [&str; 6] = [
    "belonging",
    "second chances",
    "the cost of ambition",
    "found family",
    "truth and memory",
    "coming of age",
];

const GENRES: [&str; 6] = ["adventure", "mystery", "slice of life", "fantasy", "drama", "science fiction"];

const AUDIENCES: [&str; 4] = ["all-ages", "teen", "young adult", "adult"];

const NAMES: [&str; 8] = ["Aki", "Rin", "Soren", "Mirelle", "Taro", "Iris", "Kestrel", "Noa"];

const CAMERA_ANGLES: [&str; 5] = ["wide establishing", "medium shot", "close-up", "low angle", "over-the-shoulder"];

const TONE_CYCLE: [EmotionalTone; 5] = [
    EmotionalTone::Calm,
    EmotionalTone::Buildup,
    EmotionalTone::Tension,
    EmotionalTone::Climax,
    EmotionalTone::Relief,
];

/// Deterministic text backend with per-stage failure injection.
pub struct ScriptedTextModel {
    failures: Mutex<HashMap<u8, VecDeque<EngineError>>>,
}

impl ScriptedTextModel {
    pub fn new() -> Self {
        Self {
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Queues an error to be returned by the next call for `stage`.
    pub fn inject_failure(&self, stage: u8, error: EngineError) {
        self.failures.lock().entry(stage).or_default().push_back(error);
    }

    fn take_injected(&self, stage: u8) -> Option<EngineError> {
        self.failures.lock().get_mut(&stage).and_then(VecDeque::pop_front)
    }

    fn draft(&self, request: &TextGenRequest) -> Result<String, EngineError> {
        let submission = request
            .context
            .get("submission")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let seed = seed_bytes(&format!("{}|{}", request.stage.value(), submission));

        let content = match request.stage.value() {
            1 => serde_json::to_string(&concept_draft(&submission, &seed))?,
            2 => serde_json::to_string(&characters_draft(&request.context, &seed))?,
            3 => serde_json::to_string(&plot_draft(&request.context, &seed))?,
            4 => serde_json::to_string(&storyboard_draft(&request.context, &seed))?,
            6 => serde_json::to_string(&dialogue_draft(&request.context)?)?,
            7 => serde_json::to_string(&final_draft(&request.context, &seed))?,
            other => {
                return Err(EngineError::ai_fatal(format!(
                    "scripted text model has no template for stage {}",
                    other
                )))
            }
        };
        Ok(content)
    }
}

impl Default for ScriptedTextModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextModelService for ScriptedTextModel {
    async fn generate(&self, request: TextGenRequest) -> Result<TextGenResponse, EngineError> {
        if let Some(error) = self.take_injected(request.stage.value()) {
            return Err(error);
        }
        let content = self.draft(&request)?;
        let latency_ms = 3 + (content.len() as u64 / 64);
        let tokens = (content.len() / 4) as u32;
        Ok(TextGenResponse {
            content,
            model: "scripted-text-v1".to_string(),
            latency_ms,
            tokens,
        })
    }
}

fn seed_bytes(input: &str) -> [u8; 32] {
    Sha256::digest(input.as_bytes()).into()
}

fn pick<'a>(pool: &'a [&'a str], seed: u8) -> &'a str {
    pool[seed as usize % pool.len()]
}

fn first_sentence(text: &str) -> String {
    let sentence = text.split(['.', '!', '?']).next().unwrap_or(text).trim();
    let mut out: String = sentence.chars().take(80).collect();
    if out.is_empty() {
        out = "an unnamed place".to_string();
    }
    out
}

fn concept_draft(submission: &str, seed: &[u8; 32]) -> ConceptOutput {
    let words = submission.split_whitespace().count();
    let estimated_pages = ((words / 60) as u32 + 2).min(8);
    ConceptOutput {
        theme: pick(&THEMES, seed[0]).to_string(),
        genres: vec![pick(&GENRES, seed[1]).to_string(), pick(&GENRES, seed[2]).to_string()],
        world_setting: first_sentence(submission),
        target_audience: pick(&AUDIENCES, seed[3]).to_string(),
        estimated_pages,
    }
}

fn characters_draft(context: &serde_json::Value, seed: &[u8; 32]) -> CharactersOutput {
    let theme = context
        .pointer("/concept/theme")
        .and_then(|v| v.as_str())
        .unwrap_or("resolve")
        .to_string();
    let count = 2 + (seed[4] % 2) as usize;
    let roles = ["protagonist", "antagonist", "supporting"];
    let characters = (0..count)
        .map(|i| {
            let name = pick(&NAMES, seed[5 + i]);
            CharacterSheet {
                name: name.to_string(),
                role: roles[i % roles.len()].to_string(),
                appearance: format!("{} build, expressive eyes, travel-worn clothes", pick(&["slight", "sturdy", "tall"], seed[8 + i])),
                personality: format!("{}, carrying the weight of {}", pick(&["guarded", "earnest", "wry"], seed[11 + i]), theme),
                voice: pick(&["clipped", "warm", "measured"], seed[14 + i]).to_string(),
            }
        })
        .collect();
    CharactersOutput { characters }
}

fn plot_draft(context: &serde_json::Value, seed: &[u8; 32]) -> PlotOutput {
    let theme = context
        .pointer("/concept/theme")
        .and_then(|v| v.as_str())
        .unwrap_or("resolve")
        .to_string();
    let setting = context
        .pointer("/concept/world_setting")
        .and_then(|v| v.as_str())
        .unwrap_or("an unnamed place")
        .to_string();
    let protagonist = context
        .pointer("/characters/characters/0/name")
        .and_then(|v| v.as_str())
        .unwrap_or("the lead")
        .to_string();
    let pages = context
        .pointer("/concept/estimated_pages")
        .and_then(|v| v.as_u64())
        .unwrap_or(2) as u32;

    let scenes = pages.max(2) + 1;
    let scene_breakdown = (0..scenes)
        .map(|i| SceneBeat {
            scene: i + 1,
            summary: format!("{} confronts what {} demands of them in {}", protagonist, theme, setting),
            emotional_tone: TONE_CYCLE[(i as usize + seed[16] as usize) % TONE_CYCLE.len()],
        })
        .collect();

    PlotOutput {
        act1: format!("{} arrives in {} chasing {}", protagonist, setting, theme),
        act2: format!("Old debts surface and {} must choose a side", protagonist),
        act3: format!("{} pays the price and earns {}", protagonist, theme),
        key_points: vec![
            format!("the arrival in {}", setting),
            "the betrayal at the midpoint".to_string(),
            format!("the final reckoning over {}", theme),
        ],
        scene_breakdown,
    }
}

fn storyboard_draft(context: &serde_json::Value, seed: &[u8; 32]) -> StoryboardOutput {
    let pages = context
        .pointer("/concept/estimated_pages")
        .and_then(|v| v.as_u64())
        .unwrap_or(2) as u32;
    let beats: Vec<serde_json::Value> = context
        .pointer("/plot/scene_breakdown")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    // Pacing feedback shifts panel density: faster pacing, fewer panels.
    let pacing_shift: i64 = context
        .pointer("/modifications")
        .and_then(|v| v.as_array())
        .map(|mods| {
            mods.iter()
                .filter(|m| m.get("modification_type").and_then(|t| t.as_str()) == Some("pacing"))
                .map(|m| match m.get("direction").and_then(|d| d.as_str()) {
                    Some("increase") => -1,
                    Some("decrease") => 1,
                    _ => 0,
                })
                .sum()
        })
        .unwrap_or(0);

    let pages = (1..=pages)
        .map(|number| {
            let base_panels = 2 + (seed[(number as usize) % 32] % 3) as i64;
            let panel_count = (base_panels + pacing_shift).clamp(1, 5) as u32;
            let panels = (1..=panel_count)
                .map(|index| {
                    let beat = beats.get(((number - 1) + (index - 1)) as usize % beats.len().max(1));
                    let tone = beat
                        .and_then(|b| b.get("emotional_tone"))
                        .and_then(|t| serde_json::from_value::<EmotionalTone>(t.clone()).ok())
                        .unwrap_or(EmotionalTone::Calm);
                    let description = beat
                        .and_then(|b| b.get("summary"))
                        .and_then(|s| s.as_str())
                        .unwrap_or("a quiet beat between movements")
                        .to_string();
                    let size = if number == 1 && index == 1 {
                        PanelSize::Splash
                    } else if matches!(tone, EmotionalTone::Climax) {
                        PanelSize::Large
                    } else if index % 2 == 0 {
                        PanelSize::Medium
                    } else {
                        PanelSize::Small
                    };
                    PanelSpec {
                        size,
                        camera_angle: pick(&CAMERA_ANGLES, seed[(index as usize + 7) % 32]).to_string(),
                        description,
                        emotional_tone: tone,
                        dialogue: (index % 2 == 1).then(|| "…".to_string()),
                    }
                })
                .collect();
            PageSpec { number, panels }
        })
        .collect();

    StoryboardOutput { pages }
}

fn dialogue_draft(context: &serde_json::Value) -> Result<DialogueOutput, EngineError> {
    let storyboard: StoryboardOutput = serde_json::from_value(
        context
            .get("storyboard")
            .cloned()
            .ok_or_else(|| EngineError::ai_fatal("dialogue draft requires a storyboard in context"))?,
    )
    .map_err(|e| EngineError::ai_fatal(format!("malformed storyboard context: {}", e)))?;

    let mut cast: Vec<String> = context
        .pointer("/characters/characters")
        .and_then(|v| v.as_array())
        .map(|chars| {
            chars
                .iter()
                .filter_map(|c| c.get("name").and_then(|n| n.as_str()).map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    if cast.is_empty() {
        cast.push("Narrator".to_string());
    }

    let bubble_cycle = [BubbleType::Speech, BubbleType::Thought, BubbleType::Speech, BubbleType::Shout];
    let mut dialogues = Vec::new();
    let mut sound_effects = Vec::new();
    let mut line = 0usize;

    for page in &storyboard.pages {
        for (index, panel) in page.panels.iter().enumerate() {
            let panel_id = PanelId::new(page.number, index as u32 + 1)
                .map_err(|e| EngineError::ai_fatal(format!("storyboard panel out of range: {}", e)))?;
            if panel.dialogue.is_some() {
                let speaker = &cast[line % cast.len()];
                dialogues.push(DialogueLine {
                    character: speaker.clone(),
                    text: format!("{}…", panel.description.chars().take(40).collect::<String>()),
                    bubble_type: bubble_cycle[line % bubble_cycle.len()],
                    panel_id,
                });
                line += 1;
            }
            if panel.emotional_tone.is_peak() {
                sound_effects.push(SoundEffect {
                    text: if matches!(panel.emotional_tone, EmotionalTone::Climax) {
                        "KRAKOOM".to_string()
                    } else {
                        "thrum".to_string()
                    },
                    panel_id,
                });
            }
        }
    }

    Ok(DialogueOutput {
        dialogues,
        sound_effects,
    })
}

fn final_draft(context: &serde_json::Value, seed: &[u8; 32]) -> FinalDraft {
    let pages = context.pointer("/pages").and_then(|v| v.as_u64()).unwrap_or(1) as u32;
    let theme = context
        .pointer("/concept/theme")
        .and_then(|v| v.as_str())
        .unwrap_or("the long road");
    FinalDraft {
        title: format!("{} ({})", capitalise(theme), pick(&["one-shot", "short", "episode 1"], seed[20])),
        page_order: (1..=pages).collect(),
    }
}

fn capitalise(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
