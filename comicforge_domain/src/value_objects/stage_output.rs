// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Stage Output Payloads
//!
//! The shape contract for the seven observable pipeline stages. These types
//! are the engine's only knowledge of what stages produce; the scheduler
//! treats them as opaque, while stage workers, the quality gate, and the diff
//! machinery downcast through the [`StageOutput`] enum.
//!
//! ## Shapes
//!
//! 1. **Concept** - theme, genres, world setting, target audience, estimated
//!    page count
//! 2. **Characters** - the cast with roles, appearance, and personality
//! 3. **Plot** - three acts, key points, scene breakdown with emotional tones
//! 4. **Storyboard** - pages of panels with sizes, camera angles, and draft
//!    dialogue
//! 5. **SceneImages** - one rendered image per panel with its prompt and
//!    cache provenance
//! 6. **Dialogue** - finished dialogue lines with bubble types plus sound
//!    effects
//! 7. **Final** - assembled pages, quality scores, stats, and the artifact
//!    pointer
//!
//! A [`StageOutput::Placeholder`] stands in for any stage that fell back
//! after exhausting its retry budget; the final artifact notes such degraded
//! sections.
//!
//! Payloads are immutable once produced. The content fingerprint is the
//! SHA-256 of the serialized payload and keys previews, cache entries, and
//! structural diffs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::value_objects::panel_id::PanelId;
use crate::value_objects::stage_index::StageIndex;

/// Emotional register of a scene or panel; drives image task priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmotionalTone {
    Calm,
    Buildup,
    Tension,
    Climax,
    Relief,
}

impl EmotionalTone {
    /// Tones that warrant elevated rendering priority.
    pub fn is_peak(&self) -> bool {
        matches!(self, EmotionalTone::Climax | EmotionalTone::Tension)
    }
}

/// Layout size of a storyboard panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PanelSize {
    Small,
    Medium,
    Large,
    Splash,
}

impl PanelSize {
    /// Sizes that warrant elevated rendering priority.
    pub fn is_prominent(&self) -> bool {
        matches!(self, PanelSize::Splash | PanelSize::Large)
    }
}

/// Speech bubble rendering style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BubbleType {
    Speech,
    Thought,
    Shout,
    Whisper,
    Narration,
}

/// An image either referenced by URL or carried inline as base64 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImagePayload {
    Url { url: String },
    Inline { media_type: String, base64: String },
}

impl ImagePayload {
    /// Stable hash of the image content, for per-panel diffing.
    pub fn byte_hash(&self) -> String {
        let bytes = match self {
            ImagePayload::Url { url } => url.as_bytes(),
            ImagePayload::Inline { base64, .. } => base64.as_bytes(),
        };
        hex::encode(&Sha256::digest(bytes)[..16])
    }
}

/// Stage 1 output: story concept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptOutput {
    pub theme: String,
    pub genres: Vec<String>,
    pub world_setting: String,
    pub target_audience: String,
    pub estimated_pages: u32,
}

/// One member of the cast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterSheet {
    pub name: String,
    pub role: String,
    pub appearance: String,
    pub personality: String,
    pub voice: String,
}

/// Stage 2 output: character designs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharactersOutput {
    pub characters: Vec<CharacterSheet>,
}

/// One beat of the scene breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneBeat {
    pub scene: u32,
    pub summary: String,
    pub emotional_tone: EmotionalTone,
}

/// Stage 3 output: three-act plot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotOutput {
    pub act1: String,
    pub act2: String,
    pub act3: String,
    pub key_points: Vec<String>,
    pub scene_breakdown: Vec<SceneBeat>,
}

/// One panel of the storyboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelSpec {
    pub size: PanelSize,
    pub camera_angle: String,
    pub description: String,
    pub emotional_tone: EmotionalTone,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dialogue: Option<String>,
}

/// One storyboard page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageSpec {
    pub number: u32,
    pub panels: Vec<PanelSpec>,
}

/// Stage 4 output: the storyboard ("name" in manga production terms).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryboardOutput {
    pub pages: Vec<PageSpec>,
}

impl StoryboardOutput {
    /// Total number of panels across all pages.
    pub fn panel_count(&self) -> usize {
        self.pages.iter().map(|p| p.panels.len()).sum()
    }
}

/// One rendered panel image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelImage {
    pub panel_id: PanelId,
    pub image: ImagePayload,
    pub prompt: String,
    pub cache_hit: bool,
    /// Set when the renderer fell back to a placeholder for this panel.
    #[serde(default)]
    pub placeholder: bool,
}

/// Stage 5 output: rendered scene images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneImagesOutput {
    pub images: Vec<PanelImage>,
    /// Parallel-efficiency score of the fan-out, in [0, 1].
    pub efficiency: f64,
}

/// One finished dialogue line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueLine {
    pub character: String,
    pub text: String,
    pub bubble_type: BubbleType,
    pub panel_id: PanelId,
}

/// A lettered sound effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoundEffect {
    pub text: String,
    pub panel_id: PanelId,
}

/// Stage 6 output: dialogue and sound effects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueOutput {
    pub dialogues: Vec<DialogueLine>,
    pub sound_effects: Vec<SoundEffect>,
}

/// One assembled page of the final artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalPage {
    pub image: ImagePayload,
    pub panels: Vec<PanelId>,
}

/// Aggregate statistics embedded in the final artifact.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GenerationStats {
    pub total_elapsed_ms: u64,
    pub total_attempts: u32,
    pub image_cache_hits: u32,
    pub panels_rendered: u32,
    /// Stage names that completed with placeholder output.
    pub degraded_sections: Vec<String>,
}

/// Stage 7 output: the final comic artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalOutput {
    pub pages: Vec<FinalPage>,
    pub quality_scores: BTreeMap<String, f64>,
    pub stats: GenerationStats,
    pub output_pointer: String,
}

/// Broad payload class, used by the structural diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadClass {
    Textual,
    Image,
    Composite,
}

/// The output of one pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage-output", rename_all = "kebab-case")]
pub enum StageOutput {
    Concept(ConceptOutput),
    Characters(CharactersOutput),
    Plot(PlotOutput),
    Storyboard(StoryboardOutput),
    SceneImages(SceneImagesOutput),
    Dialogue(DialogueOutput),
    Final(FinalOutput),
    /// Placeholder produced when a non-critical stage exhausted its retries.
    Placeholder { stage: StageIndex, reason: String },
}

impl StageOutput {
    /// The stage this payload belongs to.
    pub fn stage(&self) -> StageIndex {
        let index = match self {
            StageOutput::Concept(_) => 1,
            StageOutput::Characters(_) => 2,
            StageOutput::Plot(_) => 3,
            StageOutput::Storyboard(_) => 4,
            StageOutput::SceneImages(_) => 5,
            StageOutput::Dialogue(_) => 6,
            StageOutput::Final(_) => 7,
            StageOutput::Placeholder { stage, .. } => return *stage,
        };
        StageIndex::new(index).expect("stage literals are in range")
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, StageOutput::Placeholder { .. })
    }

    /// Payload class for structural diffing: stages 1-4 and 6 are textual,
    /// stage 5 is image, stage 7 is composite.
    pub fn payload_class(&self) -> PayloadClass {
        match self {
            StageOutput::SceneImages(_) => PayloadClass::Image,
            StageOutput::Final(_) => PayloadClass::Composite,
            _ => PayloadClass::Textual,
        }
    }

    /// Serializes the payload to a JSON value.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// SHA-256 content fingerprint of the serialized payload.
    ///
    /// Struct fields serialize in declaration order and JSON maps in key
    /// order, so equal payloads always fingerprint identically.
    pub fn fingerprint(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn concept() -> StageOutput {
        StageOutput::Concept(ConceptOutput {
            theme: "found family".to_string(),
            genres: vec!["adventure".to_string()],
            world_setting: "harbor town".to_string(),
            target_audience: "young adult".to_string(),
            estimated_pages: 4,
        })
    }

    #[test]
    fn test_stage_mapping() {
        assert_eq!(concept().stage().value(), 1);
        let placeholder = StageOutput::Placeholder {
            stage: StageIndex::new(5).unwrap(),
            reason: "retries exhausted".to_string(),
        };
        assert_eq!(placeholder.stage().value(), 5);
        assert!(placeholder.is_placeholder());
    }

    #[test]
    fn test_payload_classes() {
        assert_eq!(concept().payload_class(), PayloadClass::Textual);
        let images = StageOutput::SceneImages(SceneImagesOutput {
            images: vec![],
            efficiency: 1.0,
        });
        assert_eq!(images.payload_class(), PayloadClass::Image);
        let fin = StageOutput::Final(FinalOutput {
            pages: vec![],
            quality_scores: BTreeMap::new(),
            stats: GenerationStats::default(),
            output_pointer: "artifact://x".to_string(),
        });
        assert_eq!(fin.payload_class(), PayloadClass::Composite);
    }

    #[test]
    fn test_fingerprint_is_content_addressed() {
        let a = concept();
        let b = concept();
        assert_eq!(a.fingerprint(), b.fingerprint());

        let mut other = concept();
        if let StageOutput::Concept(ref mut c) = other {
            c.theme = "revenge".to_string();
        }
        assert_ne!(a.fingerprint(), other.fingerprint());
    }

    #[test]
    fn test_serde_round_trip() {
        let out = concept();
        let json = serde_json::to_string(&out).unwrap();
        assert!(json.contains("\"stage-output\":\"concept\""));
        let back: StageOutput = serde_json::from_str(&json).unwrap();
        assert_eq!(out, back);
    }

    #[test]
    fn test_tone_and_size_priority_helpers() {
        assert!(EmotionalTone::Climax.is_peak());
        assert!(EmotionalTone::Tension.is_peak());
        assert!(!EmotionalTone::Calm.is_peak());
        assert!(PanelSize::Splash.is_prominent());
        assert!(!PanelSize::Small.is_prominent());
    }
}
