// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Feedback Value Objects
//!
//! A HITL rendezvous terminates with a [`FeedbackEnvelope`]: either a real
//! observer intervention (free text or a quick-option key), a skip, or a
//! synthetic envelope the coordinator mints on timeout so the version log
//! always records why the transition occurred.
//!
//! An envelope applies to at most one stage transition. The coordinator
//! translates accepted envelopes into [`ModificationDescriptor`]s, which are
//! appended to the next stage's input; how a stage interprets a descriptor is
//! stage-specific (text stages bias their prompts, the image stage adjusts
//! style parameters).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::services::datetime_serde;
use crate::value_objects::generic_id::SessionId;
use crate::value_objects::stage_index::StageIndex;

/// What kind of feedback the observer submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FeedbackKind {
    NaturalLanguage,
    QuickOption,
    Skip,
}

/// How the envelope came to exist, recorded in the version log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FeedbackOrigin {
    /// A connected observer intervened before the deadline.
    Observer,
    /// The rendezvous timed out; the coordinator accepted the default.
    DefaultAccepted,
    /// The observer explicitly skipped; equivalent to timeout but labelled.
    UserSkipped,
}

impl FeedbackOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackOrigin::Observer => "observer",
            FeedbackOrigin::DefaultAccepted => "default-accepted",
            FeedbackOrigin::UserSkipped => "user-skipped",
        }
    }
}

/// A single feedback intervention addressed to one (session, stage).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEnvelope {
    pub session_id: SessionId,
    pub stage: StageIndex,
    pub sequence: u64,
    pub kind: FeedbackKind,
    /// Free text or a quick-option key; absent for skip and synthetic
    /// envelopes.
    pub content: Option<String>,
    pub origin: FeedbackOrigin,
    #[serde(with = "datetime_serde")]
    pub received_at: DateTime<Utc>,
}

impl FeedbackEnvelope {
    /// An envelope submitted by an external observer.
    pub fn observer(
        session_id: SessionId,
        stage: StageIndex,
        sequence: u64,
        kind: FeedbackKind,
        content: Option<String>,
    ) -> Self {
        let origin = match kind {
            FeedbackKind::Skip => FeedbackOrigin::UserSkipped,
            _ => FeedbackOrigin::Observer,
        };
        Self {
            session_id,
            stage,
            sequence,
            kind,
            content,
            origin,
            received_at: Utc::now(),
        }
    }

    /// The synthetic envelope minted when the rendezvous timer expires.
    pub fn default_accepted(session_id: SessionId, stage: StageIndex, sequence: u64) -> Self {
        Self {
            session_id,
            stage,
            sequence,
            kind: FeedbackKind::Skip,
            content: None,
            origin: FeedbackOrigin::DefaultAccepted,
            received_at: Utc::now(),
        }
    }

    /// Whether the engine minted this envelope rather than an observer.
    pub fn is_synthetic(&self) -> bool {
        self.origin == FeedbackOrigin::DefaultAccepted
    }
}

/// Aspect of the work a modification addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModificationType {
    Pacing,
    Tone,
    Detail,
    Style,
    Character,
    FreeForm,
}

/// Direction of an adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    Increase,
    Decrease,
}

/// How strongly a stage should apply the modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Intensity {
    Subtle,
    Moderate,
    Strong,
}

/// Structured modification appended to the next stage's input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModificationDescriptor {
    pub modification_type: ModificationType,
    /// What the modification targets, e.g. "pacing" or a character name.
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    pub intensity: Intensity,
    /// Verbatim observer text for free-form feedback.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addition: Option<String>,
}

impl ModificationDescriptor {
    /// Translates an accepted envelope into a descriptor.
    ///
    /// Returns `None` for skips and synthetic envelopes: those transitions
    /// carry no modification.
    pub fn from_envelope(envelope: &FeedbackEnvelope) -> Option<Self> {
        match envelope.kind {
            FeedbackKind::Skip => None,
            FeedbackKind::NaturalLanguage => {
                let text = envelope.content.as_deref()?.trim();
                if text.is_empty() {
                    return None;
                }
                Some(Self {
                    modification_type: ModificationType::FreeForm,
                    target: "directive".to_string(),
                    direction: None,
                    intensity: Intensity::Moderate,
                    addition: Some(text.to_string()),
                })
            }
            FeedbackKind::QuickOption => Self::from_quick_option(envelope.content.as_deref()?),
        }
    }

    /// Known quick-option keys. Unknown keys yield no descriptor; the
    /// transition still happens, as with a skip.
    fn from_quick_option(key: &str) -> Option<Self> {
        let (modification_type, target, direction) = match key {
            "faster-pacing" => (ModificationType::Pacing, "pacing", Some(Direction::Increase)),
            "slower-pacing" => (ModificationType::Pacing, "pacing", Some(Direction::Decrease)),
            "brighter-tone" => (ModificationType::Tone, "tone", Some(Direction::Increase)),
            "darker-tone" => (ModificationType::Tone, "tone", Some(Direction::Decrease)),
            "more-detail" => (ModificationType::Detail, "detail", Some(Direction::Increase)),
            "less-detail" => (ModificationType::Detail, "detail", Some(Direction::Decrease)),
            "bolder-style" => (ModificationType::Style, "style", Some(Direction::Increase)),
            "softer-style" => (ModificationType::Style, "style", Some(Direction::Decrease)),
            _ => return None,
        };
        Some(Self {
            modification_type,
            target: target.to_string(),
            direction,
            intensity: Intensity::Moderate,
            addition: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(kind: FeedbackKind, content: Option<&str>) -> FeedbackEnvelope {
        FeedbackEnvelope::observer(
            SessionId::new(),
            StageIndex::new(3).unwrap(),
            0,
            kind,
            content.map(str::to_string),
        )
    }

    #[test]
    fn test_quick_option_translation() {
        let descriptor =
            ModificationDescriptor::from_envelope(&envelope(FeedbackKind::QuickOption, Some("faster-pacing")))
                .unwrap();
        assert_eq!(descriptor.modification_type, ModificationType::Pacing);
        assert_eq!(descriptor.direction, Some(Direction::Increase));
        assert_eq!(descriptor.target, "pacing");
    }

    #[test]
    fn test_unknown_quick_option_is_no_modification() {
        assert!(ModificationDescriptor::from_envelope(&envelope(FeedbackKind::QuickOption, Some("add-dragons")))
            .is_none());
    }

    #[test]
    fn test_free_text_becomes_free_form() {
        let descriptor =
            ModificationDescriptor::from_envelope(&envelope(FeedbackKind::NaturalLanguage, Some("  more rain  ")))
                .unwrap();
        assert_eq!(descriptor.modification_type, ModificationType::FreeForm);
        assert_eq!(descriptor.addition.as_deref(), Some("more rain"));
    }

    #[test]
    fn test_skip_and_timeout_carry_no_modification() {
        let skip = envelope(FeedbackKind::Skip, None);
        assert_eq!(skip.origin, FeedbackOrigin::UserSkipped);
        assert!(ModificationDescriptor::from_envelope(&skip).is_none());

        let synthetic = FeedbackEnvelope::default_accepted(SessionId::new(), StageIndex::new(6).unwrap(), 1);
        assert!(synthetic.is_synthetic());
        assert!(ModificationDescriptor::from_envelope(&synthetic).is_none());
    }
}
