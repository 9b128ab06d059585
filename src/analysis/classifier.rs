// src/analysis/classifier.rs
//
// Slow path of the hybrid counter: classify the buffered window.
//
// Two strategies behind one trait:
//   - RuleBasedClassifier: weighted score over the motion/color/pattern
//     features. Always available, deterministic.
//   - ExternalModelClassifier: wraps a learned frame-sequence model. Any
//     model failure (error, unknown label, non-finite confidence) falls
//     back to the rule-based verdict for that window.

use crate::analysis::features::FeatureSet;
use crate::frame_buffer::FrameWindow;
use crate::types::{Classification, Frame, MotionType};
use anyhow::Result;
use tracing::{debug, warn};

// ============================================================================
// STRATEGY
// ============================================================================

pub struct ClassifierInput<'a> {
    pub window: &'a FrameWindow,
    pub features: &'a FeatureSet,
}

pub trait MotionClassifier: Send {
    fn classify(&mut self, input: &ClassifierInput<'_>) -> Classification;

    fn name(&self) -> &str;

    /// Windows where the primary strategy failed and a fallback answered
    fn fallbacks(&self) -> u64 {
        0
    }
}

// ============================================================================
// RULE-BASED
// ============================================================================

const SPEED_MOVING: f32 = 0.1;
const DIRECTION_CONSISTENT: f32 = 0.7;
const COLOR_CONSISTENT: f32 = 0.8;
const REPETITIVE: f32 = 0.6;
const RHYTHMIC: f32 = 0.5;

const ROW_COMPLETE_CONFIDENCE: f32 = 0.75;
const IN_PROGRESS_CONFIDENCE: f32 = 0.6;
const HAND_MOVEMENT_SPEED: f32 = 0.05;
const IDLE_SPEED: f32 = 0.02;

#[derive(Debug, Default, Clone)]
pub struct RuleBasedClassifier;

impl RuleBasedClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Weighted evidence score, clamped to [0, 1].
    pub fn score(features: &FeatureSet) -> f32 {
        let m = &features.motion;
        let c = &features.color;
        let p = &features.pattern;

        let mut score: f32 = 0.0;
        if m.average_speed > SPEED_MOVING {
            score += 0.3;
        }
        if m.direction_consistency > DIRECTION_CONSISTENT {
            score += 0.3;
        }
        if m.has_completion_signal {
            score += 0.2;
        }
        if c.has_target_color {
            score += 0.3;
        }
        if c.color_consistency > COLOR_CONSISTENT {
            score += 0.2;
        }
        if p.repetition_score > REPETITIVE {
            score += 0.3;
        }
        if p.rhythm_score > RHYTHMIC {
            score += 0.2;
        }
        score.clamp(0.0, 1.0)
    }

    pub fn classify_features(features: &FeatureSet) -> Classification {
        let confidence = Self::score(features);
        let speed = features.motion.average_speed;

        let motion_type = if confidence > ROW_COMPLETE_CONFIDENCE && features.motion.has_completion_signal {
            MotionType::RowComplete
        } else if confidence > IN_PROGRESS_CONFIDENCE {
            MotionType::InProgress
        } else if speed > HAND_MOVEMENT_SPEED && !features.color.has_target_color {
            MotionType::HandMovement
        } else if speed < IDLE_SPEED {
            MotionType::Idle
        } else {
            MotionType::BackgroundNoise
        };

        Classification::new(motion_type, confidence)
    }
}

impl MotionClassifier for RuleBasedClassifier {
    fn classify(&mut self, input: &ClassifierInput<'_>) -> Classification {
        Self::classify_features(input.features)
    }

    fn name(&self) -> &str {
        "rule-based"
    }
}

// ============================================================================
// EXTERNAL MODEL
// ============================================================================

/// Raw answer of a learned model: a free-form label plus its confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelVerdict {
    pub label: String,
    pub confidence: f32,
}

/// A learned classifier over a frame sequence (oldest first).
pub trait FrameClassifier: Send {
    fn classify(&mut self, frames: &[Frame]) -> Result<ModelVerdict>;

    fn name(&self) -> &str;
}

/// Map a model label to a motion type, ignoring case and separators
/// ("row_complete", "RowComplete", "row-complete" are the same label).
pub fn map_label(label: &str) -> Option<MotionType> {
    let key: String = label
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    match key.as_str() {
        "rowcomplete" => Some(MotionType::RowComplete),
        "inprogress" => Some(MotionType::InProgress),
        "idle" => Some(MotionType::Idle),
        "handmovement" => Some(MotionType::HandMovement),
        "backgroundnoise" => Some(MotionType::BackgroundNoise),
        _ => None,
    }
}

pub struct ExternalModelClassifier {
    model: Box<dyn FrameClassifier>,
    fallback: RuleBasedClassifier,
    fallbacks: u64,
}

impl ExternalModelClassifier {
    pub fn new(model: Box<dyn FrameClassifier>) -> Self {
        Self {
            model,
            fallback: RuleBasedClassifier::new(),
            fallbacks: 0,
        }
    }

    fn fall_back(&mut self, input: &ClassifierInput<'_>) -> Classification {
        self.fallbacks += 1;
        self.fallback.classify(input)
    }
}

impl MotionClassifier for ExternalModelClassifier {
    fn classify(&mut self, input: &ClassifierInput<'_>) -> Classification {
        let frames: Vec<Frame> = input.window.contents().cloned().collect();
        match self.model.classify(&frames) {
            Ok(verdict) => match map_label(&verdict.label) {
                Some(motion_type) if verdict.confidence.is_finite() => {
                    Classification::new(motion_type, verdict.confidence)
                }
                Some(_) => {
                    debug!(
                        "{} returned non-finite confidence for '{}', using rules",
                        self.model.name(),
                        verdict.label
                    );
                    self.fall_back(input)
                }
                None => {
                    debug!("{} returned unknown label '{}', using rules", self.model.name(), verdict.label);
                    self.fall_back(input)
                }
            },
            Err(e) => {
                warn!("{} failed: {:#}, using rules", self.model.name(), e);
                self.fall_back(input)
            }
        }
    }

    fn name(&self) -> &str {
        "external-model"
    }

    fn fallbacks(&self) -> u64 {
        self.fallbacks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::features::{ColorFeatures, MotionFeatures, PatternFeatures};
    use anyhow::bail;
    use image::RgbImage;

    fn features(speed: f32, consistency: f32, completion: bool, target_color: bool) -> FeatureSet {
        FeatureSet {
            motion: MotionFeatures {
                average_horizontal_velocity: speed,
                average_vertical_velocity: 0.0,
                average_speed: speed,
                direction_consistency: consistency,
                has_completion_signal: completion,
            },
            color: ColorFeatures {
                average_saturation: if target_color { 0.6 } else { 0.05 },
                color_consistency: 0.5,
                skin_ratio: 0.0,
                has_target_color: target_color,
            },
            pattern: PatternFeatures::default(),
        }
    }

    fn window() -> FrameWindow {
        let mut w = FrameWindow::new(2);
        w.append(Frame::new(RgbImage::new(4, 4)), 0.0);
        w.append(Frame::new(RgbImage::new(4, 4)), 33.0);
        w
    }

    #[test]
    fn test_completed_sweep_is_row_complete() {
        // 0.3 + 0.3 + 0.2 + 0.3 = 1.1, clamped
        let f = features(0.3, 0.9, true, true);
        let c = RuleBasedClassifier::classify_features(&f);
        assert_eq!(c.motion_type, MotionType::RowComplete);
        assert_eq!(c.confidence, 1.0);
        assert!(c.is_target_motion);
    }

    #[test]
    fn test_sweep_without_completion_is_in_progress() {
        let f = features(0.3, 0.9, false, true);
        let c = RuleBasedClassifier::classify_features(&f);
        assert_eq!(c.motion_type, MotionType::InProgress);
        assert!((c.confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_bare_hand_motion() {
        // 0.3 + 0.3 = 0.6, not above the in-progress band
        let f = features(0.3, 0.9, false, false);
        let c = RuleBasedClassifier::classify_features(&f);
        assert_eq!(c.motion_type, MotionType::HandMovement);
        assert!(!c.is_target_motion);
    }

    #[test]
    fn test_still_scene_is_idle() {
        let c = RuleBasedClassifier::classify_features(&FeatureSet::default());
        assert_eq!(c.motion_type, MotionType::Idle);
        assert_eq!(c.confidence, 0.0);
    }

    #[test]
    fn test_slow_drift_is_background_noise() {
        let f = features(0.03, 0.5, false, true);
        let c = RuleBasedClassifier::classify_features(&f);
        assert_eq!(c.motion_type, MotionType::BackgroundNoise);
    }

    #[test]
    fn test_label_mapping_ignores_case_and_separators() {
        assert_eq!(map_label("row_complete"), Some(MotionType::RowComplete));
        assert_eq!(map_label("RowComplete"), Some(MotionType::RowComplete));
        assert_eq!(map_label("IN-PROGRESS"), Some(MotionType::InProgress));
        assert_eq!(map_label("hand movement"), Some(MotionType::HandMovement));
        assert_eq!(map_label("knitting"), None);
    }

    struct ScriptedModel(Result<ModelVerdict, String>);

    impl FrameClassifier for ScriptedModel {
        fn classify(&mut self, frames: &[Frame]) -> Result<ModelVerdict> {
            assert_eq!(frames.len(), 2);
            match &self.0 {
                Ok(v) => Ok(v.clone()),
                Err(msg) => bail!("{}", msg),
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn external(result: Result<ModelVerdict, String>) -> ExternalModelClassifier {
        ExternalModelClassifier::new(Box::new(ScriptedModel(result)))
    }

    #[test]
    fn test_external_model_verdict_used() {
        let mut classifier = external(Ok(ModelVerdict {
            label: "ROW_COMPLETE".into(),
            confidence: 0.92,
        }));
        let w = window();
        let f = FeatureSet::default();
        let c = classifier.classify(&ClassifierInput { window: &w, features: &f });
        assert_eq!(c.motion_type, MotionType::RowComplete);
        assert!((c.confidence - 0.92).abs() < 1e-6);
        assert_eq!(classifier.fallbacks(), 0);
    }

    #[test]
    fn test_external_model_failure_falls_back() {
        let mut classifier = external(Err("model not loaded".into()));
        let w = window();
        let f = FeatureSet::default();
        let c = classifier.classify(&ClassifierInput { window: &w, features: &f });
        assert_eq!(c, RuleBasedClassifier::classify_features(&f));
        assert_eq!(classifier.fallbacks(), 1);
    }

    #[test]
    fn test_unknown_label_and_nan_fall_back() {
        let w = window();
        let f = features(0.3, 0.9, false, false);

        let mut unknown = external(Ok(ModelVerdict {
            label: "purling".into(),
            confidence: 0.9,
        }));
        let c = unknown.classify(&ClassifierInput { window: &w, features: &f });
        assert_eq!(c.motion_type, MotionType::HandMovement);
        assert_eq!(unknown.fallbacks(), 1);

        let mut nan = external(Ok(ModelVerdict {
            label: "idle".into(),
            confidence: f32::NAN,
        }));
        nan.classify(&ClassifierInput { window: &w, features: &f });
        assert_eq!(nan.fallbacks(), 1);
    }
}
