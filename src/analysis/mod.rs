// src/analysis/mod.rs
//
// Vision analysis for the hybrid counter.
//
// Signal flow:
//   frame pair → flow → motion_estimator → MotionVector ─→ proposal (fast path)
//   FrameWindow → features (motion / color / pattern) → classifier ─→ verdict (slow path)
//
// Proposals and verdicts are fused by counting::DebounceController.

pub mod classifier;
pub mod features;
pub mod flow;
pub mod motion_estimator;

pub use classifier::{
    ClassifierInput, ExternalModelClassifier, FrameClassifier, ModelVerdict, MotionClassifier,
    RuleBasedClassifier,
};
pub use features::{extract_features, ColorFeatures, FeatureSet, MotionFeatures, PatternFeatures};
pub use flow::{BlockMatchFlow, DenseFlowField, FlowOptions, OpticalFlow};
#[cfg(feature = "opencv")]
pub use flow::FarnebackFlow;
pub use motion_estimator::{
    evaluate_proposal, motion_confidence, MotionVectorEstimator, ProposalDecision,
};
