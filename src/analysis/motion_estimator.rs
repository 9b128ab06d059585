// src/analysis/motion_estimator.rs
//
// Fast path of the hybrid counter: turns a pair of frames into one averaged
// motion vector over the region of interest, and decides whether that vector
// is strong enough to propose a row.
//
// Flow failures never propagate. The frame is treated as carrying no motion
// data and the failure is counted.

use crate::analysis::flow::{DenseFlowField, FlowOptions, OpticalFlow};
use crate::types::{CounterConfig, Frame, Handedness, MotionVector, NormalizedRect};
use tracing::debug;

pub struct MotionVectorEstimator {
    flow: Box<dyn OpticalFlow>,
    options: FlowOptions,
    failures: u64,
}

impl MotionVectorEstimator {
    pub fn new(flow: Box<dyn OpticalFlow>, options: FlowOptions) -> Self {
        Self {
            flow,
            options,
            failures: 0,
        }
    }

    /// Averaged displacement over `roi`, or None when flow failed or the
    /// region covers no pixel of the flow field.
    pub fn estimate(
        &mut self,
        previous: &Frame,
        current: &Frame,
        roi: &NormalizedRect,
    ) -> Option<MotionVector> {
        match self.flow.compute_flow(previous, current, &self.options) {
            Ok(field) => average_over_roi(&field, roi),
            Err(e) => {
                self.failures += 1;
                debug!("{} flow failed: {:#}", self.flow.name(), e);
                None
            }
        }
    }

    /// Flow computations that failed since construction
    pub fn failures(&self) -> u64 {
        self.failures
    }
}

/// Mean displacement of the pixels inside `roi`. Magnitude is the length of
/// the averaged vector, so opposing motions inside the region cancel out.
pub fn average_over_roi(field: &DenseFlowField, roi: &NormalizedRect) -> Option<MotionVector> {
    let (x0, y0, x1, y1) = roi.pixel_bounds(field.width(), field.height())?;

    let mut sum_x = 0.0f64;
    let mut sum_y = 0.0f64;
    for y in y0..y1 {
        for v in &field.row(y)[x0 as usize..x1 as usize] {
            sum_x += v[0] as f64;
            sum_y += v[1] as f64;
        }
    }

    let n = ((x1 - x0) * (y1 - y0)) as f64;
    Some(MotionVector::new((sum_x / n) as f32, (sum_y / n) as f32))
}

/// Linear mapping from magnitude to a [0, 1] confidence.
pub fn motion_confidence(magnitude: f32, calibration_constant: f32) -> f32 {
    if !(calibration_constant > 0.0) || !magnitude.is_finite() {
        return 0.0;
    }
    (magnitude / calibration_constant).clamp(0.0, 1.0)
}

/// Why a frame did or did not propose a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalDecision {
    Propose,
    Suspended,
    BelowThreshold,
    LowConfidence,
    WrongDirection,
}

impl ProposalDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalDecision::Propose => "propose",
            ProposalDecision::Suspended => "suspended",
            ProposalDecision::BelowThreshold => "below_threshold",
            ProposalDecision::LowConfidence => "low_confidence",
            ProposalDecision::WrongDirection => "wrong_direction",
        }
    }
}

/// Proposal rule, checked in order: not suspended, confidence and magnitude
/// at or above their thresholds, and the horizontal component past the
/// motion threshold in the handedness direction.
pub fn evaluate_proposal(
    vector: &MotionVector,
    confidence: f32,
    config: &CounterConfig,
    is_suspended: bool,
) -> ProposalDecision {
    if is_suspended {
        return ProposalDecision::Suspended;
    }
    if !(confidence >= config.confidence_threshold) {
        return ProposalDecision::LowConfidence;
    }
    if !(vector.magnitude >= config.motion_threshold) {
        return ProposalDecision::BelowThreshold;
    }
    let direction_ok = match config.handedness {
        Handedness::Right => vector.dx > config.motion_threshold,
        Handedness::Left => vector.dx < -config.motion_threshold,
    };
    if !direction_ok {
        return ProposalDecision::WrongDirection;
    }
    ProposalDecision::Propose
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};
    use image::RgbImage;

    struct FixedFlow {
        dx: f32,
        dy: f32,
    }

    impl OpticalFlow for FixedFlow {
        fn compute_flow(&mut self, _: &Frame, current: &Frame, _: &FlowOptions) -> Result<DenseFlowField> {
            Ok(DenseFlowField::uniform(current.width(), current.height(), self.dx, self.dy))
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    struct BrokenFlow;

    impl OpticalFlow for BrokenFlow {
        fn compute_flow(&mut self, _: &Frame, _: &Frame, _: &FlowOptions) -> Result<DenseFlowField> {
            bail!("backend unavailable")
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    fn frame() -> Frame {
        Frame::new(RgbImage::new(20, 10))
    }

    #[test]
    fn test_average_only_inside_roi() {
        // Left half moves right by 1, right half moves left by 1
        let mut vectors = Vec::new();
        for _y in 0..10 {
            for x in 0..20 {
                vectors.push(if x < 10 { [1.0, 0.0] } else { [-1.0, 0.0] });
            }
        }
        let field = DenseFlowField::new(20, 10, vectors).unwrap();

        let left = average_over_roi(&field, &NormalizedRect::new(0.0, 0.0, 0.5, 1.0)).unwrap();
        assert!((left.dx - 1.0).abs() < 1e-6);

        let whole = average_over_roi(&field, &NormalizedRect::full()).unwrap();
        assert!(whole.dx.abs() < 1e-6);
        assert!(whole.magnitude.abs() < 1e-6);
    }

    #[test]
    fn test_estimate_returns_averaged_vector() {
        let mut estimator = MotionVectorEstimator::new(Box::new(FixedFlow { dx: 0.3, dy: -0.4 }), FlowOptions::default());
        let v = estimator
            .estimate(&frame(), &frame(), &NormalizedRect::new(0.2, 0.3, 0.6, 0.5))
            .unwrap();
        assert!((v.dx - 0.3).abs() < 1e-6);
        assert!((v.magnitude - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_flow_failure_yields_none() {
        let mut estimator = MotionVectorEstimator::new(Box::new(BrokenFlow), FlowOptions::default());
        assert!(estimator.estimate(&frame(), &frame(), &NormalizedRect::full()).is_none());
        assert_eq!(estimator.failures(), 1);
    }

    #[test]
    fn test_confidence_saturates() {
        assert!((motion_confidence(0.25, 0.5) - 0.5).abs() < 1e-6);
        assert_eq!(motion_confidence(2.0, 0.5), 1.0);
        assert_eq!(motion_confidence(1.0, 0.0), 0.0);
        assert_eq!(motion_confidence(f32::NAN, 0.5), 0.0);
    }

    #[test]
    fn test_rightward_sweep_is_proposed() {
        let config = CounterConfig::default();
        let v = MotionVector { dx: 0.2, dy: 0.0, magnitude: 0.3 };
        assert_eq!(evaluate_proposal(&v, 0.8, &config, false), ProposalDecision::Propose);
    }

    #[test]
    fn test_leftward_sweep_rejected_for_right_hand() {
        let config = CounterConfig::default();
        let v = MotionVector { dx: -0.2, dy: 0.0, magnitude: 0.3 };
        assert_eq!(evaluate_proposal(&v, 0.8, &config, false), ProposalDecision::WrongDirection);

        let left = CounterConfig {
            handedness: Handedness::Left,
            ..CounterConfig::default()
        };
        assert_eq!(evaluate_proposal(&v, 0.8, &left, false), ProposalDecision::Propose);
    }

    #[test]
    fn test_threshold_order() {
        let config = CounterConfig::default();
        let strong = MotionVector { dx: 0.2, dy: 0.0, magnitude: 0.3 };
        assert_eq!(evaluate_proposal(&strong, 0.6, &config, false), ProposalDecision::LowConfidence);
        assert_eq!(evaluate_proposal(&strong, 0.9, &config, true), ProposalDecision::Suspended);

        let weak = MotionVector { dx: 0.1, dy: 0.0, magnitude: 0.1 };
        assert_eq!(evaluate_proposal(&weak, 0.9, &config, false), ProposalDecision::BelowThreshold);
    }

    #[test]
    fn test_mostly_vertical_motion_rejected() {
        // Strong enough overall, but the horizontal part is under the threshold
        let config = CounterConfig::default();
        let v = MotionVector::new(0.1, 0.3);
        assert_eq!(evaluate_proposal(&v, 0.9, &config, false), ProposalDecision::WrongDirection);
    }
}
