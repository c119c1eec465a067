//! smilegraft: transplant the mouth region of one face photograph onto
//! another (sans-IO).
//!
//! Given a neutral face and a smiling face of the same person, the
//! smiling mouth is aligned to the neutral mouth with a similarity
//! transform, warped into the neutral image, and blended in through a
//! feathered mask:
//!
//! landmarks -> alignment -> warp -> optional color correction ->
//! mask -> composite.
//!
//! This crate has **no I/O dependencies**. Images arrive as in-memory
//! buffers (or bytes, see [`decode_rgb`]) and face landmarks come from
//! an external model behind the [`LandmarkDetector`] trait. File access
//! and logging setup live in `smilegraft-cli`.

pub mod align;
pub mod blur;
pub mod composite;
pub mod decode;
pub mod diagnostics;
pub mod landmarks;
pub mod mask;
pub mod types;
pub mod warp;

pub use align::{SimilarityTransform, align};
pub use composite::{composite, correct_colors};
pub use decode::{decode_rgb, to_detection_gray};
pub use landmarks::{LandmarkDetector, PrecomputedLandmarks, extract_mouth};
pub use mask::{Mask, build_mask};
pub use types::{
    Dimensions, FaceScale, FaceSelection, GraftConfig, GraftError, GrayImage,
    MOUTH_LANDMARK_RANGE, Point, PointSet, RgbImage, StagedGraft,
};
pub use warp::{BORDER_COLOR, warp};

/// Transplant the smiling mouth onto the neutral face.
///
/// `detector` locates landmarks in both images. The output has the
/// neutral image's dimensions.
///
/// # Errors
///
/// Returns [`GraftError::InvalidConfig`] before doing any work if
/// `config` is invalid. Otherwise propagates the first error from
/// landmark extraction, alignment, warping, masking or compositing.
pub fn graft<D>(
    neutral: &RgbImage,
    smiling: &RgbImage,
    detector: &D,
    config: &GraftConfig,
) -> Result<RgbImage, GraftError>
where
    D: LandmarkDetector + ?Sized,
{
    graft_staged(neutral, smiling, detector, config).map(|staged| staged.output)
}

/// Like [`graft`], but returns every intermediate result.
///
/// # Pipeline steps
///
/// 1. Mouth landmarks of the neutral image
/// 2. Mouth landmarks of the smiling image
/// 3. Similarity alignment of the smiling mouth onto the neutral mouth
/// 4. Warp of the smiling image into the neutral geometry
/// 5. Optional color correction of the warped image
/// 6. Feathered mask from the neutral mouth
/// 7. Composite
///
/// # Errors
///
/// See [`graft`].
pub fn graft_staged<D>(
    neutral: &RgbImage,
    smiling: &RgbImage,
    detector: &D,
    config: &GraftConfig,
) -> Result<StagedGraft, GraftError>
where
    D: LandmarkDetector + ?Sized,
{
    diagnostics::graft_staged_with_diagnostics(
        neutral,
        detector,
        smiling,
        detector,
        config,
        &diagnostics::NoClock,
    )
    .map(|(staged, _)| staged)
}

/// Transplant using mouth landmarks supplied by the caller, returning
/// every intermediate as [`graft_staged`] does.
///
/// `neutral_mouth` and `smiling_mouth` must correspond point by point.
///
/// # Errors
///
/// Returns [`GraftError::InvalidConfig`] for an invalid `config`,
/// [`GraftError::PointSetMismatch`] if the point sets differ in length,
/// and otherwise the first error from the pipeline stages.
pub fn graft_with_landmarks(
    neutral: &RgbImage,
    neutral_mouth: &PointSet,
    smiling: &RgbImage,
    smiling_mouth: &PointSet,
    config: &GraftConfig,
) -> Result<StagedGraft, GraftError> {
    diagnostics::run_stages(
        neutral,
        || Ok(neutral_mouth.clone()),
        smiling,
        || Ok(smiling_mouth.clone()),
        config,
        &diagnostics::NoClock,
    )
    .map(|(staged, _)| staged)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::Rgb;

    use super::*;

    /// An 8-point ellipse standing in for a mouth.
    fn mouth(cx: f64, cy: f64, rx: f64, ry: f64) -> PointSet {
        (0..8)
            .map(|i| {
                let a = f64::from(i) * std::f64::consts::TAU / 8.0;
                Point::new(cx + rx * a.cos(), cy + ry * a.sin())
            })
            .collect()
    }

    fn config() -> GraftConfig {
        GraftConfig {
            mouth_landmarks: 0..8,
            ..GraftConfig::default()
        }
    }

    fn neutral() -> RgbImage {
        RgbImage::from_pixel(100, 80, Rgb([50, 60, 70]))
    }

    fn smiling() -> RgbImage {
        RgbImage::from_pixel(120, 90, Rgb([200, 190, 180]))
    }

    /// Detector that tells the two test images apart by size.
    struct BySize {
        neutral: PointSet,
        smiling: PointSet,
    }

    impl LandmarkDetector for BySize {
        fn detect(&self, image: &GrayImage) -> Result<Vec<PointSet>, GraftError> {
            if image.width() == 100 {
                Ok(vec![self.neutral.clone()])
            } else {
                Ok(vec![self.smiling.clone()])
            }
        }
    }

    fn detector() -> BySize {
        BySize {
            neutral: mouth(50.0, 40.0, 20.0, 8.0),
            smiling: mouth(60.0, 45.0, 24.0, 9.6),
        }
    }

    #[test]
    fn output_has_neutral_dimensions() {
        let out = graft(&neutral(), &smiling(), &detector(), &config()).unwrap();
        assert_eq!(out.dimensions(), (100, 80));
    }

    #[test]
    fn mouth_region_comes_from_smiling_image() {
        let out = graft(&neutral(), &smiling(), &detector(), &config()).unwrap();
        let center = out.get_pixel(50, 40).0;
        // Bilinear sampling can land one level low.
        for (got, want) in center.iter().zip([200u8, 190, 180]) {
            assert!(got.abs_diff(want) <= 1, "center {center:?}");
        }
        assert_eq!(*out.get_pixel(2, 2), Rgb([50, 60, 70]));
    }

    #[test]
    fn staged_result_exposes_intermediates() {
        let staged = graft_staged(&neutral(), &smiling(), &detector(), &config()).unwrap();
        assert_eq!(staged.warped.dimensions(), (100, 80));
        assert_eq!(staged.mask.dimensions(), Dimensions::new(100, 80));
        assert!(staged.corrected.is_none());
        assert!((staged.transform.scale() - 20.0 / 24.0).abs() < 1e-9);
        assert!((staged.face_scale.value() - staged.neutral_mouth.spread()).abs() < 1e-12);
    }

    #[test]
    fn color_correction_is_applied_when_enabled() {
        let config = GraftConfig {
            color_correction: true,
            ..config()
        };
        let staged = graft_staged(&neutral(), &smiling(), &detector(), &config).unwrap();
        assert!(staged.corrected.is_some());
    }

    #[test]
    fn supplied_landmarks_match_detected_ones() {
        let d = detector();
        let from_detector = graft(&neutral(), &smiling(), &d, &config()).unwrap();
        let from_points =
            graft_with_landmarks(&neutral(), &d.neutral, &smiling(), &d.smiling, &config())
                .unwrap();
        assert_eq!(from_points.output, from_detector);
    }

    #[test]
    fn timed_and_untimed_runs_agree() {
        let d = detector();
        let config = GraftConfig {
            color_correction: true,
            ..config()
        };
        let plain = graft_staged(&neutral(), &smiling(), &d, &config).unwrap();
        let (timed, _) = diagnostics::graft_staged_with_diagnostics(
            &neutral(),
            &d,
            &smiling(),
            &d,
            &config,
            &diagnostics::NoClock,
        )
        .unwrap();
        assert_eq!(timed.output, plain.output);
        assert_eq!(timed.warped, plain.warped);
        assert_eq!(timed.corrected, plain.corrected);
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let bad = GraftConfig {
            mouth_landmarks: 3..4,
            ..config()
        };
        let result = graft(&neutral(), &smiling(), &detector(), &bad);
        assert!(matches!(result, Err(GraftError::InvalidConfig(_))));
    }

    #[test]
    fn missing_face_aborts() {
        let empty = PrecomputedLandmarks::default();
        let result = graft(&neutral(), &smiling(), &empty, &config());
        assert!(matches!(result, Err(GraftError::NoFaceDetected)));
    }

    #[test]
    fn mismatched_landmark_counts_abort() {
        let d = detector();
        let short: PointSet = d.smiling.points()[..7].iter().copied().collect();
        let result = graft_with_landmarks(&neutral(), &d.neutral, &smiling(), &short, &config());
        assert!(matches!(
            result,
            Err(GraftError::PointSetMismatch { source_len: 7, target_len: 8 })
        ));
    }

    #[test]
    fn coincident_landmarks_abort() {
        let d = detector();
        let collapsed = PointSet::new(vec![Point::new(10.0, 10.0); 8]);
        let result = graft_with_landmarks(&neutral(), &collapsed, &smiling(), &d.smiling, &config());
        assert!(matches!(result, Err(GraftError::DegenerateInput(_))));
    }
}
