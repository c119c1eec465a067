//! Per-stage timing and metrics for a graft run.
//!
//! Every entry point runs the stages through `run_stages`;
//! [`graft_staged_with_diagnostics`] exposes what it records: how long
//! each stage took
//! together with a few numbers that are useful when tuning the feather
//! and color-correction fractions.
//!
//! Time is read through the [`Clock`] trait so the library never touches
//! a platform clock itself; the CLI supplies one backed by
//! `std::time::Instant`.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::align::{SimilarityTransform, align};
use crate::composite::{composite, correct_colors};
use crate::decode::to_detection_gray;
use crate::landmarks::{LandmarkDetector, extract_mouth};
use crate::mask::build_mask;
use crate::types::{Dimensions, FaceScale, GraftConfig, GraftError, PointSet, RgbImage, StagedGraft};
use crate::warp::warp;

/// Source of monotonic time for stage measurements.
pub trait Clock {
    /// Opaque point in time.
    type Instant;

    /// The current instant.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Diagnostics collected from a single graft run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraftDiagnostics {
    /// Mouth landmarks of the neutral image.
    pub neutral_landmarks: StageDiagnostics,
    /// Mouth landmarks of the smiling image.
    pub smiling_landmarks: StageDiagnostics,
    /// Procrustes alignment.
    pub alignment: StageDiagnostics,
    /// Warp of the smiling image into the neutral geometry.
    pub warp: StageDiagnostics,
    /// Color correction (only when `config.color_correction == true`).
    pub color_correction: Option<StageDiagnostics>,
    /// Feathered mask.
    pub mask: StageDiagnostics,
    /// Final blend.
    pub composite: StageDiagnostics,
    /// Wall-clock duration of the whole run (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary of the run.
    pub summary: GraftSummary,
}

/// Diagnostics for a single stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Landmark extraction.
    Landmarks {
        /// Mouth points extracted.
        points: usize,
        /// Pooled standard deviation of the mouth points, in pixels.
        spread: f64,
    },
    /// Similarity alignment.
    Align {
        /// Uniform scale factor.
        scale: f64,
        /// Rotation in degrees.
        rotation_deg: f64,
        /// Horizontal translation in pixels.
        tx: f64,
        /// Vertical translation in pixels.
        ty: f64,
        /// RMS distance between the transformed smiling mouth and the
        /// neutral mouth, in pixels.
        residual_rms: f64,
    },
    /// Warp.
    Warp {
        /// Output width in pixels.
        width: u32,
        /// Output height in pixels.
        height: u32,
    },
    /// Color correction.
    ColorCorrect {
        /// Blur kernel size in pixels.
        kernel_size: u32,
    },
    /// Mask construction.
    Mask {
        /// Feather kernel size in pixels.
        feather_size: u32,
        /// Mean mask weight over the canvas.
        coverage: f64,
    },
    /// Compositing.
    Composite {
        /// Pixels that differ from the neutral image.
        changed_pixels: u64,
        /// Total pixel count.
        total_pixels: u64,
    },
}

/// High-level summary of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraftSummary {
    /// Neutral (output) image width.
    pub image_width: u32,
    /// Neutral (output) image height.
    pub image_height: u32,
    /// Mouth landmarks per face.
    pub mouth_points: usize,
    /// Face scale used to size kernels.
    pub face_scale: f64,
}

impl GraftDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Graft Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Image: {}x{}  |  Mouth points: {}  |  Face scale: {:.2}px",
            self.summary.image_width,
            self.summary.image_height,
            self.summary.mouth_points,
            self.summary.face_scale,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        for (name, diag) in self.stages() {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<24} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.join("\n")
    }

    /// Executed stages in pipeline order, with display names.
    #[must_use]
    pub fn stages(&self) -> Vec<(&'static str, &StageDiagnostics)> {
        let mut stages = vec![
            ("Neutral Landmarks", &self.neutral_landmarks),
            ("Smiling Landmarks", &self.smiling_landmarks),
            ("Alignment", &self.alignment),
            ("Warp", &self.warp),
        ];
        if let Some(ref cc) = self.color_correction {
            stages.push(("Color Correction", cc));
        }
        stages.push(("Mask", &self.mask));
        stages.push(("Composite", &self.composite));
        stages
    }
}

/// [`Clock`] that never advances, for runs whose timings are discarded.
pub(crate) struct NoClock;

impl Clock for NoClock {
    type Instant = ();

    fn now(&self) {}

    fn elapsed(&self, _since: &()) -> Duration {
        Duration::ZERO
    }
}

/// Run the full pipeline, timing every stage.
///
/// Each image has its own detector so landmarks computed separately
/// per image (e.g. [`PrecomputedLandmarks`](crate::PrecomputedLandmarks))
/// can be supplied.
///
/// # Errors
///
/// Propagates any [`GraftError`] from the stages, after validating the
/// configuration.
pub fn graft_staged_with_diagnostics<N, S, C>(
    neutral: &RgbImage,
    neutral_detector: &N,
    smiling: &RgbImage,
    smiling_detector: &S,
    config: &GraftConfig,
    clock: &C,
) -> Result<(StagedGraft, GraftDiagnostics), GraftError>
where
    N: LandmarkDetector + ?Sized,
    S: LandmarkDetector + ?Sized,
    C: Clock,
{
    run_stages(
        neutral,
        || extract_mouth(neutral_detector, &to_detection_gray(neutral), config),
        smiling,
        || extract_mouth(smiling_detector, &to_detection_gray(smiling), config),
        config,
        clock,
    )
}

/// The single graft pipeline behind every public entry point.
///
/// `neutral_mouth` and `smiling_mouth` produce the landmarks for the
/// first two stages; they run only after `config` validates.
pub(crate) fn run_stages<FN, FS, C>(
    neutral: &RgbImage,
    neutral_mouth: FN,
    smiling: &RgbImage,
    smiling_mouth: FS,
    config: &GraftConfig,
    clock: &C,
) -> Result<(StagedGraft, GraftDiagnostics), GraftError>
where
    FN: FnOnce() -> Result<PointSet, GraftError>,
    FS: FnOnce() -> Result<PointSet, GraftError>,
    C: Clock,
{
    config.validate()?;
    let total_start = clock.now();

    // 1-2. Landmarks.
    let (neutral_mouth, neutral_landmarks) = timed(clock, || {
        let mouth = neutral_mouth()?;
        let metrics = landmark_metrics(&mouth);
        Ok((mouth, metrics))
    })?;

    let (smiling_mouth, smiling_landmarks) = timed(clock, || {
        let mouth = smiling_mouth()?;
        let metrics = landmark_metrics(&mouth);
        Ok((mouth, metrics))
    })?;

    // 3. Alignment: smiling coordinates -> neutral coordinates.
    let (transform, alignment) = timed(clock, || {
        let transform = align(&smiling_mouth, &neutral_mouth)?;
        let [[_, _, tx], [_, _, ty]] = transform.rows();
        let metrics = StageMetrics::Align {
            scale: transform.scale(),
            rotation_deg: transform.rotation().to_degrees(),
            tx,
            ty,
            residual_rms: residual_rms(&transform, &smiling_mouth, &neutral_mouth),
        };
        Ok((transform, metrics))
    })?;

    // 4. Warp into the neutral canvas.
    let dims = Dimensions::of(neutral);
    let (warped, warp_diag) = timed(clock, || {
        let warped = warp(smiling, &transform, dims.width, dims.height)?;
        Ok((
            warped,
            StageMetrics::Warp {
                width: dims.width,
                height: dims.height,
            },
        ))
    })?;

    // Kernel sizes follow the neutral face.
    let face_scale = FaceScale::of(&neutral_mouth);

    // 5. Optional color correction.
    let (corrected, color_correction) = if config.color_correction {
        let (corrected, diag) = timed(clock, || {
            let corrected = correct_colors(&warped, neutral, face_scale, config.color_blur_fraction)?;
            Ok((
                corrected,
                StageMetrics::ColorCorrect {
                    kernel_size: face_scale.color_blur_size(config.color_blur_fraction),
                },
            ))
        })?;
        (Some(corrected), Some(diag))
    } else {
        (None, None)
    };

    // 6. Mask.
    let (mask, mask_diag) = timed(clock, || {
        let mask = build_mask(&neutral_mouth, dims, face_scale, config.feather_fraction)?;
        let metrics = StageMetrics::Mask {
            feather_size: face_scale.feather_size(config.feather_fraction),
            coverage: mask.coverage(),
        };
        Ok((mask, metrics))
    })?;

    // 7. Composite.
    let (output, composite_diag) = timed(clock, || {
        let source = corrected.as_ref().unwrap_or(&warped);
        let output = composite(source, neutral, &mask)?;
        let changed_pixels = output
            .pixels()
            .zip(neutral.pixels())
            .map(|(a, b)| u64::from(a != b))
            .sum();
        let metrics = StageMetrics::Composite {
            changed_pixels,
            total_pixels: u64::from(dims.width) * u64::from(dims.height),
        };
        Ok((output, metrics))
    })?;

    tracing::debug!(
        dimensions = %dims,
        face_scale = face_scale.value(),
        color_correction = config.color_correction,
        "graft complete"
    );

    let diagnostics = GraftDiagnostics {
        neutral_landmarks,
        smiling_landmarks,
        alignment,
        warp: warp_diag,
        color_correction,
        mask: mask_diag,
        composite: composite_diag,
        total_duration: clock.elapsed(&total_start),
        summary: GraftSummary {
            image_width: dims.width,
            image_height: dims.height,
            mouth_points: neutral_mouth.len(),
            face_scale: face_scale.value(),
        },
    };

    let staged = StagedGraft {
        neutral_mouth,
        smiling_mouth,
        transform,
        face_scale,
        warped,
        corrected,
        mask,
        output,
    };
    Ok((staged, diagnostics))
}

/// Run `stage` and wrap its metrics with the elapsed time.
fn timed<C, T, F>(clock: &C, stage: F) -> Result<(T, StageDiagnostics), GraftError>
where
    C: Clock,
    F: FnOnce() -> Result<(T, StageMetrics), GraftError>,
{
    let start = clock.now();
    let (value, metrics) = stage()?;
    let duration = clock.elapsed(&start);
    Ok((value, StageDiagnostics { duration, metrics }))
}

fn landmark_metrics(mouth: &PointSet) -> StageMetrics {
    StageMetrics::Landmarks {
        points: mouth.len(),
        spread: mouth.spread(),
    }
}

/// Root-mean-square distance between `transform(source)` and `target`.
#[allow(clippy::cast_precision_loss)]
fn residual_rms(transform: &SimilarityTransform, source: &PointSet, target: &PointSet) -> f64 {
    if source.is_empty() {
        return 0.0;
    }
    let sum: f64 = transform
        .apply_all(source)
        .points()
        .iter()
        .zip(target.points())
        .map(|(a, b)| a.distance_squared(*b))
        .sum();
    (sum / source.len() as f64).sqrt()
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Landmarks { points, spread } => {
            format!("{points} pts, spread={spread:.2}px")
        }
        StageMetrics::Align {
            scale,
            rotation_deg,
            tx,
            ty,
            residual_rms,
        } => format!(
            "scale={scale:.3} rot={rotation_deg:.2}deg t=({tx:.1}, {ty:.1}) rms={residual_rms:.2}px",
        ),
        StageMetrics::Warp { width, height } => format!("{width}x{height}"),
        StageMetrics::ColorCorrect { kernel_size } => format!("kernel={kernel_size}px"),
        StageMetrics::Mask {
            feather_size,
            coverage,
        } => format!("feather={feather_size}px coverage={:.2}%", coverage * 100.0),
        StageMetrics::Composite {
            changed_pixels,
            total_pixels,
        } => {
            #[allow(clippy::cast_precision_loss)]
            let pct = if *total_pixels > 0 {
                *changed_pixels as f64 / *total_pixels as f64 * 100.0
            } else {
                0.0
            };
            format!("changed={changed_pixels} ({pct:.1}%)")
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::Cell;

    use image::Rgb;

    use super::*;
    use crate::landmarks::PrecomputedLandmarks;
    use crate::types::Point;

    /// Clock that advances one millisecond per reading.
    struct TickClock(Cell<u64>);

    impl Clock for TickClock {
        type Instant = u64;

        fn now(&self) -> u64 {
            let t = self.0.get();
            self.0.set(t + 1);
            t
        }

        fn elapsed(&self, since: &u64) -> Duration {
            Duration::from_millis(self.0.get() - since)
        }
    }

    fn ring(cx: f64, cy: f64, r: f64) -> PointSet {
        (0..12)
            .map(|i| {
                let a = f64::from(i) * std::f64::consts::TAU / 12.0;
                Point::new(cx + r * a.cos(), cy + r * a.sin() * 0.5)
            })
            .collect()
    }

    fn config() -> GraftConfig {
        GraftConfig {
            mouth_landmarks: 0..12,
            ..GraftConfig::default()
        }
    }

    fn run(config: &GraftConfig) -> (StagedGraft, GraftDiagnostics) {
        let neutral = RgbImage::from_pixel(80, 60, Rgb([40, 40, 40]));
        let smiling = RgbImage::from_pixel(90, 70, Rgb([220, 220, 220]));
        let n = PrecomputedLandmarks::single(ring(40.0, 30.0, 15.0));
        let s = PrecomputedLandmarks::single(ring(45.0, 35.0, 18.0));
        graft_staged_with_diagnostics(&neutral, &n, &smiling, &s, config, &TickClock(Cell::new(0)))
            .unwrap()
    }

    #[test]
    fn duration_ms_converts_correctly() {
        let d = Duration::from_millis(1234);
        assert!((duration_ms(d) - 1234.0).abs() < 0.01);
    }

    #[test]
    fn every_stage_is_timed() {
        let (_, diag) = run(&config());
        for (name, stage) in diag.stages() {
            assert!(stage.duration >= Duration::from_millis(1), "{name} was not timed");
        }
        assert!(diag.total_duration > diag.composite.duration);
    }

    #[test]
    fn color_correction_stage_follows_config() {
        let (staged, diag) = run(&config());
        assert!(diag.color_correction.is_none());
        assert!(staged.corrected.is_none());

        let enabled = GraftConfig {
            color_correction: true,
            ..config()
        };
        let (staged, diag) = run(&enabled);
        assert!(diag.color_correction.is_some());
        assert!(staged.corrected.is_some());
        assert_eq!(diag.stages().len(), 7);
    }

    #[test]
    fn metrics_describe_the_run() {
        let (staged, diag) = run(&config());
        assert_eq!(diag.summary.image_width, 80);
        assert_eq!(diag.summary.mouth_points, 12);
        assert!((diag.summary.face_scale - staged.face_scale.value()).abs() < 1e-12);

        assert!(
            matches!(
                diag.alignment.metrics,
                StageMetrics::Align { scale, residual_rms, .. }
                    if (scale - 15.0 / 18.0).abs() < 1e-9 && residual_rms < 1e-9
            ),
            "{:?}",
            diag.alignment.metrics
        );
        assert!(
            matches!(
                diag.composite.metrics,
                StageMetrics::Composite { changed_pixels, total_pixels }
                    if total_pixels == 80 * 60 && changed_pixels > 0 && changed_pixels < total_pixels
            ),
            "{:?}",
            diag.composite.metrics
        );
    }

    #[test]
    fn report_lists_stages() {
        let (_, diag) = run(&config());
        let report = diag.report();
        for name in ["Neutral Landmarks", "Alignment", "Warp", "Mask", "Composite"] {
            assert!(report.contains(name), "report is missing {name}:\n{report}");
        }
        assert!(!report.contains("Color Correction"));
    }

    #[test]
    fn diagnostics_serialize_durations_as_seconds() {
        let (_, diag) = run(&config());
        let json = serde_json::to_value(&diag).unwrap();
        assert!(json["total_duration"].is_f64());
        let back: GraftDiagnostics = serde_json::from_value(json).unwrap();
        let delta = back.total_duration.as_secs_f64() - diag.total_duration.as_secs_f64();
        assert!(delta.abs() < 1e-9);
    }

    #[test]
    fn untimed_run_reports_zero_durations() {
        let neutral = RgbImage::from_pixel(80, 60, Rgb([40, 40, 40]));
        let smiling = RgbImage::from_pixel(90, 70, Rgb([220, 220, 220]));
        let n = PrecomputedLandmarks::single(ring(40.0, 30.0, 15.0));
        let s = PrecomputedLandmarks::single(ring(45.0, 35.0, 18.0));
        let (untimed, diag) =
            graft_staged_with_diagnostics(&neutral, &n, &smiling, &s, &config(), &NoClock).unwrap();
        assert_eq!(diag.total_duration, Duration::ZERO);
        assert_eq!(untimed.output, run(&config()).0.output);
    }

    #[test]
    fn invalid_config_fails_before_any_stage() {
        let bad = GraftConfig {
            feather_fraction: -1.0,
            ..config()
        };
        let neutral = RgbImage::new(4, 4);
        let n = PrecomputedLandmarks::default();
        let result = graft_staged_with_diagnostics(
            &neutral,
            &n,
            &neutral,
            &n,
            &bad,
            &TickClock(Cell::new(0)),
        );
        assert!(matches!(result, Err(GraftError::InvalidConfig(_))));
    }
}
