//! Landmark extraction: from an image to the mouth point set.
//!
//! Face detection and landmark regression are delegated to an external
//! model behind the [`LandmarkDetector`] trait. This module only decides
//! which detected face to use and slices its mouth landmarks.
//!
//! [`PrecomputedLandmarks`] is a detector that replays landmark lists
//! produced offline, so the pipeline can run without a model in-process.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::types::{FaceSelection, GraftConfig, GraftError, GrayImage, PointSet};

/// A face landmark model.
///
/// Returns one [`PointSet`] per detected face, each holding that face's
/// full landmark layout in the model's anatomical order. An image with
/// no faces yields an empty list.
pub trait LandmarkDetector {
    /// Detect every face in `image` and return its landmarks.
    ///
    /// # Errors
    ///
    /// Implementations report model failures as
    /// [`GraftError::Detector`].
    fn detect(&self, image: &GrayImage) -> Result<Vec<PointSet>, GraftError>;
}

/// Landmarks computed ahead of time by an external model.
///
/// Deserializes from `{"faces": [[{"x": .., "y": ..}, ...], ...]}` and
/// returns the same faces for any image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrecomputedLandmarks {
    /// Full landmark set of every face, in detector order.
    pub faces: Vec<PointSet>,
}

impl PrecomputedLandmarks {
    /// Wrap a list of faces.
    #[must_use]
    pub const fn new(faces: Vec<PointSet>) -> Self {
        Self { faces }
    }

    /// A single-face landmark list.
    #[must_use]
    pub fn single(face: PointSet) -> Self {
        Self { faces: vec![face] }
    }
}

impl LandmarkDetector for PrecomputedLandmarks {
    fn detect(&self, _image: &GrayImage) -> Result<Vec<PointSet>, GraftError> {
        Ok(self.faces.clone())
    }
}

/// Detect faces in `image` and return the mouth landmarks of the one
/// picked by `config.face_selection`.
///
/// # Errors
///
/// Returns [`GraftError::NoFaceDetected`] if the detector finds no face
/// or the mouth landmarks are all zero. Returns
/// [`GraftError::IncompleteLandmarks`] if the chosen face is too short
/// for `config.mouth_landmarks`, and [`GraftError::DegenerateInput`]
/// for non-finite coordinates. Detector errors pass through unchanged.
pub fn extract_mouth<D>(
    detector: &D,
    image: &GrayImage,
    config: &GraftConfig,
) -> Result<PointSet, GraftError>
where
    D: LandmarkDetector + ?Sized,
{
    let faces = detector.detect(image)?;
    let face = select_face(&faces, config.face_selection).ok_or(GraftError::NoFaceDetected)?;
    let mouth = mouth_points(face, &config.mouth_landmarks)?;
    tracing::debug!(
        faces = faces.len(),
        selection = ?config.face_selection,
        points = mouth.len(),
        "extracted mouth landmarks"
    );
    Ok(mouth)
}

/// Pick one face from a detector's output.
///
/// [`FaceSelection::Largest`] compares [`PointSet::spread`]; the earlier
/// face wins a tie.
#[must_use]
pub fn select_face(faces: &[PointSet], selection: FaceSelection) -> Option<&PointSet> {
    match selection {
        FaceSelection::First => faces.first(),
        FaceSelection::Largest => faces.iter().fold(None, |best: Option<&PointSet>, face| {
            match best {
                Some(b) if face.spread() <= b.spread() => Some(b),
                _ => Some(face),
            }
        }),
    }
}

/// Slice the mouth landmarks out of a full face.
///
/// # Errors
///
/// See [`extract_mouth`].
pub fn mouth_points(face: &PointSet, range: &Range<usize>) -> Result<PointSet, GraftError> {
    let Some(slice) = face.points().get(range.clone()) else {
        return Err(GraftError::IncompleteLandmarks {
            needed: range.end,
            found: face.len(),
        });
    };
    let mouth = PointSet::new(slice.to_vec());
    if mouth.is_empty() || mouth.is_zero_filled() {
        return Err(GraftError::NoFaceDetected);
    }
    if !mouth.is_finite() {
        return Err(GraftError::DegenerateInput(
            "mouth landmarks have non-finite coordinates".to_string(),
        ));
    }
    Ok(mouth)
}
