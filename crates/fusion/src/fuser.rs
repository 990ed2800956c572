use crate::error::{FusionError, Result};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use std::cmp::Ordering;

/// Reduces per-modality embeddings to one unit-length vector.
///
/// Images and frames are each averaged into a single vector, then the present modalities
/// (image mean, frame mean, text) are averaged with equal weight and L2-normalized.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddingFuser;

impl EmbeddingFuser {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    pub fn fuse(
        &self,
        images: &[Vec<f32>],
        frames: &[Vec<f32>],
        text: Option<&[f32]>,
    ) -> Result<Vec<f32>> {
        let text = text.filter(|t| !t.is_empty());
        let dimension = common_dimension(images, frames, text)?;

        let mut modalities: Vec<Array1<f64>> = Vec::with_capacity(3);
        if let Some(mean) = modality_mean(images, dimension) {
            modalities.push(mean);
        }
        if let Some(mean) = modality_mean(frames, dimension) {
            modalities.push(mean);
        }
        if let Some(text) = text {
            modalities.push(text.iter().map(|&v| f64::from(v)).collect());
        }
        if modalities.is_empty() {
            return Err(FusionError::NoInputProvided);
        }

        let views: Vec<ArrayView1<'_, f64>> = modalities.iter().map(Array1::view).collect();
        let stacked = ndarray::stack(Axis(0), &views).map_err(|_| {
            FusionError::DimensionMismatch {
                expected: dimension,
                actual: 0,
            }
        })?;
        let fused = stacked
            .mean_axis(Axis(0))
            .ok_or(FusionError::NoInputProvided)?;

        normalize(&fused)
    }

    /// Normalize a single vector, e.g. a raw text-encoder output used as a search query.
    pub fn normalize(&self, vector: &[f32]) -> Result<Vec<f32>> {
        self.fuse(&[], &[], Some(vector))
    }
}

fn common_dimension(
    images: &[Vec<f32>],
    frames: &[Vec<f32>],
    text: Option<&[f32]>,
) -> Result<usize> {
    let mut lengths = images
        .iter()
        .chain(frames)
        .map(Vec::len)
        .chain(text.map(<[f32]>::len));
    let Some(expected) = lengths.next() else {
        return Err(FusionError::NoInputProvided);
    };
    for actual in lengths {
        if actual != expected {
            return Err(FusionError::DimensionMismatch { expected, actual });
        }
    }
    Ok(expected)
}

/// Component-wise mean of one modality's vectors, `None` when the modality is absent.
///
/// Rows are summed in a canonical order so the result is bit-identical under permutation.
fn modality_mean(rows: &[Vec<f32>], dimension: usize) -> Option<Array1<f64>> {
    if rows.is_empty() {
        return None;
    }
    let mut ordered: Vec<&[f32]> = rows.iter().map(Vec::as_slice).collect();
    ordered.sort_by(|a, b| compare_rows(a, b));

    let matrix = Array2::from_shape_fn((ordered.len(), dimension), |(r, c)| {
        f64::from(ordered[r][c])
    });
    matrix.mean_axis(Axis(0))
}

fn compare_rows(a: &[f32], b: &[f32]) -> Ordering {
    a.iter()
        .zip(b)
        .map(|(x, y)| x.total_cmp(y))
        .find(|ord| ord.is_ne())
        .unwrap_or(Ordering::Equal)
}

fn normalize(vector: &Array1<f64>) -> Result<Vec<f32>> {
    let norm = vector.dot(vector).sqrt();
    if !norm.is_finite() || norm <= f64::EPSILON {
        return Err(FusionError::DegenerateEmbedding);
    }
    Ok(vector.iter().map(|v| (v / norm) as f32).collect())
}
