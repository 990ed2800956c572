use crate::error::{Result, VectorStoreError};
use std::cmp::Ordering;

/// Exact nearest-neighbour index over a contiguous row-major buffer.
///
/// Rows are append-only; a row's position is its identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dimension: usize,
    data: Vec<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: usize,
    pub distance: f32,
}

impl Neighbor {
    #[must_use]
    pub fn score(&self) -> f32 {
        score_from_distance(self.distance)
    }
}

/// Maps a squared L2 distance to a bounded similarity in `(0, 1]`.
#[must_use]
pub fn score_from_distance(distance: f32) -> f32 {
    1.0 / (1.0 + distance)
}

impl FlatIndex {
    pub fn new(dimension: usize) -> Result<Self> {
        Self::from_raw(dimension, Vec::new())
    }

    /// Rebuild an index from a flat buffer of `len / dimension` rows.
    pub fn from_raw(dimension: usize, data: Vec<f32>) -> Result<Self> {
        if dimension == 0 {
            return Err(VectorStoreError::InvalidConfig(
                "vector dimension must be positive".to_string(),
            ));
        }
        if data.len() % dimension != 0 {
            return Err(VectorStoreError::InvalidVector(format!(
                "buffer of {} floats is not a multiple of dimension {dimension}",
                data.len()
            )));
        }
        Ok(Self { dimension, data })
    }

    /// Append a vector, returning its position.
    pub fn add(&mut self, vector: &[f32]) -> Result<usize> {
        self.check_dimension(vector)?;
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(VectorStoreError::InvalidVector(
                "vector contains non-finite components".to_string(),
            ));
        }
        let position = self.len();
        self.data.extend_from_slice(vector);
        Ok(position)
    }

    /// Exact k-NN by squared Euclidean distance.
    ///
    /// `k` is clamped to the number of rows. Ties are broken by ascending position.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.check_dimension(query)?;
        let k = k.min(self.len());
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut neighbors: Vec<Neighbor> = self
            .rows()
            .enumerate()
            .map(|(position, row)| Neighbor {
                position,
                distance: squared_l2(query, row),
            })
            .collect();

        if k < neighbors.len() {
            neighbors.select_nth_unstable_by(k - 1, compare_neighbors);
            neighbors.truncate(k);
        }
        neighbors.sort_by(compare_neighbors);

        Ok(neighbors)
    }

    #[must_use]
    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dimension)?;
        self.data.get(start..start + self.dimension)
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dimension)
    }

    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len() / self.dimension
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub(crate) fn truncate(&mut self, rows: usize) {
        self.data.truncate(rows * self.dimension);
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(VectorStoreError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

fn compare_neighbors(a: &Neighbor, b: &Neighbor) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then(a.position.cmp(&b.position))
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}
