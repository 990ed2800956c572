use crate::error::{Result, VectorStoreError};
use crate::flat_index::FlatIndex;
use crate::types::{PostId, PostMetadata, SearchResult};

/// The durable aggregate: positional vectors plus the metadata of each post.
///
/// `vectors.len() == posts.len() == next_id` holds after every public operation.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexState {
    vectors: FlatIndex,
    posts: Vec<PostMetadata>,
    next_id: u64,
}

impl IndexState {
    pub fn empty(dimension: usize) -> Result<Self> {
        Ok(Self {
            vectors: FlatIndex::new(dimension)?,
            posts: Vec::new(),
            next_id: 0,
        })
    }

    pub(crate) fn from_parts(vectors: FlatIndex, posts: Vec<PostMetadata>) -> Result<Self> {
        if vectors.len() != posts.len() {
            return Err(VectorStoreError::Other(format!(
                "{} vectors but {} metadata records",
                vectors.len(),
                posts.len()
            )));
        }
        let next_id = posts.len() as u64;
        Ok(Self {
            vectors,
            posts,
            next_id,
        })
    }

    /// Append a post under the next sequential identifier.
    pub fn push(&mut self, vector: &[f32], metadata: PostMetadata) -> Result<PostId> {
        debug_assert_eq!(self.next_id, self.posts.len() as u64);
        let id = PostId::new(self.next_id);
        self.vectors.add(vector)?;
        self.posts.push(metadata);
        self.next_id += 1;
        Ok(id)
    }

    /// Drop every entry from `len` onwards. Used to undo an append that failed to persist.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.vectors.truncate(len);
        self.posts.truncate(len);
        self.next_id = self.posts.len() as u64;
    }

    /// Ranked nearest posts joined with their metadata.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        let neighbors = self.vectors.search(query, k)?;
        Ok(neighbors
            .into_iter()
            .filter_map(|neighbor| {
                let metadata = self.posts.get(neighbor.position)?.clone();
                Some(SearchResult {
                    id: PostId::from_position(neighbor.position),
                    score: neighbor.score(),
                    metadata,
                })
            })
            .collect())
    }

    #[must_use]
    pub fn metadata(&self, id: PostId) -> Option<&PostMetadata> {
        self.posts.get(id.position()?)
    }

    #[must_use]
    pub fn vector(&self, id: PostId) -> Option<&[f32]> {
        self.vectors.vector(id.position()?)
    }

    #[must_use]
    pub const fn vectors(&self) -> &FlatIndex {
        &self.vectors
    }

    #[must_use]
    pub fn posts(&self) -> &[PostMetadata] {
        &self.posts
    }

    #[must_use]
    pub const fn next_id(&self) -> u64 {
        self.next_id
    }

    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.vectors.dimension()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.posts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(text: &str) -> PostMetadata {
        PostMetadata {
            text: Some(text.to_string()),
            ..PostMetadata::default()
        }
    }

    #[test]
    fn ids_are_dense_and_positional() {
        let mut state = IndexState::empty(2).unwrap();
        let ids: Vec<u64> = (0..5)
            .map(|i| {
                state
                    .push(&[i as f32, 1.0], meta(&format!("post {i}")))
                    .unwrap()
                    .get()
            })
            .collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
        assert_eq!(state.next_id(), 5);
        assert_eq!(
            state.metadata(PostId::new(3)).and_then(|m| m.text.as_deref()),
            Some("post 3")
        );
        assert_eq!(state.vector(PostId::new(4)), Some(&[4.0, 1.0][..]));
    }

    #[test]
    fn failed_push_leaves_state_untouched() {
        let mut state = IndexState::empty(2).unwrap();
        state.push(&[0.0, 1.0], meta("a")).unwrap();
        assert!(state.push(&[0.0, 1.0, 2.0], meta("b")).is_err());
        assert_eq!(state.len(), 1);
        assert_eq!(state.next_id(), 1);
    }

    #[test]
    fn truncate_rewinds_counter() {
        let mut state = IndexState::empty(2).unwrap();
        state.push(&[0.0, 1.0], meta("a")).unwrap();
        state.push(&[1.0, 0.0], meta("b")).unwrap();
        state.truncate(1);
        assert_eq!(state.len(), 1);
        assert_eq!(state.vectors().len(), 1);
        assert_eq!(state.push(&[1.0, 0.0], meta("c")).unwrap(), PostId::new(1));
    }

    #[test]
    fn search_joins_metadata() {
        let mut state = IndexState::empty(2).unwrap();
        state.push(&[1.0, 0.0], meta("east")).unwrap();
        state.push(&[0.0, 1.0], meta("north")).unwrap();

        let hits = state.search(&[0.0, 1.0], 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, PostId::new(1));
        assert_eq!(hits[0].score, 1.0);
        assert_eq!(hits[0].metadata.text.as_deref(), Some("north"));
    }
}
