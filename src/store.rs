//! In-memory idea collection.
//!
//! The store is the single source of truth for idea records. Enrichments are
//! merged with a compare-and-set: a patch only lands when the target field is
//! still absent and the collection has not been replaced since the request
//! that produced it was issued.

use thiserror::Error;

use crate::error::ServiceResult;
use crate::types::{EnrichmentKind, Idea, IdeaPatch, StoredIdea};

/// Why a store mutation was refused. Nothing is changed when one is reported.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Conflict {
    #[error("no idea at index {index} (collection holds {len})")]
    OutOfBounds { index: usize, len: usize },
    #[error("collection was replaced (expected epoch {expected}, now {current})")]
    StaleEpoch { expected: u64, current: u64 },
    #[error("{kind} is already present on idea {index}")]
    AlreadyPresent { index: usize, kind: EnrichmentKind },
    #[error("idea {index} needs an expansion before a code scaffold")]
    MissingExpansion { index: usize },
}

/// Receives the durable projection of the collection after every successful
/// mutation. Called from the blocking pool, one call at a time.
pub trait StoreObserver: Send + Sync {
    fn ideas_changed(&self, ideas: Option<&[StoredIdea]>) -> ServiceResult<()>;
}

#[derive(Debug, Default)]
pub struct IdeaStore {
    ideas: Option<Vec<Idea>>,
    // bumped whenever the whole collection is swapped out
    epoch: u64,
    revision: u64,
}

impl IdeaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` until something was generated or restored this session.
    pub fn ideas(&self) -> Option<&[Idea]> {
        self.ideas.as_deref()
    }

    pub fn get(&self, index: usize) -> Option<&Idea> {
        self.ideas.as_ref().and_then(|ideas| ideas.get(index))
    }

    pub fn len(&self) -> usize {
        self.ideas.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn replace_all(&mut self, ideas: Vec<Idea>) {
        self.ideas = Some(ideas);
        self.epoch += 1;
        self.revision += 1;
    }

    /// Empties the collection. Unlike the initial `None`, an empty collection
    /// tells persistence to drop the durable record.
    pub fn clear(&mut self) {
        self.ideas = Some(Vec::new());
        self.epoch += 1;
        self.revision += 1;
    }

    pub fn update_at(&mut self, epoch: u64, index: usize, patch: IdeaPatch) -> Result<(), Conflict> {
        if epoch != self.epoch {
            return Err(Conflict::StaleEpoch {
                expected: epoch,
                current: self.epoch,
            });
        }
        let idea = self.slot_mut(index)?;
        let kind = patch.kind();
        if idea.has(kind) {
            return Err(Conflict::AlreadyPresent { index, kind });
        }
        match patch {
            IdeaPatch::Image(url) => idea.image_url = Some(url),
            IdeaPatch::Expansion(expansion) => idea.expansion = Some(expansion),
            IdeaPatch::CodeScaffold(files) => {
                if idea.expansion.is_none() {
                    return Err(Conflict::MissingExpansion { index });
                }
                idea.code_scaffold = Some(files);
            }
            IdeaPatch::AudioPitch(payload) => idea.audio_pitch_base64 = Some(payload),
        }
        self.revision += 1;
        Ok(())
    }

    /// Flips the favorite flag and returns the new value.
    pub fn toggle_favorite(&mut self, index: usize) -> Result<bool, Conflict> {
        let idea = self.slot_mut(index)?;
        idea.is_favorite = !idea.is_favorite;
        let now = idea.is_favorite;
        self.revision += 1;
        Ok(now)
    }

    pub fn filtered_view<'a, P>(&'a self, predicate: P) -> impl Iterator<Item = (usize, &'a Idea)> + 'a
    where
        P: Fn(&Idea) -> bool + 'a,
    {
        self.ideas
            .iter()
            .flat_map(|ideas| ideas.iter().enumerate())
            .filter(move |&(_, idea)| predicate(idea))
    }

    pub fn favorites(&self) -> impl Iterator<Item = (usize, &Idea)> + '_ {
        self.filtered_view(Idea::is_favorite)
    }

    fn slot_mut(&mut self, index: usize) -> Result<&mut Idea, Conflict> {
        let len = self.len();
        self.ideas
            .as_mut()
            .and_then(|ideas| ideas.get_mut(index))
            .ok_or(Conflict::OutOfBounds { index, len })
    }
}
