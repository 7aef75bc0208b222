use crate::core::state::{Catalog, Character};

/// Characters still eligible to be suggested as protagonist.
///
/// Rejection removes a character until the next reset. An emptied pool is
/// not an error: it wraps around to the full catalog before the next
/// suggestion ("soft exhaustion"), so repeats only recur after every
/// character has been turned down once.
#[derive(Debug, Clone, Default)]
pub struct CandidatePool {
    candidates: Vec<Character>,
}

impl CandidatePool {
    pub fn from_catalog(catalog: &Catalog) -> Self {
        let mut pool = Self::default();
        pool.reset(catalog);
        pool
    }

    pub fn reset(&mut self, catalog: &Catalog) {
        self.candidates = catalog.characters().to_vec();
    }

    pub fn reject(&mut self, full_name: &str) -> bool {
        let before = self.candidates.len();
        self.candidates.retain(|c| c.full_name != full_name);
        self.candidates.len() != before
    }

    pub fn ensure_available(&mut self, catalog: &Catalog) -> bool {
        if self.candidates.is_empty() {
            self.reset(catalog);
            return true;
        }
        false
    }

    pub fn candidates(&self) -> &[Character] {
        &self.candidates
    }

    pub fn contains(&self, full_name: &str) -> bool {
        self.candidates.iter().any(|c| c.full_name == full_name)
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }
}
