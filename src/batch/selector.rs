//! Work item selection
//!
//! The output directory is the only completion record: a candidate whose
//! expected artifacts all exist is considered done and is skipped unless
//! `force` is set. A truncated artifact left by a killed worker looks
//! exactly like a finished one.

use std::path::PathBuf;
use tracing::debug;

/// One unit of work plus the files it is expected to produce
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem<C, A = Vec<PathBuf>> {
    candidate: C,
    artifacts: A,
}

impl<C, A: AsRef<[PathBuf]>> WorkItem<C, A> {
    /// Create a work item
    pub fn new(candidate: C, artifacts: A) -> Self {
        Self {
            candidate,
            artifacts,
        }
    }

    /// The candidate this item was built from
    pub fn candidate(&self) -> &C {
        &self.candidate
    }

    /// Expected output artifacts
    pub fn artifacts(&self) -> &[PathBuf] {
        self.artifacts.as_ref()
    }

    /// True when every expected artifact exists on disk
    pub fn is_done(&self) -> bool {
        self.artifacts().iter().all(|path| path.exists())
    }

    /// Split into candidate and artifacts
    pub fn into_parts(self) -> (C, A) {
        (self.candidate, self.artifacts)
    }
}

/// Enumerates candidates and drops the ones already done
pub struct WorkItemSelector<'c, C, N> {
    candidates: &'c [C],
    naming: N,
    force: bool,
}

impl<'c, C, N, A> WorkItemSelector<'c, C, N>
where
    N: Fn(&C) -> A,
    A: AsRef<[PathBuf]>,
{
    /// Create a selector. `naming` derives a candidate's artifact paths.
    pub fn new(candidates: &'c [C], naming: N) -> Self {
        Self {
            candidates,
            naming,
            force: false,
        }
    }

    /// Select every candidate regardless of existing artifacts
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Number of candidates considered
    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    /// Lazily walk the candidates in order. Each call starts over and
    /// re-checks the filesystem.
    pub fn select(&self) -> Selection<'_, C, N> {
        Selection {
            candidates: self.candidates.iter(),
            naming: &self.naming,
            force: self.force,
            skipped: 0,
        }
    }
}

/// Iterator over eligible work items
pub struct Selection<'s, C, N> {
    candidates: std::slice::Iter<'s, C>,
    naming: &'s N,
    force: bool,
    skipped: usize,
}

impl<C, N> Selection<'_, C, N> {
    /// Candidates skipped so far because their artifacts exist
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl<'s, C, N, A> Iterator for Selection<'s, C, N>
where
    N: Fn(&C) -> A,
    A: AsRef<[PathBuf]>,
{
    type Item = WorkItem<&'s C, A>;

    fn next(&mut self) -> Option<Self::Item> {
        for candidate in self.candidates.by_ref() {
            let item = WorkItem::new(candidate, (self.naming)(candidate));
            if !self.force && item.is_done() {
                debug!("Skipping, artifacts exist: {}", display_first(item.artifacts()));
                self.skipped += 1;
                continue;
            }
            return Some(item);
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, self.candidates.size_hint().1)
    }
}

fn display_first(artifacts: &[PathBuf]) -> String {
    artifacts
        .first()
        .map(|path| path.display().to_string())
        .unwrap_or_default()
}
