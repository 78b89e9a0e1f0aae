//! Image pool: discovery, evaluation/candidate partition and cursors
//!
//! The pool owns two disjoint sets of image references. An image leaves its
//! set the moment a label is recorded for it and never comes back.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

use crate::error::SessionError;

/// File extensions accepted by discovery (compared case-insensitively)
pub const ACCEPTED_EXTENSIONS: &[&str] = &["png", "jpg"];

/// Opaque reference to one image (its path)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRef(String);

impl ImageRef {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn from_path(path: &Path) -> Self {
        Self(path.to_string_lossy().into_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Final path component
    pub fn file_name(&self) -> &str {
        file_name_of(&self.0)
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn file_name_of(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
}

fn has_accepted_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            ACCEPTED_EXTENSIONS
                .iter()
                .any(|accepted| e.eq_ignore_ascii_case(accepted))
        })
        .unwrap_or(false)
}

/// List every image in `dir` (flat, no recursion), sorted by path.
///
/// Any entry that is not a file with an accepted extension makes the whole
/// source invalid.
pub fn discover_images(dir: &Path) -> Result<Vec<ImageRef>, SessionError> {
    let invalid = |reason: String| SessionError::InvalidSource {
        path: dir.to_path_buf(),
        reason,
    };

    let entries = std::fs::read_dir(dir).map_err(|e| invalid(e.to_string()))?;

    let mut images = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| invalid(e.to_string()))?;
        let path = entry.path();
        let is_file = entry
            .file_type()
            .map(|t| t.is_file())
            .map_err(|e| invalid(e.to_string()))?;

        if !is_file || !has_accepted_extension(&path) {
            return Err(invalid(format!(
                "{} is not a png or jpg image; the directory must contain only images",
                path.display()
            )));
        }
        images.push(ImageRef::from_path(&path));
    }

    images.sort();
    Ok(images)
}

/// One step of a [`Cursor`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorStep {
    /// Next image in order
    Next(ImageRef),
    /// Raised exactly once, on the first step past the last image
    Exhausted,
    /// Every step after `Exhausted`
    Drained,
}

/// Finite, non-restartable sequence over a snapshot of one set.
///
/// Later removals from the pool do not shrink a cursor already in progress.
#[derive(Debug)]
pub struct Cursor {
    items: std::vec::IntoIter<ImageRef>,
    exhausted: bool,
}

impl Cursor {
    pub fn new(items: Vec<ImageRef>) -> Self {
        Self {
            items: items.into_iter(),
            exhausted: false,
        }
    }

    pub fn advance(&mut self) -> CursorStep {
        if self.exhausted {
            return CursorStep::Drained;
        }
        match self.items.next() {
            Some(image) => CursorStep::Next(image),
            None => {
                self.exhausted = true;
                CursorStep::Exhausted
            }
        }
    }
}

/// The two disjoint image sets of a session
#[derive(Debug, Default)]
pub struct ImagePool {
    unpartitioned: Vec<ImageRef>,
    evaluation: Vec<ImageRef>,
    candidates: Vec<ImageRef>,
    partitioned: bool,
}

impl ImagePool {
    /// Discover images in `dir`; the result still needs [`partition`](Self::partition)
    pub fn discover(dir: &Path) -> Result<Self, SessionError> {
        Ok(Self::from_images(discover_images(dir)?))
    }

    /// Pool over already-known images, duplicates dropped; not yet partitioned
    pub fn from_images(images: Vec<ImageRef>) -> Self {
        let mut seen = HashSet::new();
        let unpartitioned = images
            .into_iter()
            .filter(|image| seen.insert(image.clone()))
            .collect();
        Self {
            unpartitioned,
            ..Self::default()
        }
    }

    /// Pool whose partition is already known (session resume).
    ///
    /// Candidates also listed as evaluation images are dropped from the
    /// candidate set so the sets stay disjoint.
    pub fn restore(evaluation: Vec<ImageRef>, candidates: Vec<ImageRef>) -> Self {
        let mut seen: HashSet<ImageRef> = HashSet::new();
        let evaluation: Vec<ImageRef> = evaluation
            .into_iter()
            .filter(|image| seen.insert(image.clone()))
            .collect();
        let candidates = candidates
            .into_iter()
            .filter(|image| seen.insert(image.clone()))
            .collect();
        Self {
            unpartitioned: Vec::new(),
            evaluation,
            candidates,
            partitioned: true,
        }
    }

    /// Shuffle once and slice off `floor(eval_fraction × total)` images as the
    /// evaluation set; the rest become candidates, in shuffled order.
    pub fn partition(&mut self, eval_fraction: f64, seed: Option<u64>) -> Result<(), SessionError> {
        if self.partitioned {
            return Err(SessionError::AlreadyPartitioned);
        }
        if !(0.0..=1.0).contains(&eval_fraction) {
            return Err(SessionError::InvalidFraction(eval_fraction));
        }

        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut images = std::mem::take(&mut self.unpartitioned);
        images.shuffle(&mut rng);

        let eval_len = ((eval_fraction * images.len() as f64).floor() as usize).min(images.len());
        self.candidates = images.split_off(eval_len);
        self.evaluation = images;
        self.partitioned = true;
        Ok(())
    }

    /// Remove `image` from whichever set holds it; absent images are ignored.
    ///
    /// Returns whether anything was removed.
    pub fn remove(&mut self, image: &ImageRef) -> bool {
        for set in [&mut self.evaluation, &mut self.candidates, &mut self.unpartitioned] {
            if let Some(pos) = set.iter().position(|i| i == image) {
                set.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn evaluation(&self) -> &[ImageRef] {
        &self.evaluation
    }

    pub fn candidates(&self) -> &[ImageRef] {
        &self.candidates
    }

    pub fn cursor_over_evaluation(&self) -> Cursor {
        Cursor::new(self.evaluation.clone())
    }

    pub fn cursor_over_candidates(&self) -> Cursor {
        Cursor::new(self.candidates.clone())
    }

    /// Apply an upstream ranking to the candidate order.
    ///
    /// Ranked names match a candidate by full path or by file name; names
    /// that match nothing are skipped. Unranked candidates keep their
    /// relative order after the ranked ones. Returns how many candidates the
    /// ranking placed.
    pub fn reorder_candidates<S: AsRef<str>>(&mut self, ranked: &[S]) -> usize {
        let mut index: HashMap<&str, usize> = HashMap::new();
        for (i, image) in self.candidates.iter().enumerate() {
            index.entry(image.file_name()).or_insert(i);
            index.insert(image.as_str(), i);
        }

        let mut placed = vec![false; self.candidates.len()];
        let mut order = Vec::with_capacity(self.candidates.len());
        for name in ranked {
            let name = name.as_ref();
            let hit = index
                .get(name)
                .or_else(|| index.get(file_name_of(name)))
                .copied();
            if let Some(i) = hit {
                if !placed[i] {
                    placed[i] = true;
                    order.push(i);
                }
            }
        }
        let ranked_count = order.len();
        order.extend((0..self.candidates.len()).filter(|i| !placed[*i]));

        let mut previous: Vec<Option<ImageRef>> =
            std::mem::take(&mut self.candidates).into_iter().map(Some).collect();
        self.candidates = order
            .into_iter()
            .filter_map(|i| previous[i].take())
            .collect();
        ranked_count
    }
}
