//! Label catalog: ordered label names and their numeric ids
//!
//! Labels are collected while the catalog is unlocked. Locking fixes the
//! order and builds the name→id map; afterwards the only structural change
//! allowed is appending a brand-new label, so existing ids never move.

use labeler_common::protocol::LabelId;
use std::collections::HashMap;

use crate::error::SessionError;

/// Outcome of [`LabelCatalog::propose`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Proposal {
    /// Appended at the end of the list
    Added,
    /// Already in the list, nothing changed
    AlreadyPresent,
    /// Blank name, nothing changed
    Ignored,
}

/// Ordered, append-then-lock list of label names
#[derive(Debug, Clone, Default)]
pub struct LabelCatalog {
    labels: Vec<String>,
    ids: HashMap<String, LabelId>,
    locked: bool,
}

fn is_placeholder(name: &str) -> bool {
    name.trim().is_empty()
}

impl LabelCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild an unlocked catalog from persisted names.
    ///
    /// Duplicates are dropped; blank placeholder entries are kept until
    /// [`lock`](Self::lock).
    pub fn restore(names: Vec<String>) -> Self {
        let mut labels: Vec<String> = Vec::with_capacity(names.len());
        for name in names {
            if is_placeholder(&name) || !labels.contains(&name) {
                labels.push(name);
            }
        }
        Self {
            labels,
            ids: HashMap::new(),
            locked: false,
        }
    }

    /// Append `name` unless it is blank or already present
    pub fn propose(&mut self, name: &str) -> Proposal {
        let name = name.trim();
        if name.is_empty() {
            return Proposal::Ignored;
        }
        if self.labels.iter().any(|l| l == name) {
            return Proposal::AlreadyPresent;
        }

        self.labels.push(name.to_string());
        if self.locked {
            let id = (self.labels.len() - 1) as LabelId;
            self.ids.insert(name.to_string(), id);
        }
        Proposal::Added
    }

    /// Drop placeholder entries and fix the label order.
    ///
    /// Returns `true` only on the unlocked → locked transition.
    pub fn lock(&mut self) -> bool {
        if self.locked {
            return false;
        }

        self.labels.retain(|l| !is_placeholder(l));
        self.ids = self
            .labels
            .iter()
            .enumerate()
            .map(|(i, l)| (l.clone(), i as LabelId))
            .collect();
        self.locked = true;
        true
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Numeric id of `name`; unknown until the catalog is locked
    pub fn id_of(&self, name: &str) -> Result<LabelId, SessionError> {
        if !self.locked {
            return Err(SessionError::UnknownLabel(name.to_string()));
        }
        self.ids
            .get(name)
            .copied()
            .ok_or_else(|| SessionError::UnknownLabel(name.to_string()))
    }

    /// True when at least one real (non-placeholder) label exists
    pub fn has_labels(&self) -> bool {
        self.labels.iter().any(|l| !is_placeholder(l))
    }

    /// Real labels in catalog order
    pub fn labels(&self) -> Vec<String> {
        self.labels
            .iter()
            .filter(|l| !is_placeholder(l))
            .cloned()
            .collect()
    }
}
