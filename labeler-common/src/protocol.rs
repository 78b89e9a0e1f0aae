//! Training-service wire types
//!
//! Request bodies exchanged with the trainer. Field names are part of the
//! contract and must not be renamed.

use serde::{Deserialize, Serialize};

/// Numeric label id: the label's position in the locked catalog
pub type LabelId = u32;

/// Trainer endpoint paths, relative to the trainer base URL
pub mod endpoints {
    pub const INIT_TRAINING: &str = "init_training";
    pub const TRAIN: &str = "train";
    pub const TEST_DATA: &str = "test_data";
    pub const STOP_TRAINING: &str = "stop_training";
}

/// Parallel arrays of image paths and label ids.
///
/// Serialized as a two-element JSON array `[[images...], [label_ids...]]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelledData(pub Vec<String>, pub Vec<LabelId>);

impl LabelledData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, image: String, label: LabelId) {
        self.0.push(image);
        self.1.push(label);
    }

    /// Number of complete (image, label) pairs
    pub fn len(&self) -> usize {
        self.0.len().min(self.1.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn images(&self) -> &[String] {
        &self.0
    }

    pub fn label_ids(&self) -> &[LabelId] {
        &self.1
    }
}

impl FromIterator<(String, LabelId)> for LabelledData {
    fn from_iter<I: IntoIterator<Item = (String, LabelId)>>(iter: I) -> Self {
        let (images, labels) = iter.into_iter().unzip();
        LabelledData(images, labels)
    }
}

/// POST `init_training`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitTraining {
    pub labels_list: Vec<String>,
}

/// POST `train`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainBatch {
    pub labelled_data: LabelledData,
    pub labels_list: Vec<String>,
    pub unlabelled: Vec<String>,
}

/// POST `test_data`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestData {
    pub test_data: LabelledData,
    pub labels_list: Vec<String>,
}

/// POST `stop_training`
///
/// Every field may be empty when the session stops before anything was
/// labeled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StopTraining {
    #[serde(default)]
    pub labelled_data: LabelledData,
    #[serde(default)]
    pub labels_list: Vec<String>,
    #[serde(default)]
    pub unlabelled: Vec<String>,
}

/// One entry of the ranking the trainer posts to `/retrieve_query`, best first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedImage {
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}
