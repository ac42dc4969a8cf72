//! Census data model shared by the channel, the differ and persistence.

use serde::{Deserialize, Serialize};

/// One line of a census: a type and how much of the heap it occupies.
///
/// On the wire a row is a JSON array of three or five elements; the two
/// trailing strings name the forward and backward reference artifacts
/// produced when reference inspection was requested for the type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RowRepr", into = "RowRepr")]
pub enum CensusRow {
    Basic {
        type_name: String,
        count: i64,
        bytes: i64,
    },
    WithRefs {
        type_name: String,
        count: i64,
        bytes: i64,
        forward_artifact: String,
        backward_artifact: String,
    },
}

impl CensusRow {
    pub fn basic(type_name: impl Into<String>, count: i64, bytes: i64) -> Self {
        Self::Basic {
            type_name: type_name.into(),
            count,
            bytes,
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            Self::Basic { type_name, .. } | Self::WithRefs { type_name, .. } => type_name,
        }
    }

    pub fn count(&self) -> i64 {
        match self {
            Self::Basic { count, .. } | Self::WithRefs { count, .. } => *count,
        }
    }

    pub fn bytes(&self) -> i64 {
        match self {
            Self::Basic { bytes, .. } | Self::WithRefs { bytes, .. } => *bytes,
        }
    }

    /// Reference artifacts, if this row carries them.
    pub fn artifacts(&self) -> Option<(&str, &str)> {
        match self {
            Self::Basic { .. } => None,
            Self::WithRefs {
                forward_artifact,
                backward_artifact,
                ..
            } => Some((forward_artifact, backward_artifact)),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RowRepr {
    WithRefs(String, i64, i64, String, String),
    Basic(String, i64, i64),
}

impl From<RowRepr> for CensusRow {
    fn from(repr: RowRepr) -> Self {
        match repr {
            RowRepr::Basic(type_name, count, bytes) => Self::Basic {
                type_name,
                count,
                bytes,
            },
            RowRepr::WithRefs(type_name, count, bytes, forward_artifact, backward_artifact) => {
                Self::WithRefs {
                    type_name,
                    count,
                    bytes,
                    forward_artifact,
                    backward_artifact,
                }
            }
        }
    }
}

impl From<CensusRow> for RowRepr {
    fn from(row: CensusRow) -> Self {
        match row {
            CensusRow::Basic {
                type_name,
                count,
                bytes,
            } => Self::Basic(type_name, count, bytes),
            CensusRow::WithRefs {
                type_name,
                count,
                bytes,
                forward_artifact,
                backward_artifact,
            } => Self::WithRefs(type_name, count, bytes, forward_artifact, backward_artifact),
        }
    }
}

/// The object population of one target at one point in time.
///
/// Fields are private: once built a census is only read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Census {
    target_id: i32,
    title: String,
    rows: Vec<CensusRow>,
}

impl Census {
    pub fn new(target_id: i32, title: impl Into<String>, rows: Vec<CensusRow>) -> Self {
        Self {
            target_id,
            title: title.into(),
            rows,
        }
    }

    /// Census freshly received from a target.
    pub fn analysis(target_id: i32, rows: Vec<CensusRow>) -> Self {
        Self::new(target_id, format!("Analysis for {target_id}"), rows)
    }

    pub fn target_id(&self) -> i32 {
        self.target_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn rows(&self) -> &[CensusRow] {
        &self.rows
    }

    pub fn has_references(&self) -> bool {
        self.rows.iter().any(|row| row.artifacts().is_some())
    }

    /// Diff censuses carry signed deltas rather than absolute values.
    pub fn is_diff(&self) -> bool {
        self.title.starts_with(crate::diff::DIFF_TITLE)
    }
}
