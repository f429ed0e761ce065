//! Unit identity and the artifact naming scheme.
//!
//! Every segmented region becomes a *unit* identified by
//! `(source_index, region_index, category)`. On disk the identity is encoded
//! in the file stem:
//!
//! ```text
//! crop_{source_index:03}_{region_index:03}_{category}
//! crop_002_014_table.png  →  (2, 14, Table)
//! ```
//!
//! Zero-padded indices make a plain lexicographic directory listing agree
//! with numeric `(source_index, region_index)` order for indices below 1000.
//! Parsing never fails: a stem that does not follow the scheme becomes
//! [`ArtifactName::Unknown`], which sorts after every well-formed name.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Prefix shared by every unit stem.
pub const UNIT_PREFIX: &str = "crop";

/// Width used when zero-padding indices.
pub const INDEX_WIDTH: usize = 3;

/// Label written in provenance comments for names outside the scheme.
pub const UNKNOWN_LABEL: &str = "unknown";

/// `crop_<digits>_<digits>_<rest>`. The category is everything after the
/// second index, so a label that itself contains `_` is kept whole.
static STEM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^crop_([0-9]+)_([0-9]+)_(.+)$").expect("valid regex"));

/// The region categories kept by segmentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Title,
    Text,
    Figure,
    Table,
}

impl Category {
    /// Allow-list, in declaration order.
    pub const ALL: [Category; 4] = [
        Category::Title,
        Category::Text,
        Category::Figure,
        Category::Table,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Title => "title",
            Category::Text => "text",
            Category::Figure => "figure",
            Category::Table => "table",
        }
    }

    /// Map a layout engine label onto the allow-list.
    ///
    /// Matching is exact after trimming and ASCII lower-casing; labels such
    /// as `header`, `footer` or `reference` return `None`.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|c| c.as_str() == label)
    }

    /// Rank used by type-priority reassembly: title, then text, then
    /// figures and tables together.
    pub fn priority(self) -> u8 {
        match self {
            Category::Title => 0,
            Category::Text => 1,
            Category::Figure | Category::Table => 2,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_label(s).ok_or_else(|| format!("unknown category '{s}'"))
    }
}

/// Priority given to labels outside the allow-list and to unknown names.
pub const OTHER_PRIORITY: u8 = 3;

/// Typed identity of a unit. Immutable once assigned by segmentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitKey {
    pub source_index: usize,
    pub region_index: usize,
    pub category: Category,
}

impl UnitKey {
    pub fn new(source_index: usize, region_index: usize, category: Category) -> Self {
        Self {
            source_index,
            region_index,
            category,
        }
    }

    /// File stem for this unit, e.g. `crop_000_003_text`.
    pub fn stem(&self) -> String {
        format!(
            "{UNIT_PREFIX}_{:0w$}_{:0w$}_{}",
            self.source_index,
            self.region_index,
            self.category,
            w = INDEX_WIDTH
        )
    }

    /// File name for this unit with the given extension (no leading dot).
    pub fn file_name(&self, extension: &str) -> String {
        format!("{}.{}", self.stem(), extension)
    }

    /// Strict parse: only stems whose category is on the allow-list.
    pub fn parse(stem: &str) -> Option<Self> {
        match ArtifactName::parse(stem) {
            ArtifactName::Unit(key) => Some(key),
            _ => None,
        }
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stem())
    }
}

/// Provenance recovered from an artifact file stem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactName {
    /// Well-formed name with an allow-listed category.
    Unit(UnitKey),
    /// Well-formed indices, but a category outside the allow-list.
    Other {
        source_index: usize,
        region_index: usize,
        label: String,
    },
    /// Anything else. Sorts last and never gets type priority.
    Unknown,
}

impl ArtifactName {
    /// Parse a file stem (no extension). Never fails.
    pub fn parse(stem: &str) -> Self {
        let Some(caps) = STEM_RE.captures(stem) else {
            return ArtifactName::Unknown;
        };
        let (Ok(source_index), Ok(region_index)) =
            (caps[1].parse::<usize>(), caps[2].parse::<usize>())
        else {
            return ArtifactName::Unknown;
        };
        let label = &caps[3];
        match Category::from_label(label) {
            Some(category) if category.as_str() == label => {
                ArtifactName::Unit(UnitKey::new(source_index, region_index, category))
            }
            _ => ArtifactName::Other {
                source_index,
                region_index,
                label: label.to_string(),
            },
        }
    }

    pub fn key(&self) -> Option<&UnitKey> {
        match self {
            ArtifactName::Unit(key) => Some(key),
            _ => None,
        }
    }

    pub fn category(&self) -> Option<Category> {
        self.key().map(|k| k.category)
    }

    /// Category label as written in provenance comments.
    pub fn label(&self) -> &str {
        match self {
            ArtifactName::Unit(key) => key.category.as_str(),
            ArtifactName::Other { label, .. } => label,
            ArtifactName::Unknown => UNKNOWN_LABEL,
        }
    }

    /// `(source_index, region_index)` or `None` for unknown names.
    pub fn indices(&self) -> Option<(usize, usize)> {
        match self {
            ArtifactName::Unit(key) => Some((key.source_index, key.region_index)),
            ArtifactName::Other {
                source_index,
                region_index,
                ..
            } => Some((*source_index, *region_index)),
            ArtifactName::Unknown => None,
        }
    }

    pub fn priority(&self) -> u8 {
        self.category().map_or(OTHER_PRIORITY, Category::priority)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, ArtifactName::Unknown)
    }

    /// Compare by `(source_index, region_index)`; unknown names last.
    pub fn cmp_natural(&self, other: &Self) -> Ordering {
        match (self.indices(), other.indices()) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }

    /// Compare by `(source_index, priority, region_index)`; unknown names last.
    pub fn cmp_type_priority(&self, other: &Self) -> Ordering {
        match (self.indices(), other.indices()) {
            (Some((sa, ra)), Some((sb, rb))) => (sa, self.priority(), ra).cmp(&(sb, other.priority(), rb)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

impl From<UnitKey> for ArtifactName {
    fn from(key: UnitKey) -> Self {
        ArtifactName::Unit(key)
    }
}
