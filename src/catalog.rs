//! Flat-file video catalog.
//!
//! The catalog lives in a single JSON document produced by an external
//! crawler. Two layouts exist in the wild: an object keyed by category name
//! whose values are record arrays, and a plain array of records that carry
//! their own `category` field. The layout is resolved once per load into a
//! [`Catalog`] so the listing and lookup code never sniffs JSON types.
//!
//! Nothing here writes to disk; every request re-reads the file through
//! [`CatalogSource::load`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Field names that may hold the source page of a record.
const PAGE_URL_FIELDS: [&str; 2] = ["pageUrl", "page_url"];

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("reading {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported data format: {0}")]
    UnsupportedFormat(String),
}

/// One entry of the catalog.
///
/// Records are schemaless JSON objects. Well-known fields are exposed through
/// accessors; everything else is passed through untouched, in file order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoRecord(Map<String, Value>);

impl VideoRecord {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Playable media location. Empty strings count as missing, and so does
    /// a non-string `url` (a number, object, ...): lookups answer 404 for such
    /// records rather than handing a non-URL value to the player.
    pub fn url(&self) -> Option<&str> {
        self.str_field("url").filter(|url| !url.is_empty())
    }

    pub fn thumbnail(&self) -> Option<&Value> {
        self.0.get("thumbnail")
    }

    pub fn category(&self) -> Option<&str> {
        self.str_field("category")
    }

    /// True when either spelling of the page URL field equals `target`.
    pub fn has_page_url(&self, target: &str) -> bool {
        PAGE_URL_FIELDS
            .iter()
            .any(|field| self.str_field(field) == Some(target))
    }

    /// Compares the `id` field against a textual id. Integer ids are matched
    /// by their decimal representation, float ids by numeric value so `1.0`
    /// matches `"1"`.
    pub fn has_id(&self, target: &str) -> bool {
        match self.0.get("id") {
            Some(Value::String(id)) => id == target,
            Some(Value::Number(id)) if id.is_f64() => match (id.as_f64(), target.parse::<f64>()) {
                (Some(id), Ok(target)) => id == target,
                _ => false,
            },
            Some(Value::Number(id)) => id.to_string() == target,
            _ => false,
        }
    }
}

/// The whole catalog, in whichever layout the file used.
#[derive(Debug, Clone, PartialEq)]
pub enum Catalog {
    /// Category name to records, in file order.
    ByCategory(Vec<(String, Vec<VideoRecord>)>),
    /// Records tagged with their own `category` field.
    Flat(Vec<VideoRecord>),
}

/// Pagination and filtering parameters for [`Catalog::page`].
#[derive(Debug, Clone, Copy)]
pub struct PageRequest<'a> {
    /// 1-based page number.
    pub page: usize,
    pub size: usize,
    pub category: Option<&'a str>,
    pub video_id: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoPage {
    pub videos: Vec<VideoRecord>,
    /// Size of the selection before pagination.
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorySummary {
    pub name: String,
    pub count: usize,
}

impl Catalog {
    /// Resolves the top-level JSON shape into a catalog.
    pub fn from_value(value: Value) -> Result<Self, CatalogError> {
        match value {
            Value::Array(items) => Ok(Self::Flat(records_from(items, "top-level array")?)),
            Value::Object(map) => {
                let mut groups = Vec::with_capacity(map.len());
                for (name, value) in map {
                    let items = match value {
                        Value::Array(items) => items,
                        other => {
                            return Err(CatalogError::UnsupportedFormat(format!(
                                "category {name:?} holds {} instead of an array",
                                json_kind(&other)
                            )));
                        }
                    };
                    let records = records_from(items, &format!("category {name:?}"))?;
                    groups.push((name, records));
                }
                Ok(Self::ByCategory(groups))
            }
            other => Err(CatalogError::UnsupportedFormat(format!(
                "top-level {} is neither an object nor an array",
                json_kind(&other)
            ))),
        }
    }

    /// Every record, in file order. The keyed layout is flattened key by key.
    pub fn records(&self) -> Box<dyn Iterator<Item = &VideoRecord> + '_> {
        match self {
            Self::ByCategory(groups) => Box::new(groups.iter().flat_map(|(_, records)| records)),
            Self::Flat(records) => Box::new(records.iter()),
        }
    }

    /// Records belonging to `category`, or every record when `None`.
    ///
    /// An unknown category yields an empty selection.
    pub fn select(&self, category: Option<&str>) -> Vec<&VideoRecord> {
        match (self, category) {
            (_, None) => self.records().collect(),
            (Self::ByCategory(groups), Some(category)) => groups
                .iter()
                .find(|(name, _)| name == category)
                .map(|(_, records)| records.iter().collect())
                .unwrap_or_default(),
            (Self::Flat(records), Some(category)) => records
                .iter()
                .filter(|record| record.category() == Some(category))
                .collect(),
        }
    }

    pub fn page(&self, request: &PageRequest<'_>) -> VideoPage {
        let category = request.category.filter(|category| !category.is_empty());
        let mut selected = self.select(category);
        if let Some(video_id) = request.video_id {
            selected.retain(|record| record.has_id(video_id));
        }
        debug!(
            category = ?category,
            video_id = ?request.video_id,
            selected = selected.len(),
            "catalog selection"
        );

        let total = selected.len();
        let videos = paginate(&selected, request.page, request.size)
            .iter()
            .map(|record| (*record).clone())
            .collect();
        VideoPage { videos, total }
    }

    /// First record, in file order, whose page URL equals `page_url`.
    pub fn find_by_page_url(&self, page_url: &str) -> Option<&VideoRecord> {
        self.records().find(|record| record.has_page_url(page_url))
    }

    /// Category names with their record counts, in file order.
    ///
    /// For the flat layout a category is listed where it first appears;
    /// records without a textual `category` are not counted.
    pub fn categories(&self) -> Vec<CategorySummary> {
        match self {
            Self::ByCategory(groups) => groups
                .iter()
                .map(|(name, records)| CategorySummary {
                    name: name.clone(),
                    count: records.len(),
                })
                .collect(),
            Self::Flat(records) => {
                let mut summaries: Vec<CategorySummary> = Vec::new();
                for category in records.iter().filter_map(VideoRecord::category) {
                    match summaries.iter_mut().find(|summary| summary.name == category) {
                        Some(summary) => summary.count += 1,
                        None => summaries.push(CategorySummary {
                            name: category.to_owned(),
                            count: 1,
                        }),
                    }
                }
                summaries
            }
        }
    }
}

/// Returns the `[start, end)` window of a 1-based page, clipped to `items`.
///
/// Pages past the end yield an empty slice.
pub fn paginate<T>(items: &[T], page: usize, size: usize) -> &[T] {
    let start = page.saturating_sub(1).saturating_mul(size);
    if start >= items.len() {
        return &[];
    }
    let end = start.saturating_add(size).min(items.len());
    &items[start..end]
}

fn records_from(items: Vec<Value>, origin: &str) -> Result<Vec<VideoRecord>, CatalogError> {
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::Object(fields) => Ok(VideoRecord(fields)),
            other => Err(CatalogError::UnsupportedFormat(format!(
                "entry {index} of {origin} is {} instead of an object",
                json_kind(&other)
            ))),
        })
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Read-only handle on the catalog file.
#[derive(Debug, Clone)]
pub struct CatalogSource {
    path: PathBuf,
}

impl CatalogSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads and resolves the file. Called once per request; nothing is
    /// cached between calls.
    pub async fn load(&self) -> Result<Catalog, CatalogError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|source| CatalogError::Read {
                path: self.path.clone(),
                source,
            })?;
        let value: Value =
            serde_json::from_slice(&bytes).map_err(|source| CatalogError::Parse {
                path: self.path.clone(),
                source,
            })?;
        Catalog::from_value(value)
    }
}
