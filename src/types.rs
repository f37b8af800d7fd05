use serde::{Deserialize, Serialize};

/// A validated stamp listing, ready to be stored and exported
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StampRecord {
    pub product_id: String,
    pub image_url: String,
    /// Catalog number as listed, e.g. "Norway 1"
    pub stamp_number: String,
    /// Always four ASCII digits
    pub year: String,
    pub country: String,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl StampRecord {
    /// Attach the segment a record was fetched under
    pub fn with_tag(mut self, tag: Option<&Tag>) -> Self {
        match tag {
            Some(Tag::Category(c)) => self.category = Some(c.clone()),
            Some(Tag::Condition(c)) => self.condition = Some(c.clone()),
            None => {}
        }
        self
    }
}

/// Extra label stamped on records from category- or condition-split runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tag {
    Category(String),
    Condition(String),
}

/// Why a raw record was not turned into a [`StampRecord`]
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Rejection {
    #[error("no product identifier")]
    NoIdentifier,
    #[error("product {0} already seen this run")]
    Duplicate(String),
    #[error("missing or placeholder image")]
    NoImage,
    #[error("catalog number {0:?} is not a single number")]
    InvalidCatalogNumber(String),
    #[error("title has no leading year")]
    NoYear,
    #[error("title has no country after the year")]
    NoCountry,
    #[error("missing or unparseable price")]
    NoPrice,
    #[error("extraction failed: {0}")]
    ExtractionError(String),
}

impl Rejection {
    pub fn kind(&self) -> RejectionKind {
        match self {
            Rejection::NoIdentifier => RejectionKind::NoIdentifier,
            Rejection::Duplicate(_) => RejectionKind::Duplicate,
            Rejection::NoImage => RejectionKind::NoImage,
            Rejection::InvalidCatalogNumber(_) => RejectionKind::InvalidCatalogNumber,
            Rejection::NoYear => RejectionKind::NoYear,
            Rejection::NoCountry => RejectionKind::NoCountry,
            Rejection::NoPrice => RejectionKind::NoPrice,
            Rejection::ExtractionError(_) => RejectionKind::ExtractionError,
        }
    }
}

/// Field-less mirror of [`Rejection`], used as a counter key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RejectionKind {
    NoIdentifier,
    Duplicate,
    NoImage,
    InvalidCatalogNumber,
    NoYear,
    NoCountry,
    NoPrice,
    ExtractionError,
}

impl RejectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionKind::NoIdentifier => "no identifier",
            RejectionKind::Duplicate => "duplicate",
            RejectionKind::NoImage => "no image",
            RejectionKind::InvalidCatalogNumber => "invalid catalog number",
            RejectionKind::NoYear => "no year",
            RejectionKind::NoCountry => "no country",
            RejectionKind::NoPrice => "no price",
            RejectionKind::ExtractionError => "extraction error",
        }
    }
}
