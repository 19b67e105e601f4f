// src/content.rs
//! Item types flowing through a source run: raw detail from a fetcher, the
//! enriched record, and the closed enums that tie a record to its table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Which content family a source produces. Decides the destination table and
/// the row layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Article,
    Tweet,
    Video,
}

impl ContentKind {
    pub fn table(self) -> Table {
        match self {
            ContentKind::Article => Table::Articles,
            ContentKind::Tweet => Table::Tweets,
            ContentKind::Video => Table::YoutubeVideos,
        }
    }
}

/// Persisted tables the pipeline writes to. Each has one unique natural key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Articles,
    Tweets,
    YoutubeVideos,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Table::Articles => "articles",
            Table::Tweets => "tweets",
            Table::YoutubeVideos => "youtube_videos",
        }
    }

    /// Unique column used both for duplicate lookups and as the upsert conflict key.
    pub fn key_column(self) -> &'static str {
        match self {
            Table::Articles => "url",
            Table::Tweets | Table::YoutubeVideos => "id",
        }
    }
}

/// Editorial category assigned by the enrichment step. Stored as 1..=5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Politics,
    Economy,
    #[default]
    Society,
    Technology,
    Culture,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Politics,
        Category::Economy,
        Category::Society,
        Category::Technology,
        Category::Culture,
    ];

    pub fn number(self) -> u8 {
        match self {
            Category::Politics => 1,
            Category::Economy => 2,
            Category::Society => 3,
            Category::Technology => 4,
            Category::Culture => 5,
        }
    }

    pub fn from_number(n: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.number() == n)
    }
}

/// Full detail returned by a fetcher for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    pub source_key: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub media: Vec<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// A summary point and the elaboration generated for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryPoint {
    pub line: String,
    pub detail: String,
}

/// Enriched record ready for persistence.
///
/// Summary lines and details are kept as pairs so the two sequences always
/// have the same length; [`EnrichedItem::summary_lines`] and
/// [`EnrichedItem::details`] expose them positionally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedItem {
    pub kind: ContentKind,
    pub source_key: String,
    pub title: String,
    pub body: String,
    pub media: Vec<String>,
    pub summary: Vec<SummaryPoint>,
    pub category: Category,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl EnrichedItem {
    pub fn summary_lines(&self) -> Vec<&str> {
        self.summary.iter().map(|p| p.line.as_str()).collect()
    }

    pub fn details(&self) -> Vec<&str> {
        self.summary.iter().map(|p| p.detail.as_str()).collect()
    }

    /// Row for the kind's table. The natural key is always present under
    /// `Table::key_column`.
    pub fn to_row(&self) -> Value {
        let summary = self.summary_lines();
        let details = self.details();
        let published = self.published_at.map(|t| t.to_rfc3339());
        let created = self.created_at.to_rfc3339();
        let category = self.category.number();

        match self.kind {
            ContentKind::Article => json!({
                "url": self.source_key,
                "title": self.title,
                "content": self.body,
                "images": self.media,
                "summary": summary,
                "details": details,
                "category": category,
                "published_at": published,
                "created_at": created,
            }),
            ContentKind::Tweet => json!({
                "id": self.source_key,
                "text": self.body,
                "title": self.title,
                "media": self.media,
                "summary": summary,
                "details": details,
                "category": category,
                "posted_at": published,
                "created_at": created,
            }),
            ContentKind::Video => json!({
                "id": self.source_key,
                "title": self.title,
                "description": self.body,
                "thumbnail": self.media.first(),
                "summary": summary,
                "details": details,
                "category": category,
                "published_at": published,
                "created_at": created,
            }),
        }
    }
}
