use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::histogram;
use quick_xml::de::from_str;
use serde::Deserialize;
use time::{format_description::well_known::Rfc2822, OffsetDateTime};
use tokio::sync::Mutex;

use super::{normalize_text, ContentSource};
use crate::content::{ContentKind, RawItem};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Clone, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    guid: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    #[serde(default)]
    enclosure: Vec<Enclosure>,
}

#[derive(Debug, Clone, Deserialize)]
struct Enclosure {
    #[serde(rename = "@url")]
    url: Option<String>,
}

impl Item {
    fn key(&self) -> Option<&str> {
        self.link
            .as_deref()
            .or(self.guid.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    let dt = OffsetDateTime::parse(ts.trim(), &Rfc2822).ok()?;
    DateTime::from_timestamp(dt.unix_timestamp(), dt.nanosecond())
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}

enum Mode {
    Fixture(String),
    Http { url: String, client: reqwest::Client },
}

/// RSS feed as a content source: items are listed by link (or guid) and
/// their detail is read from the same feed document.
pub struct RssSource {
    name: String,
    kind: ContentKind,
    mode: Mode,
    items: Mutex<Vec<Item>>,
}

impl RssSource {
    pub fn from_url(name: impl Into<String>, kind: ContentKind, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            mode: Mode::Http {
                url: url.into(),
                client: reqwest::Client::new(),
            },
            items: Mutex::new(Vec::new()),
        }
    }

    pub fn from_fixture(name: impl Into<String>, kind: ContentKind, xml: &str) -> Self {
        Self {
            name: name.into(),
            kind,
            mode: Mode::Fixture(xml.to_string()),
            items: Mutex::new(Vec::new()),
        }
    }

    async fn load(&self) -> Result<String> {
        match &self.mode {
            Mode::Fixture(s) => Ok(s.clone()),
            Mode::Http { url, client } => {
                let resp = client
                    .get(url)
                    .send()
                    .await
                    .with_context(|| format!("{} http get()", self.name))?
                    .error_for_status()
                    .with_context(|| format!("{} non-2xx", self.name))?;
                resp.text()
                    .await
                    .with_context(|| format!("{} http .text()", self.name))
            }
        }
    }

    fn parse_items(&self, xml: &str) -> Result<Vec<Item>> {
        let t0 = Instant::now();
        let rss: Rss = from_str(&scrub_html_entities_for_xml(xml))
            .with_context(|| format!("parsing {} rss xml", self.name))?;
        histogram!("rss_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        Ok(rss.channel.item)
    }
}

#[async_trait]
impl ContentSource for RssSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ContentKind {
        self.kind
    }

    async fn list_candidates(&self) -> Result<Vec<String>> {
        let xml = self.load().await?;
        let items = self.parse_items(&xml)?;
        let keys = items
            .iter()
            .filter_map(|it| it.key().map(str::to_owned))
            .collect();
        *self.items.lock().await = items;
        Ok(keys)
    }

    async fn fetch_detail(&self, key: &str) -> Result<Option<RawItem>> {
        let items = self.items.lock().await;
        let Some(it) = items.iter().find(|it| it.key() == Some(key)) else {
            return Ok(None);
        };

        let title = normalize_text(it.title.as_deref().unwrap_or_default());
        let body = normalize_text(it.description.as_deref().unwrap_or_default());
        if title.is_empty() || body.is_empty() {
            return Ok(None);
        }

        Ok(Some(RawItem {
            source_key: key.to_string(),
            title,
            body,
            media: it
                .enclosure
                .iter()
                .filter_map(|e| e.url.clone())
                .collect(),
            published_at: it.pub_date.as_deref().and_then(parse_rfc2822),
        }))
    }
}
