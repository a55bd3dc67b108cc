//! Catalog source capability model
//!
//! A loaded plugin exposes one or more catalogs ("sources"). Each source is
//! an opaque, dynamically-instantiated object modeled here as a capability
//! set rather than a type hierarchy: dispatch checks capability membership
//! and fails with NotFound when the role is absent.

use crate::core::error::Result;
use crate::store::PreferenceValue;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The closed set of optional capability roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Popular / latest listing
    List,
    /// Keyword search
    Search,
    /// Title details, chapters and pages
    Detail,
    /// User-configurable preferences
    Configure,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::List => write!(f, "list"),
            Capability::Search => write!(f, "search"),
            Capability::Detail => write!(f, "detail"),
            Capability::Configure => write!(f, "configure"),
        }
    }
}

fn default_capabilities() -> Vec<Capability> {
    vec![Capability::List, Capability::Search, Capability::Detail]
}

fn default_true() -> bool {
    true
}

/// Identity and capability set a source declares when instantiated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub lang: String,
    #[serde(default = "default_true")]
    pub supports_latest: bool,
    /// Configure is opt-in; the query roles are assumed unless declared
    #[serde(default = "default_capabilities")]
    pub capabilities: Vec<Capability>,
}

/// One catalog entry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Title {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub genre: String,
    #[serde(default)]
    pub status: i32,
    #[serde(default)]
    pub thumbnail_url: String,
    #[serde(default)]
    pub initialized: bool,
}

/// One page of catalog results
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TitlesPage {
    pub titles: Vec<Title>,
    #[serde(default)]
    pub has_next_page: bool,
}

/// One chapter of a title
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChapterInfo {
    pub url: String,
    pub name: String,
    #[serde(default)]
    pub date_upload: i64,
    #[serde(default)]
    pub chapter_number: f32,
    #[serde(default)]
    pub scanlator: String,
}

/// One page of a chapter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageInfo {
    pub index: u32,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub image_url: String,
}

/// One entry of a source's preference schema
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreferenceField {
    pub key: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    /// "text", "toggle", "list" or "multi_select"
    #[serde(default)]
    pub kind: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default)]
    pub default_value: serde_json::Value,
    #[serde(default)]
    pub current_value: serde_json::Value,
    #[serde(default)]
    pub entries: Vec<String>,
    #[serde(default)]
    pub entry_values: Vec<String>,
}

/// A live, capability-bearing source instance.
///
/// Implementations delegate into dynamically loaded plugin code; failures
/// propagate verbatim with origin context and are never retried here.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    fn descriptor(&self) -> &SourceDescriptor;

    fn supports(&self, capability: Capability) -> bool {
        self.descriptor().capabilities.contains(&capability)
    }

    async fn search(&self, query: &str, page: u32) -> Result<TitlesPage>;

    async fn popular(&self, page: u32) -> Result<TitlesPage>;

    async fn latest(&self, page: u32) -> Result<TitlesPage>;

    async fn details(&self, title_url: &str) -> Result<Title>;

    async fn chapters(&self, title_url: &str) -> Result<Vec<ChapterInfo>>;

    async fn pages(&self, chapter_url: &str) -> Result<Vec<PageInfo>>;

    async fn preference_schema(&self) -> Result<Vec<PreferenceField>>;

    async fn set_preference(&self, key: &str, value: &PreferenceValue) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_defaults() {
        let descriptor: SourceDescriptor =
            serde_json::from_str(r#"{"id": 7, "name": "Example"}"#).unwrap();
        assert_eq!(descriptor.id, 7);
        assert!(descriptor.supports_latest);
        assert_eq!(
            descriptor.capabilities,
            vec![Capability::List, Capability::Search, Capability::Detail]
        );
    }

    #[test]
    fn test_descriptor_explicit_capabilities() {
        let descriptor: SourceDescriptor = serde_json::from_str(
            r#"{"id": 7, "name": "Example", "capabilities": ["search", "configure"]}"#,
        )
        .unwrap();
        assert_eq!(
            descriptor.capabilities,
            vec![Capability::Search, Capability::Configure]
        );
    }

    #[test]
    fn test_titles_page_parsing() {
        let page: TitlesPage = serde_json::from_str(
            r#"{"titles": [{"url": "/t/1", "title": "One"}], "has_next_page": true}"#,
        )
        .unwrap();
        assert_eq!(page.titles.len(), 1);
        assert!(page.has_next_page);
        assert_eq!(page.titles[0].title, "One");
    }
}
