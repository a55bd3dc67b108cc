//! Catalog query request/response models
//!
//! The catalog payload types ([`Title`], [`ChapterInfo`], [`PageInfo`],
//! [`PreferenceField`]) serialize directly; the wrappers here only add the
//! response envelopes.

use crate::extension::source::{ChapterInfo, PageInfo, PreferenceField, Title};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_page")]
    pub page: u32,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: u32,
}

fn default_page() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
pub struct TitleUrlRequest {
    pub title_url: String,
}

#[derive(Debug, Deserialize)]
pub struct ChapterUrlRequest {
    pub chapter_url: String,
}

#[derive(Debug, Deserialize)]
pub struct SetPreferenceRequest {
    pub key: String,
    /// Untyped text; the manager infers the concrete type
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct TitlesPageResponse {
    pub titles: Vec<Title>,
    pub has_next_page: bool,
}

#[derive(Debug, Serialize)]
pub struct TitleResponse {
    pub title: Title,
}

#[derive(Debug, Serialize)]
pub struct ChaptersResponse {
    pub chapters: Vec<ChapterInfo>,
}

#[derive(Debug, Serialize)]
pub struct PagesResponse {
    pub pages: Vec<PageInfo>,
}

#[derive(Debug, Serialize)]
pub struct FiltersResponse {
    pub filters: Vec<PreferenceField>,
}
