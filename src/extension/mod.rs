//! Extension lifecycle and capability dispatch

pub mod manager;
pub mod source;

pub use manager::ExtensionManager;
pub use source::{
    Capability, CatalogSource, ChapterInfo, PageInfo, PreferenceField, SourceDescriptor, Title,
    TitlesPage,
};
