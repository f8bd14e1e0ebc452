use serde::Serialize;

/// Regions and categories currently known to the directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CatalogSnapshot {
    pub regions: Vec<String>,
    pub categories: Vec<String>,
}
