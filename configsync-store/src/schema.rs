//! Collection schema shipped with configsync.
//!
//! The JSON document under `resources/file_mapping.json` is compiled into the
//! binary and handed to [`Backend::create_collection`](crate::Backend) when the
//! entry collection does not exist yet.

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Raw bundled schema document.
pub const FILE_MAPPING_JSON: &str = include_str!("../resources/file_mapping.json");

/// Index-level settings of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSettings {
    pub number_of_shards: u32,
    pub number_of_replicas: u32,
    pub auto_expand_replicas: String,
}

/// Settings plus field mappings for one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub settings: SchemaSettings,
    pub mappings: serde_json::Value,
}

impl CollectionSchema {
    /// The schema of the entry collection.
    pub fn file_mapping() -> Result<Self, StoreError> {
        Ok(serde_json::from_str(FILE_MAPPING_JSON)?)
    }

    /// Mapped type of `field`, e.g. `"keyword"` for `path`.
    pub fn field_type(&self, field: &str) -> Option<&str> {
        self.mappings
            .get("properties")?
            .get(field)?
            .get("type")?
            .as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use configsync_core::types::{CONTENT_FIELD, PATH_FIELD, TIMESTAMP_FIELD};

    #[test]
    fn bundled_mapping_parses() {
        let schema = CollectionSchema::file_mapping().unwrap();
        assert_eq!(schema.settings.number_of_shards, 1);
        assert_eq!(schema.settings.number_of_replicas, 0);
        assert_eq!(schema.settings.auto_expand_replicas, "0-all");
        assert_eq!(schema.field_type(PATH_FIELD), Some("keyword"));
        assert_eq!(schema.field_type(CONTENT_FIELD), Some("binary"));
        assert_eq!(schema.field_type(TIMESTAMP_FIELD), Some("date"));
        assert_eq!(schema.field_type("missing"), None);
    }
}
