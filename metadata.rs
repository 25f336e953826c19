//! The metadata document stored (encrypted) in every archive's `.scconfig`.
//!
//! [`MetadataDefaults`] is the explicit input for a fresh document; the caller
//! owns it and passes it to archive creation. The helpers below read and
//! patch the fields the library itself maintains.

use crate::codec::{Map, Value};
use chrono::{SecondsFormat, Utc};

pub const PROJECT: &str = "project";
pub const DOCUMENT_SETTINGS: &str = "document_settings";
pub const SECURITY: &str = "security";
pub const FLAGS: &str = "flags";
pub const REFERENCES: &str = "references";

/// Top-level sections every metadata document carries.
pub const SECTIONS: [&str; 5] = [PROJECT, DOCUMENT_SETTINGS, SECURITY, FLAGS, REFERENCES];

pub const DEFAULT_ENCRYPTION_METHOD: &str = "AES-256-CBC";

/// Field values for a new metadata document.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataDefaults {
    pub name: String,
    pub author: String,
    pub created_at: String,
    pub last_changed_at: String,
    pub editor_version: String,
    pub encoding: String,
    pub line_endings: String,
    pub password_protected: bool,
    pub encryption_method: String,
    pub is_favorite: bool,
}

impl MetadataDefaults {
    /// Defaults for a document called `name`, stamped with the current time.
    pub fn new(name: impl Into<String>) -> Self {
        let now = now_rfc3339();
        Self {
            name: name.into(),
            author: String::new(),
            created_at: now.clone(),
            last_changed_at: now,
            editor_version: env!("CARGO_PKG_VERSION").to_string(),
            encoding: "UTF-8".to_string(),
            line_endings: "LF".to_string(),
            password_protected: false,
            encryption_method: DEFAULT_ENCRYPTION_METHOD.to_string(),
            is_favorite: false,
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn to_document(&self) -> Value {
        let project: Map = [
            ("name", self.name.as_str()),
            ("author", self.author.as_str()),
            ("created_at", self.created_at.as_str()),
            ("last_changed_at", self.last_changed_at.as_str()),
            ("editor_version", self.editor_version.as_str()),
        ]
        .into_iter()
        .collect();

        let document_settings: Map = [
            ("encoding", self.encoding.as_str()),
            ("line_endings", self.line_endings.as_str()),
        ]
        .into_iter()
        .collect();

        let mut security = Map::new();
        security.insert("password_protected", self.password_protected);
        security.insert("encryption_method", self.encryption_method.as_str());

        let mut flags = Map::new();
        flags.insert("is_Favorite", self.is_favorite);

        let mut root = Map::new();
        root.insert(PROJECT, project);
        root.insert(DOCUMENT_SETTINGS, document_settings);
        root.insert(SECURITY, security);
        root.insert(FLAGS, flags);
        root.insert(REFERENCES, Map::new());
        Value::Object(root)
    }
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// True if `doc` is an object holding every section as an object.
pub fn has_schema(doc: &Value) -> bool {
    SECTIONS
        .iter()
        .all(|section| doc.get(section).and_then(Value::as_object).is_some())
}

pub fn project_name(doc: &Value) -> Option<&str> {
    doc.pointer(&[PROJECT, "name"]).and_then(Value::as_str)
}

pub fn is_favorite(doc: &Value) -> Option<bool> {
    doc.pointer(&[FLAGS, "is_Favorite"]).and_then(Value::as_bool)
}

/// Set `project.last_changed_at`. Returns false if `doc` has no project section.
pub fn touch(doc: &mut Value, at: &str) -> bool {
    set_field(doc, PROJECT, "last_changed_at", Value::from(at))
}

/// Set `flags.is_Favorite`. Returns false if `doc` has no flags section.
pub fn set_favorite(doc: &mut Value, favorite: bool) -> bool {
    set_field(doc, FLAGS, "is_Favorite", Value::Bool(favorite))
}

fn set_field(doc: &mut Value, section: &str, field: &str, value: Value) -> bool {
    match doc.pointer_mut(&[section]).and_then(Value::as_object_mut) {
        Some(map) => {
            map.insert(field, value);
            true
        }
        None => false,
    }
}
