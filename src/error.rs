use thiserror::Error;

use crate::scene::ObjectId;

/// Fatal conversion failures.
///
/// Anything reported through this type aborts the whole import or export call.
/// Per-object problems are returned as warning strings next to the result.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConversionError {
    #[error("{path}: {message}")]
    StructuralValidation { path: String, message: String },
    #[error("{path}: importing '{feature}' is not supported")]
    UnsupportedFeature { feature: String, path: String },
    #[error("unsupported format version: {version}")]
    UnsupportedFormatVersion { version: String },
    #[error("unable to find geometry called '{identifier}'")]
    GeometryNotFound { identifier: String },
    #[error("name conflict: more than one object exports as '{name}'")]
    NameConflict { name: String },
    #[error("bone '{bone}' references missing parent '{parent}'")]
    DanglingParent { bone: String, parent: String },
    #[error("parent links of '{bone}' form a cycle")]
    ParentCycle { bone: String },
    #[error("object {id} is not part of the scene graph")]
    MissingNode { id: ObjectId },
    #[error("frame rate must be positive, got {fps}")]
    InvalidFrameRate { fps: f64 },
}

impl ConversionError {
    pub(crate) fn structural(path: &JsonPath, message: impl Into<String>) -> Self {
        Self::StructuralValidation {
            path: path.to_string(),
            message: message.into(),
        }
    }
}

/// Location inside a JSON document used in structural validation messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JsonPath {
    segments: Vec<JsonSegment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum JsonSegment {
    Key(String),
    Index(usize),
}

impl JsonPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn key(&self, key: &str) -> Self {
        let mut next = self.clone();
        next.segments.push(JsonSegment::Key(key.to_string()));
        next
    }

    pub fn index(&self, index: usize) -> Self {
        let mut next = self.clone();
        next.segments.push(JsonSegment::Index(index));
        next
    }
}

impl std::fmt::Display for JsonPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("$");
        }
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                JsonSegment::Key(key) if i == 0 => write!(f, "{key}")?,
                JsonSegment::Key(key) => write!(f, ".{key}")?,
                JsonSegment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_nested_path_when_formatting_then_keys_and_indices_are_joined() {
        let path = JsonPath::root()
            .key("minecraft:geometry")
            .index(0)
            .key("bones")
            .index(3)
            .key("pivot");

        assert_eq!(path.to_string(), "minecraft:geometry[0].bones[3].pivot");
    }

    #[test]
    fn given_structural_error_when_displaying_then_message_starts_with_path() {
        let path = JsonPath::root().key("format_version");
        let error = ConversionError::structural(&path, "is not a string");

        assert_eq!(error.to_string(), "format_version: is not a string");
        assert_eq!(JsonPath::root().to_string(), "$");
    }
}
