use std::fmt::{Display, Formatter};

use crate::err::OozeError;

// Used when no namespace is provided.
const DEFAULT_NAMESPACE: &str = "minecraft";

/// A path identified by its namespace, e.g. `minecraft:stone`. Used for block
/// and item IDs among other things.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceLocation {
    namespace: String,
    path: String,
}

impl ResourceLocation {
    pub fn new(namespace: &str, path: &str) -> Result<Self, OozeError> {
        if !namespace.chars().all(is_valid_namespace_char) {
            return Err(OozeError::InvalidResourceLocation(namespace.to_owned()));
        }
        Self::validated_path(namespace, path)
    }

    /// Same as [`ResourceLocation::new`], but `namespace` defaults to
    /// "minecraft".
    pub fn minecraft(path: &str) -> Result<Self, OozeError> {
        Self::validated_path(DEFAULT_NAMESPACE, path)
    }

    /// Parses a full resource location (e.g. "minecraft:stone"). A value
    /// without a namespace (e.g. "stone") gets the default namespace
    /// "minecraft"; more than one separator is invalid.
    pub fn parse(value: &str) -> Result<Self, OozeError> {
        match value.split_once(':') {
            None => Self::minecraft(value),
            Some((_, path)) if path.contains(':') => {
                Err(OozeError::InvalidResourceLocation(value.to_owned()))
            }
            Some((namespace, path)) => Self::new(namespace, path),
        }
    }

    fn validated_path(namespace: &str, path: &str) -> Result<Self, OozeError> {
        if !path.chars().all(is_valid_path_char) {
            return Err(OozeError::InvalidResourceLocation(path.to_owned()));
        }
        Ok(Self {
            namespace: namespace.to_owned(),
            path: path.to_owned(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Display for ResourceLocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.namespace, self.path)
    }
}

// Namespaces can contain characters a-z (lowercase), 0-9, periods,
// underscores, and dashes.
fn is_valid_namespace_char(c: char) -> bool {
    matches!(c, 'a'..='z' | '0'..='9' | '.' | '_' | '-')
}

// Paths additionally allow forward slashes.
fn is_valid_path_char(c: char) -> bool {
    is_valid_namespace_char(c) || c == '/'
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_with_namespace() {
        let loc = ResourceLocation::parse("ooze:custom/block").unwrap();
        assert_eq!(loc.namespace(), "ooze");
        assert_eq!(loc.path(), "custom/block");
        assert_eq!(loc.to_string(), "ooze:custom/block");
    }

    #[test]
    fn test_parse_without_namespace() {
        let loc = ResourceLocation::parse("stone").unwrap();
        assert_eq!(loc.namespace(), "minecraft");
        assert_eq!(loc.path(), "stone");
    }

    #[test]
    fn test_parse_rejects_extra_separator() {
        assert!(ResourceLocation::parse("a:b:c").is_err());
    }

    #[test]
    fn test_rejects_bad_characters() {
        assert!(ResourceLocation::parse("UPPER:case").is_err());
        assert!(ResourceLocation::new("name/space", "path").is_err());
        assert!(ResourceLocation::minecraft("sp ace").is_err());
    }

    #[test]
    fn test_equality_is_structural() {
        let a = ResourceLocation::parse("minecraft:stone").unwrap();
        let b = ResourceLocation::parse("stone").unwrap();
        assert_eq!(a, b);
    }
}
