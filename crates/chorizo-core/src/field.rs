//! # Field Primitives
//!
//! [`FieldName`] and [`FieldType`]: the two building blocks of every entity
//! schema. Both reject invalid input at construction, so a schema holding
//! them is well-formed by type.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

/// The closed set of field types an entity schema may declare.
///
/// `map` is also accepted under its legacy spelling `dict`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Float,
    /// Hex-encoded bytes.
    Binary,
    /// RFC 3339 timestamp, normalised to UTC.
    Datetime,
    /// Calendar date, `YYYY-MM-DD`.
    Date,
    Boolean,
    /// Arbitrary JSON object.
    #[serde(alias = "dict")]
    Map,
}

impl FieldType {
    /// Every variant, in declaration order.
    pub const ALL: [FieldType; 8] = [
        Self::String,
        Self::Integer,
        Self::Float,
        Self::Binary,
        Self::Datetime,
        Self::Date,
        Self::Boolean,
        Self::Map,
    ];

    /// The canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Binary => "binary",
            Self::Datetime => "datetime",
            Self::Date => "date",
            Self::Boolean => "boolean",
            Self::Map => "map",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dict" => Ok(Self::Map),
            other => Self::ALL
                .into_iter()
                .find(|t| t.as_str() == other)
                .ok_or_else(|| format!("unknown field type '{other}'")),
        }
    }
}

/// A field name matching `^[A-Za-z0-9_]+$`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct FieldName(String);

impl FieldName {
    /// Validate and wrap a field name.
    pub fn new(name: impl Into<String>) -> Result<Self, String> {
        let name = name.into();
        if Self::is_valid(&name) {
            Ok(Self(name))
        } else {
            Err(format!("field name '{name}' must match ^[A-Za-z0-9_]+$"))
        }
    }

    /// Whether `name` would be accepted by [`FieldName::new`].
    pub fn is_valid(name: &str) -> bool {
        !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    }

    /// The name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for FieldName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for FieldName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::new(raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_field_type_round_trips_names() {
        for t in FieldType::ALL {
            assert_eq!(t.as_str().parse::<FieldType>().unwrap(), t);
        }
    }

    #[test]
    fn test_dict_alias_maps_to_map() {
        assert_eq!("dict".parse::<FieldType>().unwrap(), FieldType::Map);
        let t: FieldType = serde_json::from_str("\"dict\"").unwrap();
        assert_eq!(t, FieldType::Map);
        // Serializes under the canonical name.
        assert_eq!(serde_json::to_string(&t).unwrap(), "\"map\"");
    }

    #[test]
    fn test_unknown_field_type_rejected() {
        assert!("int".parse::<FieldType>().is_err());
        assert!(serde_json::from_str::<FieldType>("\"decimal\"").is_err());
    }

    #[test]
    fn test_field_name_accepts_pattern() {
        assert!(FieldName::new("identity").is_ok());
        assert!(FieldName::new("created_at_2").is_ok());
        assert!(FieldName::new("_").is_ok());
    }

    #[test]
    fn test_field_name_rejects_outside_pattern() {
        assert!(FieldName::new("").is_err());
        assert!(FieldName::new("has-dash").is_err());
        assert!(FieldName::new("has space").is_err());
        assert!(FieldName::new("naïve").is_err());
    }

    #[test]
    fn test_field_name_deserialize_validates() {
        assert!(serde_json::from_str::<FieldName>("\"ok_name\"").is_ok());
        assert!(serde_json::from_str::<FieldName>("\"not.ok\"").is_err());
    }

    proptest! {
        #[test]
        fn prop_pattern_names_always_accepted(name in "[A-Za-z0-9_]{1,32}") {
            prop_assert!(FieldName::new(name).is_ok());
        }

        #[test]
        fn prop_names_with_foreign_char_rejected(
            prefix in "[A-Za-z0-9_]{0,8}",
            bad in "[^A-Za-z0-9_]",
            suffix in "[A-Za-z0-9_]{0,8}",
        ) {
            let name = format!("{prefix}{bad}{suffix}");
            prop_assert!(FieldName::new(name).is_err());
        }
    }
}
