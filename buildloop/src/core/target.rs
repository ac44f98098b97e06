//! Target identifiers of the form `//package/path:unit`.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a target label could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetParseError {
    #[error("target '{0}' must start with '//'")]
    MissingPrefix(String),
    #[error("target '{0}' has an empty unit name")]
    EmptyUnit(String),
    #[error("target '{0}' has more than one ':'")]
    ExtraColon(String),
    #[error("target '{label}' has an invalid package segment '{segment}'")]
    BadSegment { label: String, segment: String },
    #[error("target '{0}' contains whitespace")]
    Whitespace(String),
}

/// A buildable unit: package path (empty for the repository root) plus unit name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Target {
    package: String,
    unit: String,
}

impl Target {
    /// Parse `//pkg:unit`, `//:unit`, or the shorthand `//pkg` (unit = last segment).
    pub fn parse(label: &str) -> Result<Self, TargetParseError> {
        if label.chars().any(char::is_whitespace) {
            return Err(TargetParseError::Whitespace(label.to_string()));
        }
        let rest = label
            .strip_prefix("//")
            .ok_or_else(|| TargetParseError::MissingPrefix(label.to_string()))?;

        let (package, unit) = match rest.split_once(':') {
            Some((_, unit)) if unit.contains(':') => {
                return Err(TargetParseError::ExtraColon(label.to_string()));
            }
            Some((package, unit)) => (package, unit),
            None => (rest, rest.rsplit('/').next().unwrap_or_default()),
        };
        if unit.is_empty() {
            return Err(TargetParseError::EmptyUnit(label.to_string()));
        }
        if !package.is_empty() {
            for segment in package.split('/') {
                if segment.is_empty() || segment == "." || segment == ".." {
                    return Err(TargetParseError::BadSegment {
                        label: label.to_string(),
                        segment: segment.to_string(),
                    });
                }
            }
        }

        Ok(Self {
            package: package.to_string(),
            unit: unit.to_string(),
        })
    }

    /// Package path relative to the repository root; empty for root units.
    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn is_root(&self) -> bool {
        self.package.is_empty()
    }

    /// Canonical `//pkg:unit` label.
    pub fn label(&self) -> String {
        format!("//{}:{}", self.package, self.unit)
    }

    /// Workspace-relative path of the package's build descriptor.
    pub fn descriptor_path(&self, file_name: &str) -> PathBuf {
        if self.is_root() {
            PathBuf::from(file_name)
        } else {
            PathBuf::from(&self.package).join(file_name)
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "//{}:{}", self.package, self.unit)
    }
}

impl FromStr for Target {
    type Err = TargetParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Target {
    type Error = TargetParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Target> for String {
    fn from(target: Target) -> Self {
        target.label()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_package_target() {
        let target = Target::parse("//crates/matcher:grep_matcher").expect("parse");
        assert_eq!(target.package(), "crates/matcher");
        assert_eq!(target.unit(), "grep_matcher");
        assert!(!target.is_root());
        assert_eq!(target.label(), "//crates/matcher:grep_matcher");
    }

    #[test]
    fn parses_root_target() {
        let target = Target::parse("//:ripgrep").expect("parse");
        assert_eq!(target.package(), "");
        assert_eq!(target.unit(), "ripgrep");
        assert!(target.is_root());
        assert_eq!(target.descriptor_path("BUILD.bazel"), PathBuf::from("BUILD.bazel"));
    }

    #[test]
    fn shorthand_uses_last_segment_as_unit() {
        let target = Target::parse("//crates/globset").expect("parse");
        assert_eq!(target.unit(), "globset");
        assert_eq!(target.label(), "//crates/globset:globset");
    }

    #[test]
    fn descriptor_path_joins_package() {
        let target = Target::parse("//crates/cli:grep_cli").expect("parse");
        assert_eq!(
            target.descriptor_path("BUILD.bazel"),
            PathBuf::from("crates/cli/BUILD.bazel")
        );
    }

    #[test]
    fn rejects_malformed_labels() {
        assert_eq!(
            Target::parse("crates/cli:grep_cli"),
            Err(TargetParseError::MissingPrefix("crates/cli:grep_cli".to_string()))
        );
        assert!(matches!(
            Target::parse("//crates/cli:"),
            Err(TargetParseError::EmptyUnit(_))
        ));
        assert!(matches!(Target::parse("//"), Err(TargetParseError::EmptyUnit(_))));
        assert!(matches!(
            Target::parse("//a:b:c"),
            Err(TargetParseError::ExtraColon(_))
        ));
        assert!(matches!(
            Target::parse("//crates//cli:x"),
            Err(TargetParseError::BadSegment { .. })
        ));
        assert!(matches!(
            Target::parse("//../etc:x"),
            Err(TargetParseError::BadSegment { .. })
        ));
        assert!(matches!(
            Target::parse("//crates/cli:grep cli"),
            Err(TargetParseError::Whitespace(_))
        ));
    }

    #[test]
    fn deserializes_from_string() {
        #[derive(Deserialize)]
        struct Wrapper {
            targets: Vec<Target>,
        }
        let parsed: Wrapper = toml::from_str(r#"targets = ["//:ripgrep", "//crates/grep:grep"]"#)
            .expect("parse toml");
        assert_eq!(parsed.targets.len(), 2);
        assert_eq!(parsed.targets[1].unit(), "grep");

        let err = toml::from_str::<Wrapper>(r#"targets = ["ripgrep"]"#)
            .err()
            .expect("invalid label should fail");
        assert!(err.to_string().contains("must start with '//'"));
    }
}
