//! Package-URL coordinate parsing and rendering.
//!
//! Components are identified by a canonical coordinate string of the form
//! `pkg:type/namespace/name@version` (namespace and version optional).
//! This module implements the subset of the purl spec the pipeline needs:
//! scheme, type, namespace, name, and version. Qualifiers and subpaths are
//! not used anywhere in depscope and are rejected as part of the name.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// A parsed package coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageUrl {
    package_type: String,
    namespace: Option<String>,
    name: String,
    version: Option<String>,
}

impl PackageUrl {
    /// Construct a coordinate from parts. The type is lowercased.
    pub fn new(
        package_type: impl Into<String>,
        namespace: Option<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            package_type: package_type.into().to_lowercase(),
            namespace: namespace.filter(|ns| !ns.is_empty()),
            name: name.into(),
            version: None,
        }
    }

    /// Package type ("npm", "pypi", "github", ...).
    pub fn package_type(&self) -> &str {
        &self.package_type
    }

    /// Namespace (npm scope, GitHub owner), if any.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Package name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Version, if the coordinate pins one.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Human-readable display name: `namespace/name` when namespaced.
    pub fn display_name(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}/{}", ns, self.name),
            None => self.name.clone(),
        }
    }
}

/// Decode `%XX` escapes in a purl segment.
fn decode_segment(segment: &str) -> Result<String> {
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes
                .get(i + 1..i + 3)
                .and_then(|h| std::str::from_utf8(h).ok())
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| {
                    Error::InvalidInput(format!("Invalid percent escape in: {}", segment))
                })?;
            out.push(hex);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out)
        .map_err(|_| Error::InvalidInput(format!("Invalid UTF-8 in segment: {}", segment)))
}

/// Encode the characters that would be ambiguous in a purl segment.
fn encode_segment(segment: &str) -> String {
    segment
        .replace('%', "%25")
        .replace('@', "%40")
        .replace('/', "%2F")
}

impl FromStr for PackageUrl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let rest = s
            .strip_prefix("pkg:")
            .ok_or_else(|| Error::InvalidInput(format!("Missing pkg: scheme in: {}", s)))?
            .trim_start_matches('/');

        // A raw '@' after the last '/' separates the version.
        let last_slash = rest.rfind('/').unwrap_or(0);
        let (path, version) = match rest.rfind('@') {
            Some(idx) if idx > last_slash => {
                let v = &rest[idx + 1..];
                (&rest[..idx], (!v.is_empty()).then(|| v.to_string()))
            }
            _ => (rest, None),
        };

        let segments: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        if segments.len() < 2 {
            return Err(Error::InvalidInput(format!(
                "Coordinate needs at least a type and a name: {}",
                s
            )));
        }

        let package_type = segments[0].to_lowercase();
        if !package_type
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '+' | '-'))
        {
            return Err(Error::InvalidInput(format!(
                "Invalid package type [{}] in: {}",
                package_type, s
            )));
        }

        let name = decode_segment(segments[segments.len() - 1])?;
        let namespace = if segments.len() > 2 {
            let parts: Vec<String> = segments[1..segments.len() - 1]
                .iter()
                .map(|p| decode_segment(p))
                .collect::<Result<_>>()?;
            Some(parts.join("/"))
        } else {
            None
        };

        let version = match version {
            Some(v) => Some(decode_segment(&v)?),
            None => None,
        };

        Ok(Self {
            package_type,
            namespace,
            name,
            version,
        })
    }
}

impl fmt::Display for PackageUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pkg:{}", self.package_type)?;
        if let Some(ns) = &self.namespace {
            for part in ns.split('/') {
                write!(f, "/{}", encode_segment(part))?;
            }
        }
        write!(f, "/{}", encode_segment(&self.name))?;
        if let Some(v) = &self.version {
            write!(f, "@{}", encode_segment(v))?;
        }
        Ok(())
    }
}

impl Serialize for PackageUrl {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PackageUrl {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
