//! Minimal `eml://` URI handling.
//!
//! Supports the hierarchical form used by the DevKit, for example
//! `eml://witsml20/Well(<uuid>)/Wellbore(<uuid>)/Channel(<uuid>)`. A segment
//! without an id (`eml://witsml20/Well`) is a folder selecting every object of
//! that type under the preceding segments.

use crate::error::{EtpError, Result};
use crate::types::Uuid;
use std::fmt;
use std::str::FromStr;

const SCHEME: &str = "eml://";

/// One `Type` or `Type(uuid)` path segment.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct UriSegment {
    pub object_type: String,
    pub id: Option<Uuid>,
}

/// Parsed `eml://` URI.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EtpUri {
    family: Option<String>,
    segments: Vec<UriSegment>,
}

impl EtpUri {
    /// The root URI (`eml://`).
    pub fn root() -> Self {
        Self {
            family: None,
            segments: Vec::new(),
        }
    }

    /// Root of a data family, e.g. `eml://witsml20`.
    pub fn family(family: impl Into<String>) -> Self {
        Self {
            family: Some(family.into()),
            segments: Vec::new(),
        }
    }

    pub fn parse(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix(SCHEME)
            .ok_or_else(|| EtpError::InvalidUri(uri.to_string()))?;
        let rest = rest.trim_end_matches('/');
        if rest.is_empty() {
            return Ok(Self::root());
        }

        let mut parts = rest.split('/');
        let family = parts
            .next()
            .filter(|f| !f.is_empty() && !f.contains('('))
            .ok_or_else(|| EtpError::InvalidUri(uri.to_string()))?;

        let mut segments = Vec::new();
        for part in parts {
            segments.push(Self::parse_segment(part).ok_or_else(|| EtpError::InvalidUri(uri.to_string()))?);
        }

        Ok(Self {
            family: Some(family.to_string()),
            segments,
        })
    }

    fn parse_segment(part: &str) -> Option<UriSegment> {
        match part.find('(') {
            Some(open) => {
                let close = part.strip_suffix(')')?;
                let object_type = &part[..open];
                let id = Uuid::parse_str(&close[open + 1..]).ok()?;
                if object_type.is_empty() {
                    return None;
                }
                Some(UriSegment {
                    object_type: object_type.to_string(),
                    id: Some(id),
                })
            }
            None if !part.is_empty() && !part.contains(')') => Some(UriSegment {
                object_type: part.to_string(),
                id: None,
            }),
            None => None,
        }
    }

    /// Append a `Type(uuid)` segment.
    pub fn child(&self, object_type: &str, id: Uuid) -> Self {
        let mut uri = self.clone();
        uri.segments.push(UriSegment {
            object_type: object_type.to_string(),
            id: Some(id),
        });
        uri
    }

    /// Append a `Type` folder segment.
    pub fn folder(&self, object_type: &str) -> Self {
        let mut uri = self.clone();
        uri.segments.push(UriSegment {
            object_type: object_type.to_string(),
            id: None,
        });
        uri
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn data_family(&self) -> Option<&str> {
        self.family.as_deref()
    }

    pub fn segments(&self) -> &[UriSegment] {
        &self.segments
    }

    pub fn last(&self) -> Option<&UriSegment> {
        self.segments.last()
    }

    /// True when the last segment names a single object.
    pub fn is_object(&self) -> bool {
        self.last().map_or(false, |s| s.id.is_some())
    }

    pub fn object_id(&self) -> Option<Uuid> {
        self.last().and_then(|s| s.id)
    }
}

impl FromStr for EtpUri {
    type Err = EtpError;

    fn from_str(s: &str) -> Result<Self> {
        EtpUri::parse(s)
    }
}

impl fmt::Display for EtpUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(SCHEME)?;
        if let Some(family) = &self.family {
            f.write_str(family)?;
        }
        for segment in &self.segments {
            write!(f, "/{}", segment.object_type)?;
            if let Some(id) = segment.id {
                write!(f, "({})", id)?;
            }
        }
        Ok(())
    }
}
