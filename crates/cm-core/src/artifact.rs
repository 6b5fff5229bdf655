// SPDX-License-Identifier: MIT OR Apache-2.0
//! Content-addressed artifacts and their manifest side-cars.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// The kind of work product an artifact carries.
///
/// Closed set of named variants plus an open `Other` escape hatch so a
/// forward-compatible worker payload never fails to deserialize. Serialized
/// as a plain string on the wire (`"code_analysis"`, `"my_custom_type"`, ...)
/// rather than the usual derive-tagged form, since `Other` must round-trip
/// an arbitrary string rather than a fixed variant name.
#[derive(Debug, Clone, PartialEq, Eq, JsonSchema)]
pub enum ArtifactType {
    /// Source code.
    Code,
    /// Prose documentation.
    Documentation,
    /// A data or API schema.
    Schema,
    /// A configuration file or fragment.
    Configuration,
    /// Output of the analyzer's `/analyze` endpoint.
    CodeAnalysis,
    /// Output of the architect's `/design` endpoint.
    ArchitectureDesign,
    /// Output of the tester's `/generate-tests` endpoint.
    TestSuite,
    /// Any other artifact kind not named above.
    Other(String),
}

impl Serialize for ArtifactType {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.name())
    }
}

impl<'de> Deserialize<'de> for ArtifactType {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Ok(match s.as_str() {
            "code" => ArtifactType::Code,
            "documentation" => ArtifactType::Documentation,
            "schema" => ArtifactType::Schema,
            "configuration" => ArtifactType::Configuration,
            "code_analysis" => ArtifactType::CodeAnalysis,
            "architecture_design" => ArtifactType::ArchitectureDesign,
            "test_suite" => ArtifactType::TestSuite,
            other => ArtifactType::Other(other.to_string()),
        })
    }
}

impl ArtifactType {
    /// The filesystem suffix used for this type's content file
    /// (`<root>/artifacts/<uuid>.<type-suffix>`).
    #[must_use]
    pub fn suffix(&self) -> &str {
        match self {
            ArtifactType::Code => "code",
            ArtifactType::Documentation => "md",
            ArtifactType::Schema => "schema.json",
            ArtifactType::Configuration => "conf",
            ArtifactType::CodeAnalysis => "analysis.json",
            ArtifactType::ArchitectureDesign => "design.md",
            ArtifactType::TestSuite => "tests",
            ArtifactType::Other(s) => s.as_str(),
        }
    }

    /// The wire name for this type (what `to_string`/serde produce).
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            ArtifactType::Code => "code".to_string(),
            ArtifactType::Documentation => "documentation".to_string(),
            ArtifactType::Schema => "schema".to_string(),
            ArtifactType::Configuration => "configuration".to_string(),
            ArtifactType::CodeAnalysis => "code_analysis".to_string(),
            ArtifactType::ArchitectureDesign => "architecture_design".to_string(),
            ArtifactType::TestSuite => "test_suite".to_string(),
            ArtifactType::Other(s) => s.clone(),
        }
    }
}

/// A content-addressed blob. Once written, `content` and `checksum` are
/// immutable: `checksum == SHA-256(content)` always holds on read.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Artifact {
    /// Unique identifier, also the content/manifest filename stem.
    pub artifact_id: Uuid,
    /// The kind of work product.
    #[serde(rename = "type")]
    pub artifact_type: ArtifactType,
    /// Raw content bytes, serialized as a JSON string (UTF-8 artifacts) or
    /// base64 (binary artifacts) by the artifact store's transport layer —
    /// in-memory this is always the exact bytes supplied to `store`.
    #[serde(with = "content_as_string")]
    pub content: Vec<u8>,
    /// Caller-supplied metadata, stored verbatim plus a `clone` key when
    /// the caller identifies itself.
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    /// `content.len()` in bytes.
    pub size: usize,
    /// When this artifact was stored.
    pub timestamp: DateTime<Utc>,
}

mod content_as_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        match std::str::from_utf8(bytes) {
            Ok(text) => s.serialize_str(text),
            Err(_) => s.serialize_str(&data_encoding_base64(bytes)),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        Ok(s.into_bytes())
    }

    // Minimal base64 encoder so binary artifact content survives JSON
    // round-trips without adding a dependency solely for this edge case.
    fn data_encoding_base64(bytes: &[u8]) -> String {
        const TABLE: &[u8; 64] =
            b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
        let mut out = String::with_capacity((bytes.len() + 2) / 3 * 4);
        for chunk in bytes.chunks(3) {
            let b0 = chunk[0];
            let b1 = *chunk.get(1).unwrap_or(&0);
            let b2 = *chunk.get(2).unwrap_or(&0);
            out.push(TABLE[(b0 >> 2) as usize] as char);
            out.push(TABLE[(((b0 & 0x03) << 4) | (b1 >> 4)) as usize] as char);
            out.push(if chunk.len() > 1 {
                TABLE[(((b1 & 0x0f) << 2) | (b2 >> 6)) as usize] as char
            } else {
                '='
            });
            out.push(if chunk.len() > 2 {
                TABLE[(b2 & 0x3f) as usize] as char
            } else {
                '='
            });
        }
        out
    }
}

/// The small index side-car for one artifact. Created with its artifact,
/// deleted with its artifact, never modified. Carries no artifact bytes —
/// this is what crosses worker boundaries inside a [`crate::ContextEnvelope`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Manifest {
    /// Identifies the artifact this manifest describes.
    pub artifact_id: Uuid,
    /// The artifact's type.
    #[serde(rename = "type")]
    pub artifact_type: ArtifactType,
    /// Hex-encoded SHA-256 of the artifact's content.
    pub checksum: String,
    /// A resolvable locator to the content file: the canonical form is a
    /// `file://` URI, but a bare filesystem path is tolerated on read for
    /// manifests written by older implementations (Open Question #2).
    pub location: String,
    /// `content.len()` in bytes.
    pub size: usize,
    /// When the artifact was stored.
    pub timestamp: DateTime<Utc>,
    /// The artifact's metadata, duplicated here so a manifest alone is
    /// enough context for routing/display decisions.
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}
