//! Scan record: the structured view of an inbound scan result event.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Severity counters reported by the scanner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VulnerabilitySummary {
    pub critical: u64,
    pub high: u64,
    pub medium: u64,
    pub low: u64,
    pub negligible: u64,
    pub malware: u64,
    pub sensitive: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    pub scan_malware: bool,
    pub scan_sensitive_data: bool,
}

/// One assurance control evaluated against the image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssuranceCheck {
    pub control: String,
    pub policy_name: String,
    pub failed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssuranceResults {
    pub disallowed: bool,
    pub checks_performed: Vec<AssuranceCheck>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vulnerability {
    pub name: String,
    pub version: String,
    pub fix_version: String,
    pub aqua_severity: String,
}

/// A scanned resource (package, file) and the vulnerabilities found in it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Resource {
    pub resource: ResourceInfo,
    pub vulnerabilities: Vec<Vulnerability>,
}

/// Structured scan result. Unknown fields are ignored, missing ones default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanRecord {
    pub image: String,
    pub registry: String,
    pub digest: String,
    pub disallowed: bool,
    pub vulnerability_summary: VulnerabilitySummary,
    pub scan_options: ScanOptions,
    pub image_assurance_results: AssuranceResults,
    pub resources: Vec<Resource>,
    pub application_scope_owners: Vec<String>,
}

impl ScanRecord {
    /// Deserialize from an already parsed event.
    pub fn from_value(value: &Value) -> serde_json::Result<Self> {
        Self::deserialize(value)
    }

    /// Identity used for dedup lookups: `<registry>/<image>`.
    ///
    /// Falls back to the image digest when no image name is present.
    /// `None` when the record carries neither.
    pub fn unique_id(&self) -> Option<String> {
        if !self.image.is_empty() {
            Some(format!("{}/{}", self.registry, self.image))
        } else if !self.digest.is_empty() {
            Some(self.digest.clone())
        } else {
            None
        }
    }

    pub fn is_disallowed(&self) -> bool {
        self.disallowed || self.image_assurance_results.disallowed
    }

    /// Owners joined with `;`, or `None` when there are none.
    pub fn owners(&self) -> Option<String> {
        if self.application_scope_owners.is_empty() {
            None
        } else {
            Some(self.application_scope_owners.join(";"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_partial_payload_with_defaults() {
        let value = json!({
            "image": "alpine:3.18",
            "registry": "docker.io",
            "vulnerability_summary": { "critical": 1, "medium": 2 },
            "unexpected": "ignored"
        });
        let scan = ScanRecord::from_value(&value).unwrap();
        assert_eq!(scan.vulnerability_summary.critical, 1);
        assert_eq!(scan.vulnerability_summary.medium, 2);
        assert_eq!(scan.vulnerability_summary.high, 0);
        assert!(scan.resources.is_empty());
        assert_eq!(scan.unique_id().as_deref(), Some("docker.io/alpine:3.18"));
    }

    #[test]
    fn unique_id_falls_back_to_digest() {
        let scan = ScanRecord {
            digest: "sha256:abc".to_string(),
            ..Default::default()
        };
        assert_eq!(scan.unique_id().as_deref(), Some("sha256:abc"));
        assert_eq!(ScanRecord::default().unique_id(), None);
    }

    #[test]
    fn owners_are_joined() {
        let scan = ScanRecord {
            application_scope_owners: vec!["alice@example.com".into(), "bob@example.com".into()],
            ..Default::default()
        };
        assert_eq!(scan.owners().as_deref(), Some("alice@example.com;bob@example.com"));
        assert_eq!(ScanRecord::default().owners(), None);
    }

    #[test]
    fn disallowed_from_either_flag() {
        let mut scan = ScanRecord::default();
        assert!(!scan.is_disallowed());
        scan.image_assurance_results.disallowed = true;
        assert!(scan.is_disallowed());
    }
}
