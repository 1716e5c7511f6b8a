//! Data quality scorer.
//!
//! Fetches a page of each tracked resource type straight from a server (no
//! fallback: substituting another source would score the wrong server) and
//! scores what comes back.
//!
//! Per resource the score starts at 100 and loses 30 per error issue, 10 per
//! warning and 5 per info issue, plus 50 when nothing is available. Non-Patient
//! resources with data then have a sample of their subject references
//! resolved; any orphan adds an `orphaned-references` warning and costs a
//! further 20 points. Scores are clamped to `0..=100`.
//!
//! The overall score is the mean over *accessible* resources only, so a server
//! exposing one perfect resource type scores 100.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::FetchError;
use crate::fetcher::{ResourceFetcher, SearchParams};
use crate::interpreter::{FhirResponse, interpret};

/// Resource types every assessment covers, in reporting order.
pub const TRACKED_RESOURCES: [&str; 4] = ["Patient", "Observation", "Condition", "MedicationRequest"];

const PAGE_SIZE: u32 = 10;
const REFERENCE_SAMPLE: usize = 3;
const EMPTY_PENALTY: f64 = 50.0;
const ORPHAN_PENALTY: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Info,
    Warning,
    Error,
}

impl IssueSeverity {
    pub fn penalty(&self) -> f64 {
        match self {
            IssueSeverity::Error => 30.0,
            IssueSeverity::Warning => 10.0,
            IssueSeverity::Info => 5.0,
        }
    }
}

impl fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueSeverity::Info => f.write_str("info"),
            IssueSeverity::Warning => f.write_str("warning"),
            IssueSeverity::Error => f.write_str("error"),
        }
    }
}

/// A finding about a server's data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: IssueSeverity,
    /// Short tag such as `empty-resource` or `network-error`.
    pub code: String,
    pub details: String,
}

impl Issue {
    pub fn new(severity: IssueSeverity, code: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            severity,
            code: code.into(),
            details: details.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceAssessment {
    pub accessible: bool,
    pub total: u64,
    pub issues: Vec<Issue>,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResourceAssessment {
    fn inaccessible(error: &FetchError) -> Self {
        let code = match error {
            FetchError::Http { .. } => "http-error",
            _ => "network-error",
        };
        Self {
            accessible: false,
            total: 0,
            issues: vec![Issue::new(IssueSeverity::Error, code, error.to_string())],
            score: 0.0,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub server_endpoint: String,
    pub timestamp: DateTime<Utc>,
    pub per_resource: BTreeMap<String, ResourceAssessment>,
    pub overall_score: f64,
}

impl QualityAssessment {
    /// Build an assessment, computing the overall score.
    pub fn new(
        server_endpoint: impl Into<String>,
        per_resource: BTreeMap<String, ResourceAssessment>,
    ) -> Self {
        let overall_score = overall_score(&per_resource);
        Self {
            server_endpoint: server_endpoint.into(),
            timestamp: Utc::now(),
            per_resource,
            overall_score,
        }
    }

    /// Multi-line report for chat output.
    pub fn narrative(&self, scheme: BandScheme) -> String {
        let mut content = format!(
            "**Data Quality Assessment for {}**\n\n",
            self.server_endpoint
        );

        for resource_type in TRACKED_RESOURCES {
            let Some(assessment) = self.per_resource.get(resource_type) else {
                continue;
            };
            if assessment.accessible {
                content.push_str(&format!(
                    "✅ **{}**: {} resources available (score {:.0}/100)\n",
                    resource_type, assessment.total, assessment.score
                ));
                if assessment.issues.iter().any(|i| i.code == "orphaned-references") {
                    content.push_str("  ⚠️  Warning: Found orphaned patient references\n");
                }
            } else {
                content.push_str(&format!(
                    "❌ **{}**: Not accessible ({})\n",
                    resource_type,
                    assessment.error.as_deref().unwrap_or("unknown error")
                ));
            }
        }

        let band = scheme.band(self.overall_score);
        content.push_str(&format!(
            "\n**Overall Score**: {:.0}/100\n{} {}",
            self.overall_score, band.symbol, band.description
        ));
        content
    }
}

/// Presentation label for a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Band {
    pub label: &'static str,
    pub description: &'static str,
    pub symbol: &'static str,
}

/// How scores are bucketed for display. Both schemes are in use: the
/// dashboard shows four bands, the chat report shows three availability
/// levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BandScheme {
    /// EXCELLENT (>= 80), GOOD (>= 60), FAIR (>= 40), POOR.
    FourBand,
    /// good (>= 80), limited (>= 50), poor availability.
    #[default]
    TwoBand,
}

impl BandScheme {
    pub fn band(&self, score: f64) -> Band {
        match self {
            BandScheme::FourBand if score >= 80.0 => Band {
                label: "EXCELLENT",
                description: "This server has high-quality, well-connected data",
                symbol: "✅",
            },
            BandScheme::FourBand if score >= 60.0 => Band {
                label: "GOOD",
                description: "This server has decent data with some issues",
                symbol: "✅",
            },
            BandScheme::FourBand if score >= 40.0 => Band {
                label: "FAIR",
                description: "This server has significant data quality issues",
                symbol: "⚠️ ",
            },
            BandScheme::FourBand => Band {
                label: "POOR",
                description: "This server has major data quality problems",
                symbol: "❌",
            },
            BandScheme::TwoBand if score >= 80.0 => Band {
                label: "good",
                description: "This server has good data availability",
                symbol: "✅",
            },
            BandScheme::TwoBand if score >= 50.0 => Band {
                label: "limited",
                description: "This server has limited data availability",
                symbol: "⚠️ ",
            },
            BandScheme::TwoBand => Band {
                label: "poor",
                description: "This server has poor data availability",
                symbol: "❌",
            },
        }
    }
}

/// Score from issue penalties and emptiness, clamped at 0.
pub fn issue_score(issues: &[Issue], available: u64) -> f64 {
    let mut score = 100.0;
    for issue in issues {
        score -= issue.severity.penalty();
    }
    if available == 0 {
        score -= EMPTY_PENALTY;
    }
    score.max(0.0)
}

/// Mean score over accessible resources, 0 when none are.
pub fn overall_score(per_resource: &BTreeMap<String, ResourceAssessment>) -> f64 {
    let accessible: Vec<f64> = per_resource
        .values()
        .filter(|r| r.accessible)
        .map(|r| r.score)
        .collect();
    if accessible.is_empty() {
        0.0
    } else {
        (accessible.iter().sum::<f64>() / accessible.len() as f64).clamp(0.0, 100.0)
    }
}

/// Scores a server's data by direct reads.
pub struct DataQualityScorer {
    fetcher: Arc<dyn ResourceFetcher>,
}

impl DataQualityScorer {
    pub fn new(fetcher: Arc<dyn ResourceFetcher>) -> Self {
        Self { fetcher }
    }

    /// Assess every tracked resource type on `server_endpoint`, sequentially.
    pub async fn assess(&self, server_endpoint: &str) -> QualityAssessment {
        let server_endpoint = server_endpoint.trim_end_matches('/');
        info!("Assessing data quality of {}", server_endpoint);

        let mut per_resource = BTreeMap::new();
        for resource_type in TRACKED_RESOURCES {
            let assessment = self.assess_resource(server_endpoint, resource_type).await;
            per_resource.insert(resource_type.to_string(), assessment);
        }

        let assessment = QualityAssessment::new(server_endpoint, per_resource);
        info!(
            "Assessment of {} complete: overall score {:.1}",
            server_endpoint, assessment.overall_score
        );
        assessment
    }

    async fn assess_resource(&self, server: &str, resource_type: &str) -> ResourceAssessment {
        let json = match self
            .fetcher
            .fetch(server, resource_type, &SearchParams::count(PAGE_SIZE))
            .await
        {
            Ok(json) => json,
            Err(e) => {
                warn!("{} not accessible on {}: {}", resource_type, server, e);
                return ResourceAssessment::inaccessible(&e);
            }
        };

        let bundle = match interpret(&json) {
            FhirResponse::Bundle(bundle) => bundle,
            FhirResponse::OperationOutcome(outcome) => {
                return ResourceAssessment {
                    accessible: true,
                    total: 0,
                    issues: outcome.issues,
                    score: 0.0,
                    error: None,
                };
            }
            FhirResponse::Resource(resource) => {
                return ResourceAssessment {
                    accessible: true,
                    total: 0,
                    issues: vec![Issue::new(
                        IssueSeverity::Error,
                        "unexpected-response",
                        format!("Expected a Bundle, got {}", resource.resource_type()),
                    )],
                    score: 0.0,
                    error: None,
                };
            }
        };

        let available = bundle.available();
        let mut issues = Vec::new();
        if available == 0 {
            issues.push(Issue::new(
                IssueSeverity::Info,
                "empty-resource",
                "No resources found",
            ));
        }
        let mut score = issue_score(&issues, available);

        if resource_type != "Patient" && !bundle.is_empty() {
            let patient_ids: BTreeSet<&str> = bundle
                .entries
                .iter()
                .take(REFERENCE_SAMPLE)
                .filter(|entry| {
                    entry
                        .subject_reference()
                        .is_some_and(|r| r.starts_with("Patient/"))
                })
                .filter_map(|entry| entry.subject_id())
                .collect();

            let orphaned = self.count_orphans(server, &patient_ids).await;
            if orphaned > 0 {
                issues.push(Issue::new(
                    IssueSeverity::Warning,
                    "orphaned-references",
                    format!("Found {} orphaned patient references", orphaned),
                ));
                score -= ORPHAN_PENALTY;
            }
        }

        ResourceAssessment {
            accessible: true,
            total: available,
            issues,
            score: score.clamp(0.0, 100.0),
            error: None,
        }
    }

    /// References that 404 or cannot be checked at all count as orphaned.
    async fn count_orphans(&self, server: &str, patient_ids: &BTreeSet<&str>) -> usize {
        let mut orphaned = 0;
        for id in patient_ids {
            let path = format!("Patient/{}", id);
            match self.fetcher.fetch(server, &path, &SearchParams::new()).await {
                Ok(_) => {}
                Err(FetchError::Http { status: 404, .. }) => {
                    debug!("Orphaned reference {}", path);
                    orphaned += 1;
                }
                Err(FetchError::Http { status, .. }) => {
                    debug!("Reference {} check returned HTTP {}", path, status);
                }
                Err(e) => {
                    debug!("Reference {} could not be verified: {}", path, e);
                    orphaned += 1;
                }
            }
        }
        orphaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(accessible: bool, score: f64) -> ResourceAssessment {
        ResourceAssessment {
            accessible,
            total: 5,
            issues: Vec::new(),
            score,
            error: None,
        }
    }

    #[test]
    fn test_issue_score_penalties() {
        let issues = vec![
            Issue::new(IssueSeverity::Error, "e", ""),
            Issue::new(IssueSeverity::Warning, "w", ""),
            Issue::new(IssueSeverity::Info, "i", ""),
        ];
        assert_eq!(issue_score(&issues, 10), 55.0);
        assert_eq!(issue_score(&[], 10), 100.0);
        assert_eq!(
            issue_score(&[Issue::new(IssueSeverity::Info, "empty-resource", "")], 0),
            45.0
        );
        assert_eq!(issue_score(&issues, 0), 5.0);
        let many = vec![Issue::new(IssueSeverity::Error, "e", ""); 5];
        assert_eq!(issue_score(&many, 0), 0.0);
    }

    #[test]
    fn test_overall_excludes_inaccessible() {
        let mut per_resource = BTreeMap::new();
        per_resource.insert("Patient".to_string(), resource(true, 100.0));
        per_resource.insert("Condition".to_string(), resource(false, 0.0));
        per_resource.insert("Observation".to_string(), resource(true, 80.0));

        assert_eq!(overall_score(&per_resource), 90.0);
    }

    #[test]
    fn test_overall_zero_when_nothing_accessible() {
        let mut per_resource = BTreeMap::new();
        per_resource.insert("Patient".to_string(), resource(false, 0.0));
        assert_eq!(overall_score(&per_resource), 0.0);
    }

    #[test]
    fn test_band_schemes() {
        assert_eq!(BandScheme::FourBand.band(85.0).label, "EXCELLENT");
        assert_eq!(BandScheme::FourBand.band(60.0).label, "GOOD");
        assert_eq!(BandScheme::FourBand.band(45.0).label, "FAIR");
        assert_eq!(BandScheme::FourBand.band(10.0).label, "POOR");

        assert_eq!(BandScheme::TwoBand.band(80.0).label, "good");
        assert_eq!(BandScheme::TwoBand.band(55.0).label, "limited");
        assert_eq!(BandScheme::TwoBand.band(49.9).label, "poor");
    }

    #[test]
    fn test_narrative_lists_inaccessible_resources() {
        let mut per_resource = BTreeMap::new();
        per_resource.insert("Patient".to_string(), resource(true, 100.0));
        per_resource.insert(
            "Condition".to_string(),
            ResourceAssessment::inaccessible(&FetchError::Http {
                status: 500,
                message: "Internal Server Error".into(),
            }),
        );
        let assessment = QualityAssessment::new("https://example.org/fhir", per_resource);

        let text = assessment.narrative(BandScheme::TwoBand);
        assert!(text.contains("❌ **Condition**: Not accessible (HTTP 500: Internal Server Error)"));
        assert!(text.contains("**Overall Score**: 100/100"));
        assert!(text.contains("good data availability"));
    }
}
