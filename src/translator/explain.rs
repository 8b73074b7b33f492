//! Explain output for a translation
//!
//! Deterministic and human-readable. Translation ids are left out so the
//! same tree always explains the same way.

use std::fmt;

use super::translator::Translation;
use crate::expr::TranslateError;

#[derive(Debug, Clone)]
pub struct ExplainTranslation {
    pub accepted: bool,
    pub collection: Option<String>,
    /// One entry per group scope: correlation and its output lines
    pub groups: Vec<(String, Vec<String>)>,
    /// Emitted stage operators in order
    pub stages: Vec<String>,
    pub eliminated: Vec<String>,
    pub rejection_code: Option<String>,
    pub rejection_severity: Option<String>,
    pub rejection_reason: Option<String>,
}

impl ExplainTranslation {
    pub fn from_translation(translation: &Translation) -> Self {
        let groups = translation
            .groups
            .iter()
            .map(|g| (g.correlation.to_string(), g.describe_outputs()))
            .collect();

        Self {
            accepted: true,
            collection: Some(translation.pipeline.collection.clone()),
            groups,
            stages: translation
                .pipeline
                .operators()
                .into_iter()
                .map(str::to_string)
                .collect(),
            eliminated: translation.eliminated.clone(),
            rejection_code: None,
            rejection_severity: None,
            rejection_reason: None,
        }
    }

    pub fn from_error(err: &TranslateError) -> Self {
        Self {
            accepted: false,
            collection: None,
            groups: Vec::new(),
            stages: Vec::new(),
            eliminated: Vec::new(),
            rejection_code: Some(err.code().to_string()),
            rejection_severity: Some(err.severity().to_string()),
            rejection_reason: Some(err.to_string()),
        }
    }
}

impl fmt::Display for ExplainTranslation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== EXPLAIN TRANSLATION ===")?;

        if !self.accepted {
            writeln!(f, "Status: REJECTED")?;
            if let Some(code) = &self.rejection_code {
                writeln!(f, "Error Code: {}", code)?;
            }
            if let Some(severity) = &self.rejection_severity {
                writeln!(f, "Severity: {}", severity)?;
            }
            if let Some(reason) = &self.rejection_reason {
                writeln!(f, "Reason: {}", reason)?;
            }
            return Ok(());
        }

        writeln!(f, "Status: ACCEPTED")?;
        if let Some(collection) = &self.collection {
            writeln!(f, "Collection: {}", collection)?;
        }
        for (correlation, outputs) in &self.groups {
            writeln!(f, "Group {}:", correlation)?;
            for output in outputs {
                writeln!(f, "  - {}", output)?;
            }
        }
        if self.stages.is_empty() {
            writeln!(f, "Stages: (none)")?;
        } else {
            writeln!(f, "Stages: {}", self.stages.join(" -> "))?;
        }
        if !self.eliminated.is_empty() {
            writeln!(f, "Eliminated:")?;
            for stage in &self.eliminated {
                writeln!(f, "  - {}", stage)?;
            }
        }

        Ok(())
    }
}
