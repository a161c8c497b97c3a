//! Scoring aggregation
//!
//! Pass-rate templates score the share of applicable requirements found.
//! Risk-point templates add up the points of every answered, scored
//! requirement and compare them with the highest total those requirements
//! allow. A requirement whose answer matches none of its options is
//! unscored and stays out of both totals.

use crate::analysis::{AnalysisResult, ComplianceStatus};
use crate::catalog::{RequirementTemplate, ScoringRegime};
use serde::{Deserialize, Serialize};

/// Accumulated risk for a risk-point template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskScore {
    /// Sum of points over answered, applicable requirements
    pub aggregate: f64,
    /// Sum of each answered requirement's highest possible points
    pub maximum: f64,
    /// `aggregate / maximum` as a rounded percentage; lower is better
    pub percentage: u32,
}

/// Summary of one analysis run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub regime: ScoringRegime,
    pub total: usize,
    pub found: usize,
    pub needs_clarification: usize,
    pub missing: usize,
    pub not_applicable: usize,
    /// Pass rate, or the risk percentage for risk-point templates
    pub overall_score: u32,
    pub risk: Option<RiskScore>,
}

impl Summary {
    pub fn applicable(&self) -> usize {
        self.total - self.not_applicable
    }
}

/// Summarize results under the template's regime
pub fn aggregate(template: &RequirementTemplate, results: &[AnalysisResult]) -> Summary {
    let mut summary = Summary {
        regime: template.regime,
        total: results.len(),
        found: 0,
        needs_clarification: 0,
        missing: 0,
        not_applicable: 0,
        overall_score: 0,
        risk: None,
    };

    for result in results {
        match result.status {
            ComplianceStatus::Found => summary.found += 1,
            ComplianceStatus::NeedsClarification => summary.needs_clarification += 1,
            ComplianceStatus::Missing => summary.missing += 1,
            ComplianceStatus::NotApplicable => summary.not_applicable += 1,
        }
    }

    match template.regime {
        ScoringRegime::PassRate => {
            summary.overall_score = pass_rate(summary.found, summary.applicable());
        }
        ScoringRegime::RiskPoints => {
            let risk = risk_score(template, results);
            summary.overall_score = risk.percentage;
            summary.risk = Some(risk);
        }
    }

    summary
}

fn pass_rate(found: usize, applicable: usize) -> u32 {
    if applicable == 0 {
        return 0;
    }
    (found as f64 / applicable as f64 * 100.0).round() as u32
}

fn risk_score(template: &RequirementTemplate, results: &[AnalysisResult]) -> RiskScore {
    let mut aggregate = 0.0;
    let mut maximum = 0.0;

    for result in results {
        if result.status == ComplianceStatus::NotApplicable {
            continue;
        }
        // Results for requirements the template no longer has carry no maximum.
        let Some(item) = template.item(&result.requirement_id) else {
            continue;
        };
        let Some(max) = item.scoring.max_points().filter(|m| *m > 0.0) else {
            continue;
        };
        let Some(points) = result
            .selected_answer
            .as_deref()
            .and_then(|answer| item.scoring.points_for(answer))
        else {
            continue;
        };

        aggregate += points;
        maximum += max;
    }

    let percentage = if maximum > 0.0 {
        (aggregate / maximum * 100.0).round() as u32
    } else {
        0
    };

    RiskScore {
        aggregate,
        maximum,
        percentage,
    }
}
