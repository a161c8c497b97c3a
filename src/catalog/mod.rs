//! Requirement catalog
//!
//! A template is a named list of compliance requirements grouped by
//! category. Each requirement carries a free-text scoring rule such as
//! `"Yes = 1000, No = 0"`; the rule is parsed once when the template is
//! loaded and downstream code only ever sees the structured form.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

const BUILTIN_TEMPLATES: &[(&str, &str)] = &[
    (
        "mica_whitepaper.toml",
        include_str!("../../templates/mica_whitepaper.toml"),
    ),
    (
        "mica_legal.toml",
        include_str!("../../templates/mica_legal.toml"),
    ),
];

/// `label = points` pairs inside a scoring rule
static OUTCOME_PAIR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([A-Za-z][^=,;:\n]*?)\s*[=:]\s*(-?\d+(?:\.\d+)?)").expect("valid outcome regex")
});

static BARE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-?\d+(?:\.\d+)?").expect("valid number regex"));

/// How a template's results are summarized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringRegime {
    /// Share of applicable requirements found
    PassRate,
    /// Accumulated risk points against the template's maximum
    RiskPoints,
}

impl ScoringRegime {
    /// Regime for templates that do not declare one.
    ///
    /// Legal templates are risk-scored, everything else uses pass rates.
    pub fn infer_from_name(name: &str) -> Self {
        if name.to_lowercase().contains("legal") {
            ScoringRegime::RiskPoints
        } else {
            ScoringRegime::PassRate
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScoringRegime::PassRate => "pass_rate",
            ScoringRegime::RiskPoints => "risk_points",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pass_rate" => Some(ScoringRegime::PassRate),
            "risk_points" => Some(ScoringRegime::RiskPoints),
            _ => None,
        }
    }
}

impl std::fmt::Display for ScoringRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScoringRegime::PassRate => write!(f, "pass rate"),
            ScoringRegime::RiskPoints => write!(f, "risk points"),
        }
    }
}

/// One possible answer and the points it is worth
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringOutcome {
    pub label: String,
    pub points: f64,
}

/// Structured form of a requirement's scoring rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScoringLogic {
    /// Free-text item, excluded from point totals
    NotScored,
    /// Finite set of answers with point values
    Points(Vec<ScoringOutcome>),
}

impl ScoringLogic {
    /// Parse a free-text rule such as `"Yes = 1000, No = 0"`
    pub fn parse(raw: &str) -> Self {
        let mut outcomes: Vec<ScoringOutcome> = Vec::new();

        for caps in OUTCOME_PAIR.captures_iter(raw) {
            let label = caps[1].trim().to_string();
            let Ok(points) = caps[2].parse::<f64>() else {
                continue;
            };
            if !outcomes.iter().any(|o| o.label.eq_ignore_ascii_case(&label)) {
                outcomes.push(ScoringOutcome { label, points });
            }
        }

        if outcomes.is_empty() {
            // Rules like "0 - 1000" only list the values themselves.
            for m in BARE_NUMBER.find_iter(raw) {
                if let Ok(points) = m.as_str().parse::<f64>() {
                    if !outcomes.iter().any(|o| o.points == points) {
                        outcomes.push(ScoringOutcome {
                            label: m.as_str().to_string(),
                            points,
                        });
                    }
                }
            }
        }

        if outcomes.is_empty() {
            ScoringLogic::NotScored
        } else {
            ScoringLogic::Points(outcomes)
        }
    }

    pub fn is_scored(&self) -> bool {
        matches!(self, ScoringLogic::Points(_))
    }

    pub fn outcomes(&self) -> &[ScoringOutcome] {
        match self {
            ScoringLogic::NotScored => &[],
            ScoringLogic::Points(outcomes) => outcomes,
        }
    }

    /// Highest value any answer can score
    pub fn max_points(&self) -> Option<f64> {
        self.outcomes().iter().map(|o| o.points).reduce(f64::max)
    }

    /// Outcome an answer refers to, matched case-insensitively.
    ///
    /// An answer like `"No, the token is a utility token"` matches the
    /// `"No"` outcome; `"Not applicable"` does not. A bare number matches
    /// the outcome worth exactly that many points.
    pub fn match_answer(&self, answer: &str) -> Option<&ScoringOutcome> {
        let answer = answer.trim().trim_end_matches('.').to_lowercase();
        if answer.is_empty() {
            return None;
        }

        let outcomes = self.outcomes();

        if let Some(exact) = outcomes.iter().find(|o| o.label.to_lowercase() == answer) {
            return Some(exact);
        }

        if let Some(prefixed) = outcomes.iter().find(|o| {
            answer
                .strip_prefix(&o.label.to_lowercase())
                .map_or(false, |rest| !rest.starts_with(char::is_alphanumeric))
        }) {
            return Some(prefixed);
        }

        answer
            .parse::<f64>()
            .ok()
            .and_then(|n| outcomes.iter().find(|o| o.points == n))
    }

    /// Points for an answer, see [`ScoringLogic::match_answer`]
    pub fn points_for(&self, answer: &str) -> Option<f64> {
        self.match_answer(answer).map(|o| o.points)
    }

    /// Outcome labels joined for messages and prompts
    pub fn option_labels(&self) -> String {
        self.outcomes()
            .iter()
            .map(|o| o.label.as_str())
            .collect::<Vec<_>>()
            .join(" / ")
    }
}

/// A single compliance requirement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementItem {
    pub id: String,
    /// Grouping key
    pub category: String,
    pub item_name: String,
    pub description: String,
    /// Importance; zero marks a free-text item that is not scored
    pub weight: f64,
    /// The rule as written in the template
    pub scoring_logic: String,
    /// The rule as parsed at load time
    pub scoring: ScoringLogic,
}

impl RequirementItem {
    /// Create an item, parsing its scoring rule
    pub fn new(
        id: &str,
        category: &str,
        item_name: &str,
        description: &str,
        weight: f64,
        scoring_logic: &str,
    ) -> Self {
        let scoring = if weight == 0.0 {
            ScoringLogic::NotScored
        } else {
            ScoringLogic::parse(scoring_logic)
        };

        Self {
            id: id.to_string(),
            category: category.to_string(),
            item_name: item_name.to_string(),
            description: description.to_string(),
            weight,
            scoring_logic: scoring_logic.to_string(),
            scoring,
        }
    }
}

/// A named set of requirements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementTemplate {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub regime: ScoringRegime,
    /// Items in declaration order
    pub items: Vec<RequirementItem>,
}

impl RequirementTemplate {
    /// Categories in the order they are first declared
    pub fn categories(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for item in &self.items {
            if !seen.contains(&item.category.as_str()) {
                seen.push(&item.category);
            }
        }
        seen
    }

    /// Items restricted to the given categories (all items when empty)
    pub fn items_in(&self, categories: &[String]) -> Vec<&RequirementItem> {
        self.items
            .iter()
            .filter(|item| {
                categories.is_empty()
                    || categories
                        .iter()
                        .any(|c| c.eq_ignore_ascii_case(&item.category))
            })
            .collect()
    }

    pub fn item(&self, id: &str) -> Option<&RequirementItem> {
        self.items.iter().find(|item| item.id == id)
    }
}

/// Template as written in a TOML definition file
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub regime: Option<ScoringRegime>,
    #[serde(default)]
    pub items: Vec<ItemDefinition>,
}

/// Requirement as written in a TOML definition file
#[derive(Debug, Clone, Deserialize)]
pub struct ItemDefinition {
    #[serde(default)]
    pub id: Option<String>,
    pub category: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub scoring_logic: String,
}

fn default_weight() -> f64 {
    1.0
}

impl TemplateDefinition {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse template definition")
    }

    /// Build the template, inferring the regime and item ids when omitted
    pub fn into_template(self) -> Result<RequirementTemplate> {
        if self.items.is_empty() {
            anyhow::bail!("Template '{}' declares no items", self.id);
        }

        let regime = self
            .regime
            .unwrap_or_else(|| ScoringRegime::infer_from_name(&self.name));

        let mut items = Vec::with_capacity(self.items.len());
        for (i, def) in self.items.into_iter().enumerate() {
            let id = def
                .id
                .unwrap_or_else(|| format!("{}-{}", self.id, i + 1));
            if items.iter().any(|item: &RequirementItem| item.id == id) {
                anyhow::bail!("Template '{}' repeats item id '{}'", self.id, id);
            }
            items.push(RequirementItem::new(
                &id,
                &def.category,
                &def.name,
                &def.description,
                def.weight,
                &def.scoring_logic,
            ));
        }

        Ok(RequirementTemplate {
            id: self.id,
            name: self.name,
            description: self.description,
            regime,
            items,
        })
    }
}

/// Load a template from a TOML file
pub fn load_template_file(path: &Path) -> Result<RequirementTemplate> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read template file: {:?}", path))?;
    TemplateDefinition::from_toml(&content)
        .and_then(TemplateDefinition::into_template)
        .with_context(|| format!("Invalid template file: {:?}", path))
}

/// Templates compiled into the binary
pub fn builtin_templates() -> Result<Vec<RequirementTemplate>> {
    BUILTIN_TEMPLATES
        .iter()
        .map(|(file, content)| {
            TemplateDefinition::from_toml(content)
                .and_then(TemplateDefinition::into_template)
                .with_context(|| format!("Invalid built-in template {}", file))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_yes_no_logic() {
        let logic = ScoringLogic::parse("Yes = 1000, No = 0");
        assert_eq!(logic.outcomes().len(), 2);
        assert_eq!(logic.max_points(), Some(1000.0));
        assert_eq!(logic.points_for("No"), Some(0.0));
        assert_eq!(logic.points_for("yes."), Some(1000.0));
        assert_eq!(logic.points_for("No, it is a utility token"), Some(0.0));
        assert_eq!(logic.points_for("Not applicable"), None);
        assert_eq!(logic.match_answer("YES").map(|o| o.label.as_str()), Some("Yes"));
        assert_eq!(logic.match_answer("1000").map(|o| o.label.as_str()), Some("Yes"));
        assert!(logic.match_answer("750").is_none());
        assert_eq!(logic.option_labels(), "Yes / No");
    }

    #[test]
    fn test_parse_multi_word_labels() {
        let logic = ScoringLogic::parse("Fully compliant = 0; Partially compliant = 50; Not compliant = 100");
        let labels: Vec<&str> = logic.outcomes().iter().map(|o| o.label.as_str()).collect();
        assert_eq!(labels, vec!["Fully compliant", "Partially compliant", "Not compliant"]);
        assert_eq!(logic.points_for("partially compliant"), Some(50.0));
    }

    #[test]
    fn test_parse_not_scored_and_bare_numbers() {
        assert_eq!(ScoringLogic::parse("Not scored"), ScoringLogic::NotScored);
        assert_eq!(ScoringLogic::parse(""), ScoringLogic::NotScored);

        let range = ScoringLogic::parse("0 - 1000");
        assert_eq!(range.max_points(), Some(1000.0));
        assert_eq!(range.points_for("1000"), Some(1000.0));
    }

    #[test]
    fn test_zero_weight_is_not_scored() {
        let item = RequirementItem::new("x", "Cat", "Free text", "Describe", 0.0, "Yes = 10, No = 0");
        assert!(!item.scoring.is_scored());
    }

    #[test]
    fn test_regime_inference() {
        assert_eq!(
            ScoringRegime::infer_from_name("MiCA Legal Qualification"),
            ScoringRegime::RiskPoints
        );
        assert_eq!(
            ScoringRegime::infer_from_name("Whitepaper Checklist"),
            ScoringRegime::PassRate
        );
    }

    #[test]
    fn test_definition_defaults() {
        let def = TemplateDefinition::from_toml(
            r#"
id = "custom"
name = "Custom Legal Review"

[[items]]
category = "B"
name = "Second"
scoring_logic = "Yes = 5, No = 0"

[[items]]
category = "A"
name = "First"

[[items]]
category = "B"
name = "Third"
"#,
        )
        .unwrap();

        let template = def.into_template().unwrap();
        assert_eq!(template.regime, ScoringRegime::RiskPoints);
        assert_eq!(template.items[0].id, "custom-1");
        assert_eq!(template.items[1].weight, 1.0);
        assert_eq!(template.categories(), vec!["B", "A"]);
        assert_eq!(template.items_in(&["b".to_string()]).len(), 2);
        assert_eq!(template.items_in(&[]).len(), 3);
    }

    #[test]
    fn test_duplicate_item_ids_rejected() {
        let def = TemplateDefinition::from_toml(
            r#"
id = "dup"
name = "Dup"

[[items]]
id = "same"
category = "A"
name = "One"

[[items]]
id = "same"
category = "A"
name = "Two"
"#,
        )
        .unwrap();

        assert!(def.into_template().is_err());
    }

    #[test]
    fn test_builtin_templates_load() {
        let templates = builtin_templates().unwrap();
        assert_eq!(templates.len(), 2);

        let legal = templates.iter().find(|t| t.id == "mica-legal").unwrap();
        assert_eq!(legal.regime, ScoringRegime::RiskPoints);
        assert!(legal.items.iter().any(|i| !i.scoring.is_scored()));

        let whitepaper = templates.iter().find(|t| t.id == "mica-whitepaper").unwrap();
        assert_eq!(whitepaper.regime, ScoringRegime::PassRate);
        assert!(whitepaper.categories().len() > 5);
    }
}
