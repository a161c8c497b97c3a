//! Prompt templates for LLM interactions

use crate::catalog::{RequirementItem, ScoringRegime};

/// System prompt shared by every compliance assessment
pub const SYSTEM_PROMPT: &str = r#"You are a regulatory compliance analyst specialised in the EU Markets in Crypto-Assets Regulation (MiCA).

You assess whether a document satisfies a list of compliance requirements, using only the document excerpts you are given. You never invent facts that are not supported by the excerpts, and you quote evidence verbatim.
"#;

/// Prompt for assessing a batch of requirements against shared context
pub struct RequirementPrompt;

impl RequirementPrompt {
    /// Generate a prompt for the given requirements.
    ///
    /// The model must answer with one array element per requirement, in the
    /// order listed here.
    pub fn generate(
        template_name: &str,
        regime: ScoringRegime,
        items: &[&RequirementItem],
        context: &str,
    ) -> String {
        let mut prompt = String::new();

        prompt.push_str(&format!("## Template\n\n**{}** (scored by {})\n\n", template_name, regime));

        prompt.push_str("## Requirements\n\n");
        for (i, item) in items.iter().enumerate() {
            prompt.push_str(&format!("{}. **{}** [{}]\n", i + 1, item.item_name, item.category));
            if !item.description.is_empty() {
                prompt.push_str(&format!("   {}\n", item.description));
            }
            if item.scoring.is_scored() {
                prompt.push_str(&format!(
                    "   Answer options (set selected_answer): {}\n",
                    item.scoring.option_labels()
                ));
            }
        }
        prompt.push('\n');

        prompt.push_str("## Document Excerpts\n\n");
        prompt.push_str(context);
        prompt.push_str("\n\n");

        prompt.push_str(ASSESSMENT_INSTRUCTIONS);
        prompt.push_str(&format!(
            "\nThe array must contain exactly {} element(s), one per requirement, in the order listed above.\n",
            items.len()
        ));

        prompt
    }
}

const ASSESSMENT_INSTRUCTIONS: &str = r#"## Instructions

Assess every requirement and respond with a JSON array. Each element has exactly these fields:

```json
[
  {
    "status": "FOUND",
    "coverage_score": 100,
    "reasoning": "Why the requirement is or is not met",
    "evidence_snippets": ["Verbatim quote from the excerpts"],
    "selected_answer": null
  },
  {
    "status": "FOUND",
    "coverage_score": null,
    "reasoning": "Why this option was chosen",
    "evidence_snippets": ["Verbatim quote from the excerpts"],
    "selected_answer": "No"
  }
]
```

Guidelines:
- status is one of FOUND, NEEDS_CLARIFICATION, MISSING, NOT_APPLICABLE
- When a requirement lists answer options, set selected_answer to exactly one of them and set coverage_score to null; the option decides the score
- For requirements without answer options, coverage_score is 0 to 100 describing how completely the requirement is covered, and selected_answer is null
- evidence_snippets must be copied verbatim from the excerpts; use an empty array when nothing applies
- Use NEEDS_CLARIFICATION when the excerpts are ambiguous or incomplete

Respond ONLY with the JSON array, no additional text.
"#;
