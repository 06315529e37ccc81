//! Prompt mutation: turns the latest evaluation of a frame into the prompt
//! and references for its next generation call.
//!
//! Everything here is pure and deterministic.

use std::collections::BTreeSet;

use frameloops_evaluator::{Evaluation, FixCategory, FixItem};
use frameloops_generator::{ArtifactHandle, GenerationMode};

use crate::{FrameSpec, ModePreference, RefinementConfig};

const FIXES_HEADER: &str = "CRITICAL FIXES TO APPLY:";
const PRESERVE_HEADER: &str = "PRESERVE EXACTLY:";
const AVOID_HEADER: &str = "AVOID:";

/// Rewrites an evaluator issue into a negative instruction.
///
/// A rule fires when the fix item's category is listed (or the list is
/// empty) and the issue text contains any trigger as a whole word or
/// phrase (or there are no triggers). Inflections are listed explicitly.
struct NegativeRule {
    categories: &'static [FixCategory],
    triggers: &'static [&'static str],
    negative: &'static str,
}

impl NegativeRule {
    fn matches(&self, item: &FixItem, issue_lower: &str) -> bool {
        let category_ok = self.categories.is_empty() || self.categories.contains(&item.category);
        let trigger_ok =
            self.triggers.is_empty() || self.triggers.iter().any(|t| has_whole_word(issue_lower, t));
        category_ok && trigger_ok
    }
}

/// "night" does not match "knight" and "text" does not match "texture"
fn has_whole_word(text: &str, needle: &str) -> bool {
    let is_boundary = |c: Option<char>| c.map_or(true, |c| !c.is_alphanumeric());
    text.match_indices(needle).any(|(at, _)| {
        is_boundary(text[..at].chars().next_back())
            && is_boundary(text[at + needle.len()..].chars().next())
    })
}

const NEGATIVE_RULES: &[NegativeRule] = &[
    NegativeRule {
        categories: &[],
        triggers: &["multiple", "extra", "extras", "duplicate", "duplicated"],
        negative: "do not show multiple people or extra figures",
    },
    NegativeRule {
        categories: &[],
        triggers: &["modern", "sweater", "sweaters"],
        negative: "do not use modern clothing such as sweaters; keep the wardrobe period-accurate",
    },
    NegativeRule {
        categories: &[],
        triggers: &["seated", "sitting", "sits"],
        negative: "do not show the subject seated or sitting",
    },
    NegativeRule {
        categories: &[],
        triggers: &["night", "nighttime", "night-time", "dark", "darker", "darkness"],
        negative: "do not use night-time or dark lighting",
    },
    NegativeRule {
        categories: &[],
        triggers: &[
            "text",
            "lettering",
            "watermark",
            "watermarks",
            "caption",
            "captions",
        ],
        negative: "do not include text, captions or watermarks",
    },
    NegativeRule {
        categories: &[],
        triggers: &["blurry", "blur", "blurred", "out of focus"],
        negative: "do not render blurry or out-of-focus areas",
    },
    NegativeRule {
        categories: &[],
        triggers: &["cropped", "crop", "cut off"],
        negative: "do not crop or cut off the subject",
    },
    NegativeRule {
        categories: &[FixCategory::Continuity],
        triggers: &[],
        negative: "do not change lighting, wardrobe or subject identity between adjacent frames",
    },
];

/// Negative instructions for the issues in an evaluation, deduplicated and
/// capped. Issues are read most urgent first.
pub fn negative_instructions(evaluation: &Evaluation, max_items: usize) -> Vec<&'static str> {
    let mut negatives: Vec<&'static str> = Vec::new();
    for item in evaluation.fixes_by_priority() {
        let issue_lower = item.issue.to_lowercase();
        for rule in NEGATIVE_RULES {
            if rule.matches(item, &issue_lower) && !negatives.contains(&rule.negative) {
                negatives.push(rule.negative);
            }
        }
    }
    negatives.truncate(max_items);
    negatives
}

/// Base prompt plus the most urgent fixes, the preserve clause and the
/// negative section.
pub fn build_refinement_prompt(
    base_prompt: &str,
    last_evaluation: &Evaluation,
    max_positive_fixes: usize,
    max_negative_items: usize,
) -> String {
    let selected: Vec<&FixItem> = last_evaluation
        .fixes_by_priority()
        .into_iter()
        .take(max_positive_fixes)
        .collect();

    let mut prompt = base_prompt.trim_end().to_string();

    let instructions: Vec<&str> = selected
        .iter()
        .map(|item| item.fix_instruction.trim())
        .filter(|instruction| !instruction.is_empty())
        .collect();
    if !instructions.is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(FIXES_HEADER);
        for instruction in instructions {
            prompt.push_str("\n- ");
            prompt.push_str(instruction);
        }
    }

    let preserve: BTreeSet<&str> = selected
        .iter()
        .flat_map(|item| item.preserve.iter().map(String::as_str))
        .collect();
    if !preserve.is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(PRESERVE_HEADER);
        prompt.push(' ');
        prompt.push_str(&preserve.into_iter().collect::<Vec<_>>().join(", "));
    }

    push_avoid_section(
        &mut prompt,
        &negative_instructions(last_evaluation, max_negative_items),
    );
    prompt
}

/// Base prompt plus the negative section only; used for full regeneration.
pub fn build_regeneration_prompt(
    base_prompt: &str,
    last_evaluation: &Evaluation,
    max_negative_items: usize,
) -> String {
    let mut prompt = base_prompt.trim_end().to_string();
    push_avoid_section(
        &mut prompt,
        &negative_instructions(last_evaluation, max_negative_items),
    );
    prompt
}

fn push_avoid_section(prompt: &mut String, negatives: &[&str]) {
    if negatives.is_empty() {
        return;
    }
    prompt.push_str("\n\n");
    prompt.push_str(AVOID_HEADER);
    for negative in negatives {
        prompt.push_str("\n- ");
        prompt.push_str(negative);
    }
}

/// The next generation call for a frame
#[derive(Debug, Clone, PartialEq)]
pub struct RefinementPlan {
    pub mode: GenerationMode,
    pub prompt: String,
    pub references: Vec<ArtifactHandle>,
}

impl RefinementPlan {
    /// First generation: base prompt, original references
    pub fn initial(spec: &FrameSpec) -> Self {
        Self {
            mode: GenerationMode::Create,
            prompt: spec.prompt.clone(),
            references: spec.reference_assets.clone(),
        }
    }

    /// Apply the regenerate-vs-edit policy to the latest evaluation
    pub fn refine(
        spec: &FrameSpec,
        current_artifact: &ArtifactHandle,
        last_evaluation: &Evaluation,
        config: &RefinementConfig,
    ) -> Self {
        let regenerate = match config.mode_preference {
            ModePreference::Create => true,
            ModePreference::Edit => false,
            ModePreference::Adaptive => {
                last_evaluation.needs_full_regeneration
                    || last_evaluation.overall_score < config.regeneration_threshold
            }
        };

        if regenerate {
            return Self {
                mode: GenerationMode::Create,
                prompt: build_regeneration_prompt(
                    &spec.prompt,
                    last_evaluation,
                    config.max_negative_items,
                ),
                references: spec.reference_assets.clone(),
            };
        }

        let mut references = spec.reference_assets.clone();
        references.push(current_artifact.clone());
        Self {
            mode: GenerationMode::Edit,
            prompt: build_refinement_prompt(
                &spec.prompt,
                last_evaluation,
                config.max_positive_fixes,
                config.max_negative_items,
            ),
            references,
        }
    }
}
