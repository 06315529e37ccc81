use crate::{EvaluationRequest, Neighbor};

/// Prompt templates for the evaluator
pub struct EvaluatorPrompts;

impl EvaluatorPrompts {
    /// Build the continuity-window evaluation prompt
    pub fn build_evaluation_prompt(request: &EvaluationRequest<'_>) -> String {
        format!(
            r#"You are a storyboard supervisor reviewing one frame of an ordered sequence.

## Frame {frame}
Intended outcome:
{context}

## Previous Frame
{previous}

## Next Frame
{next}

---

Score the frame from 0 to 10 against its intended outcome, then check continuity
with the previous and next frames: lighting, time of day, wardrobe, subject
identity and screen direction must carry over.

Report every problem as a fix item with:
- category: scene, composition, pose, subject_consistency, quality or continuity
- priority: critical, major, minor or cosmetic
- issue: what is wrong
- fix_instruction: one imperative sentence describing the fix
- preserve: elements that must not change while fixing
- against: "previous" or "next" (continuity items only)

Set needs_full_regeneration when the frame is too far from the intent to be
fixed by an edit.

End your response with:
<evaluation>
{{"overall_score": 7.5, "needs_full_regeneration": false, "fix_items": [{{"category": "continuity", "priority": "major", "issue": "...", "fix_instruction": "...", "preserve": ["..."], "against": "previous"}}], "strengths": ["..."]}}
</evaluation>

This is review pass {iteration}."#,
            frame = request.frame_id,
            context = truncate_context(request.context, 2000),
            previous = describe_neighbor(request.previous.as_ref()),
            next = describe_neighbor(request.next.as_ref()),
            iteration = request.iteration + 1,
        )
    }
}

fn describe_neighbor(neighbor: Option<&Neighbor<'_>>) -> String {
    match neighbor {
        Some(n) => format!(
            "{} (artifact: {})\n{}",
            n.frame_id,
            n.artifact,
            truncate_context(n.context, 1000)
        ),
        None => "None (sequence boundary)".to_string(),
    }
}

fn truncate_context(text: &str, max_len: usize) -> &str {
    if text.len() <= max_len {
        return text;
    }
    let mut end = max_len;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    match text[..end].rfind('\n') {
        Some(pos) => &text[..pos],
        None => &text[..end],
    }
}
