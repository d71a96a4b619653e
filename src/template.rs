//! Instruction compiler: fills the task template's slots with the idea and the
//! optional resume and feedback notes.
//!
//! Slots are plain markers, not template syntax, so an instruction template
//! without a slot is passed through untouched. The notes themselves are
//! rendered with minijinja from embedded templates.

use minijinja::{Environment, context};

use crate::resume::ResumeSource;

pub const IDEA_SLOT: &str = "{{IDEA}}";
pub const RESUME_SLOT: &str = "{{RESUME_NOTE}}";
pub const FEEDBACK_SLOT: &str = "{{FEEDBACK}}";

const RESUME_NOTE_TEMPLATE: &str = include_str!("templates/resume-note.md.jinja");
const FEEDBACK_NOTE_TEMPLATE: &str = include_str!("templates/feedback-note.md.jinja");

fn environment() -> anyhow::Result<Environment<'static>> {
    let mut env = Environment::new();
    env.add_template("resume-note", RESUME_NOTE_TEMPLATE)?;
    env.add_template("feedback-note", FEEDBACK_NOTE_TEMPLATE)?;
    Ok(env)
}

/// Render the resume note listing what the previous bundle holds.
pub fn render_resume_note(source: &ResumeSource) -> anyhow::Result<String> {
    let env = environment()?;
    let rendered = env
        .get_template("resume-note")?
        .render(context! { items => source.present_items() })?;
    Ok(rendered)
}

pub fn render_feedback_note(feedback: &str) -> anyhow::Result<String> {
    let env = environment()?;
    let rendered = env
        .get_template("feedback-note")?
        .render(context! { feedback => feedback.trim() })?;
    Ok(rendered)
}

/// Compile the instruction document.
pub fn compile_instruction(
    template: &str,
    idea_content: &str,
    resume: Option<&ResumeSource>,
    feedback: Option<&str>,
) -> anyhow::Result<String> {
    let resume_note = resume.map(render_resume_note).transpose()?.unwrap_or_default();
    let feedback_note = feedback
        .filter(|f| !f.trim().is_empty())
        .map(render_feedback_note)
        .transpose()?
        .unwrap_or_default();

    Ok(fill_slots(
        template,
        &[
            (IDEA_SLOT, idea_content),
            (RESUME_SLOT, &resume_note),
            (FEEDBACK_SLOT, &feedback_note),
        ],
    ))
}

/// Replace the first occurrence of each slot in a single pass over the
/// original text, so substituted values are never scanned for slots.
pub fn fill_slots(template: &str, slots: &[(&str, &str)]) -> String {
    let mut hits: Vec<(usize, &str, &str)> = slots
        .iter()
        .filter_map(|(slot, value)| template.find(slot).map(|pos| (pos, *slot, *value)))
        .collect();
    hits.sort_by_key(|(pos, _, _)| *pos);

    let mut out = String::with_capacity(template.len() + hits.iter().map(|h| h.2.len()).sum::<usize>());
    let mut cursor = 0;
    for (pos, slot, value) in hits {
        out.push_str(&template[cursor..pos]);
        out.push_str(value);
        cursor = pos + slot.len();
    }
    out.push_str(&template[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::testutil::write_complete_sink;

    const TEMPLATE: &str = "# Task\n\n{{IDEA}}\n\n{{RESUME_NOTE}}\n{{FEEDBACK}}\nGo.\n";

    #[test]
    fn fresh_job_fills_only_idea() {
        let out = compile_instruction(TEMPLATE, "{\"Name\": \"x\"}", None, None).unwrap();
        assert_eq!(out, "# Task\n\n{\"Name\": \"x\"}\n\n\n\nGo.\n");
    }

    #[test]
    fn each_slot_replaced_once() {
        let out = fill_slots("{{IDEA}} and {{IDEA}}", &[(IDEA_SLOT, "A")]);
        assert_eq!(out, "A and {{IDEA}}");
    }

    #[test]
    fn values_are_not_rescanned() {
        let out = fill_slots(
            "{{IDEA}}|{{FEEDBACK}}",
            &[(IDEA_SLOT, "{{FEEDBACK}}"), (FEEDBACK_SLOT, "fb")],
        );
        assert_eq!(out, "{{FEEDBACK}}|fb");
    }

    #[test]
    fn absent_slots_are_noops() {
        let out = compile_instruction("static text", "idea", None, Some("fix it")).unwrap();
        assert_eq!(out, "static text");
    }

    #[test]
    fn resume_note_lists_present_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        write_complete_sink(&dir.path().join("agent/artifacts"));
        let src = crate::resume::resolve(dir.path()).unwrap();

        let out = compile_instruction(TEMPLATE, "idea", Some(&src), Some("tighten the ablations")).unwrap();
        assert!(out.contains("/app/previous_artifacts/"));
        assert!(out.contains("`experiment_codebase/` (2 files)"));
        assert!(out.contains("`figures/` (1 file)"));
        assert!(out.contains("`paper.pdf`"));
        assert!(!out.contains("literature"));
        assert!(out.contains("tighten the ablations"));
        assert!(!out.contains(RESUME_SLOT));
    }
}
