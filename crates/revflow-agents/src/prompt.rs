use revflow_core::agent::AgentContext;
use serde_json::Value;

/// Assembles the prompt handed to the AI provider: PR context, diff
/// summary, whatever upstream artifacts already exist for this workflow,
/// the stage-specific instruction, and any extra caller-supplied context —
/// assembled as an ordered string concatenation rather than a template,
/// since the variable set of artifacts a pipeline stage may have
/// accumulated doesn't fit a single fixed task/phase layout.
pub fn build_prompt(ctx: &AgentContext, instruction: &str, extra: &Value) -> String {
    let mut s = String::new();

    s.push_str("## Pull Request\n\n");
    s.push_str(&format!("Title: {}\n\n{}\n\n---\n\n", ctx.pr.title, ctx.pr.body));

    s.push_str("## Diff Summary\n\n");
    s.push_str(&format!(
        "{} files changed, +{} -{}\n",
        ctx.diff.files.len(),
        ctx.diff.total_additions,
        ctx.diff.total_deletions
    ));
    for file in &ctx.diff.files {
        s.push_str(&format!(
            "- {} ({}, +{} -{})\n",
            file.filename, file.status, file.additions, file.deletions
        ));
    }
    s.push_str("\n---\n\n");

    if let Some(analysis) = &ctx.analysis {
        s.push_str("## Prior Analysis\n\n");
        s.push_str(&format!(
            "classification: {:?}, risk: {:?}\n",
            analysis.classification, analysis.risk
        ));
        if !analysis.risk_factors.is_empty() {
            s.push_str(&format!("risk factors: {}\n", analysis.risk_factors.join(", ")));
        }
        s.push_str("\n---\n\n");
    }

    if let Some(review) = &ctx.review {
        s.push_str(&format!("## Existing Review Comments ({})\n\n", review.comments.len()));
        for c in &review.comments {
            s.push_str(&format!(
                "- {}:{} [{:?}/{:?}] {}\n",
                c.file, c.line, c.severity, c.category, c.message
            ));
        }
        s.push_str("\n---\n\n");
    }

    s.push_str(instruction);

    if !extra.is_null() {
        s.push_str("\n\n---\n\nAdditional context:\n");
        s.push_str(&extra.to_string());
    }

    s
}
