use super::backend::PROMPT_SEPARATOR;
use std::path::Path;

/// Workspace files concatenated into the system prompt, in order.
pub const WORKSPACE_FILES: &[&str] = &["AGENTS.md", "GM_NARRATIVE.md", "GM_INSTRUCTIONS.md"];

/// Assemble the system prompt from the agent workspace and the memory note.
///
/// Each present file becomes a `# <filename>` section; missing files are
/// skipped. Returns an empty string when nothing is found.
pub async fn load_system_prompt(workspace: &Path, memory_note: &Path) -> String {
    let mut parts = Vec::new();
    for name in WORKSPACE_FILES {
        if let Ok(content) = tokio::fs::read_to_string(workspace.join(name)).await {
            parts.push(format!("# {name}\n\n{content}"));
        }
    }
    if let Ok(content) = tokio::fs::read_to_string(memory_note).await {
        parts.push(format!("# Current Playthrough Memory\n\n{content}"));
    }
    tracing::debug!(sections = parts.len(), "loaded system prompt");
    parts.join(PROMPT_SEPARATOR)
}
