//! Agent integrations as a small capability set.
//!
//! Each supported agent knows how to locate its session transcript file,
//! format a resume command, and name the settings paths worth watching.
//! Tagged variants, not a trait hierarchy; the set is closed and tiny.

use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use entire_core::paths::{claude_project_dir, model_session_id, sanitize_path_for_claude};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
    ClaudeCode,
    GeminiCli,
}

impl Default for AgentKind {
    fn default() -> Self {
        AgentKind::ClaudeCode
    }
}

impl AgentKind {
    /// Human-readable name, used in condensed metadata.
    pub fn name(self) -> &'static str {
        match self {
            AgentKind::ClaudeCode => "Claude Code",
            AgentKind::GeminiCli => "Gemini CLI",
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            AgentKind::ClaudeCode => "claude-code",
            AgentKind::GeminiCli => "gemini",
        }
    }

    /// Lenient parse; unknown values map to the default agent.
    pub fn from_slug(s: &str) -> Self {
        match s {
            "gemini" | "gemini-cli" => AgentKind::GeminiCli,
            _ => AgentKind::ClaudeCode,
        }
    }

    /// Parse the human-readable name used in condensed metadata.
    pub fn from_name(s: &str) -> Self {
        match s {
            "Gemini CLI" => AgentKind::GeminiCli,
            _ => AgentKind::ClaudeCode,
        }
    }

    /// Command line the user can run to resume this session in the agent.
    pub fn format_resume_command(self, session_id: &str) -> String {
        let model_id = model_session_id(session_id);
        match self {
            AgentKind::ClaudeCode => format!("claude --resume {model_id}"),
            AgentKind::GeminiCli => format!("gemini --resume {model_id}"),
        }
    }

    /// Where the agent keeps this session's transcript for a repository
    /// rooted at `repo_path`. Used by logs-only rewind to write a
    /// restored transcript back.
    pub fn session_file(self, repo_path: &str, session_id: &str) -> Option<PathBuf> {
        let model_id = model_session_id(session_id);
        match self {
            AgentKind::ClaudeCode => {
                Some(claude_project_dir(repo_path)?.join(format!("{model_id}.jsonl")))
            }
            AgentKind::GeminiCli => {
                let home = dirs_home()?;
                Some(
                    home.join(".gemini")
                        .join("projects")
                        .join(sanitize_path_for_claude(repo_path))
                        .join(format!("{model_id}.json")),
                )
            }
        }
    }

    /// Agent settings paths whose changes matter to hook installation.
    pub fn watch_paths(self) -> &'static [&'static str] {
        match self {
            AgentKind::ClaudeCode => &[".claude/settings.json", ".claude/settings.local.json"],
            AgentKind::GeminiCli => &[".gemini/settings.json"],
        }
    }
}

fn dirs_home() -> Option<PathBuf> {
    dirs::home_dir()
}

impl Serialize for AgentKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.slug())
    }
}

impl<'de> Deserialize<'de> for AgentKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(AgentKind::from_slug(&s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_roundtrip() {
        assert_eq!(AgentKind::from_slug("claude-code"), AgentKind::ClaudeCode);
        assert_eq!(AgentKind::from_slug("gemini"), AgentKind::GeminiCli);
        assert_eq!(AgentKind::from_slug("unknown"), AgentKind::ClaudeCode);
    }

    #[test]
    fn resume_command_uses_model_session_id() {
        let cmd = AgentKind::ClaudeCode.format_resume_command("2026-08-01-9f1c-aaaa");
        assert_eq!(cmd, "claude --resume 9f1c-aaaa");
    }

    #[test]
    fn claude_session_file_honors_test_override() {
        std::env::set_var("ENTIRE_TEST_CLAUDE_PROJECT_DIR", "/tmp/claude-proj");
        let path = AgentKind::ClaudeCode
            .session_file("/repo", "2026-08-01-9f1c-aaaa")
            .unwrap();
        assert_eq!(path, PathBuf::from("/tmp/claude-proj/9f1c-aaaa.jsonl"));
        std::env::remove_var("ENTIRE_TEST_CLAUDE_PROJECT_DIR");
    }

    #[test]
    fn serde_as_slug() {
        let json = serde_json::to_string(&AgentKind::GeminiCli).unwrap();
        assert_eq!(json, "\"gemini\"");
        let back: AgentKind = serde_json::from_str("\"claude-code\"").unwrap();
        assert_eq!(back, AgentKind::ClaudeCode);
    }
}
