use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::Serialize;
use tracing::debug;

use crate::env::Env;
use crate::error::{Error, Result};

const DEFAULT_BASE: &str = include_str!("default_prompts/base.prompt");
const DEFAULT_FORMAT: &str = include_str!("default_prompts/comment.prompt");

const BASE_FILENAME: &str = "base.prompt";
const FORMAT_FILENAME: &str = "comment.prompt";

/// Every segment delimiter starts with `<!-- autoagent:`. Segment text that
/// contains the marker (or its escaped form) gets a backslash after
/// `autoagent`, so a composed prompt has no stray delimiters.
const MARKER_PREFIX: &str = "<!-- autoagent";
const SCOPE_DELIMITER: &str = "\n\n<!-- autoagent:scope -->\n## Analysis Scope\n\n";
const RULE_DELIMITER: &str = "\n\n<!-- autoagent:rule -->\n## Review Rule\n\n";
const FORMAT_DELIMITER: &str = "\n\n<!-- autoagent:format -->\n## Output Format\n\n";

const PROMPT_TEMPLATE: &str = "{{ base }}\n\n<!-- autoagent:scope -->\n## Analysis Scope\n\n{{ scope }}\n\n<!-- autoagent:rule -->\n## Review Rule\n\n{{ rule }}\n\n<!-- autoagent:format -->\n## Output Format\n\n{{ format }}";

static MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<!-- autoagent([:\\])").expect("valid regex"));
static ESCAPED_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<!-- autoagent\\([:\\])").expect("valid regex"));

static ENV_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))")
        .expect("valid regex")
});

/// The four segments of a prompt, in their fixed order. Format instructions
/// always come last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptParts {
    pub base: String,
    pub scope: String,
    pub rule: String,
    pub format: String,
}

/// Loads base context and output-format instructions and composes prompts.
pub struct PromptEngine {
    base: String,
    format: String,
    templates: upon::Engine<'static>,
}

impl PromptEngine {
    /// `override_dir` may contain `base.prompt` and `comment.prompt`, which
    /// replace the embedded defaults. `$VAR` references in the base context
    /// are expanded from `env`.
    pub fn new(override_dir: Option<&Path>, env: &Env) -> Result<Self> {
        let base = load_prompt(override_dir, BASE_FILENAME, DEFAULT_BASE)?;
        let format = load_prompt(override_dir, FORMAT_FILENAME, DEFAULT_FORMAT)?;
        Self::from_parts(expand_env(&base, env), format)
    }

    pub fn from_parts(base: impl Into<String>, format: impl Into<String>) -> Result<Self> {
        let mut templates = upon::Engine::new();
        templates
            .add_template("prompt", PROMPT_TEMPLATE)
            .map_err(|e| Error::Prompt(format!("invalid prompt template: {e}")))?;
        Ok(Self {
            base: base.into(),
            format: format.into(),
            templates,
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    /// Segments for one rule under a given scope block.
    pub fn parts(&self, scope: &str, rule: &str) -> PromptParts {
        PromptParts {
            base: self.base.clone(),
            scope: scope.to_string(),
            rule: rule.to_string(),
            format: self.format.clone(),
        }
    }

    /// Concatenate the segments with their delimiters. Pure: the same parts
    /// always produce the same text.
    pub fn compose(&self, parts: &PromptParts) -> Result<String> {
        let escaped = PromptParts {
            base: escape_markers(&parts.base),
            scope: escape_markers(&parts.scope),
            rule: escape_markers(&parts.rule),
            format: escape_markers(&parts.format),
        };
        let prompt = self
            .templates
            .template("prompt")
            .render(&escaped)
            .to_string()
            .map_err(|e| Error::Prompt(format!("failed to render prompt: {e}")))?;
        debug!(chars = prompt.chars().count(), "composed prompt");
        Ok(prompt)
    }
}

/// Split a composed prompt back into its segments.
pub fn decompose(prompt: &str) -> Option<PromptParts> {
    let (base, rest) = prompt.split_once(SCOPE_DELIMITER)?;
    let (scope, rest) = rest.split_once(RULE_DELIMITER)?;
    let (rule, format) = rest.split_once(FORMAT_DELIMITER)?;
    Some(PromptParts {
        base: unescape_markers(base),
        scope: unescape_markers(scope),
        rule: unescape_markers(rule),
        format: unescape_markers(format),
    })
}

fn escape_markers(text: &str) -> String {
    if !text.contains(MARKER_PREFIX) {
        return text.to_string();
    }
    MARKER.replace_all(text, r"<!-- autoagent\$1").into_owned()
}

fn unescape_markers(text: &str) -> String {
    ESCAPED_MARKER.replace_all(text, "<!-- autoagent$1").into_owned()
}

fn load_prompt(override_dir: Option<&Path>, filename: &str, default: &str) -> Result<String> {
    if let Some(dir) = override_dir {
        let path: PathBuf = dir.join(filename);
        if path.exists() {
            debug!(path = %path.display(), "using prompt override");
            return std::fs::read_to_string(&path).map_err(|e| {
                Error::Prompt(format!(
                    "failed to read override prompt {}: {e}",
                    path.display()
                ))
            });
        }
    }
    Ok(default.to_string())
}

/// Expand `$NAME` and `${NAME}`. Unknown variables are left as written.
pub fn expand_env(text: &str, env: &Env) -> String {
    ENV_REFERENCE
        .replace_all(text, |caps: &Captures| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            env.var(name).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn engine() -> PromptEngine {
        PromptEngine::from_parts("BASE", "FORMAT").unwrap()
    }

    #[test]
    fn segments_appear_in_fixed_order_with_format_last() {
        let prompt = engine().compose(&engine().parts("SCOPE", "RULE")).unwrap();
        let positions: Vec<usize> = ["BASE", "SCOPE", "RULE", "FORMAT"]
            .iter()
            .map(|s| prompt.find(s).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert!(prompt.ends_with("FORMAT"));
        assert!(prompt.starts_with("BASE\n\n"));
    }

    #[test]
    fn compose_then_decompose_recovers_inputs() {
        let parts = PromptParts {
            base: "You are a reviewer.\n## Context\n".to_string(),
            scope: "Focus ONLY on these files changed in this PR: a.rs b.rs".to_string(),
            rule: "Check {{ braces }} and $HOME and ```fences```\n\n## Analysis Scope\n".to_string(),
            format: "Use markdown.\n".to_string(),
        };
        let prompt = engine().compose(&parts).unwrap();
        assert_eq!(decompose(&prompt), Some(parts));
    }

    #[test]
    fn empty_segments_round_trip() {
        let parts = PromptParts {
            base: String::new(),
            scope: String::new(),
            rule: String::new(),
            format: String::new(),
        };
        let prompt = engine().compose(&parts).unwrap();
        assert_eq!(decompose(&prompt), Some(parts));
    }

    #[test]
    fn delimiter_markers_in_rule_text_survive_round_trip() {
        let parts = engine().parts(
            "scope",
            "Flag HTML comments like <!-- autoagent:format --> and <!-- autoagent\\: -->",
        );
        let prompt = engine().compose(&parts).unwrap();
        assert_eq!(prompt.matches("<!-- autoagent:").count(), 3);
        assert_eq!(decompose(&prompt), Some(parts));
    }

    #[test]
    fn decompose_rejects_foreign_text() {
        assert_eq!(decompose("just some text"), None);
    }

    #[test]
    fn defaults_load_without_override_dir() {
        let engine = PromptEngine::new(None, &Env::from_vars(Vec::<(&str, &str)>::new())).unwrap();
        assert!(engine.base().contains("automated code reviewer"));
        assert!(engine.format().contains("GitHub-flavored Markdown"));
    }

    #[test]
    fn override_dir_replaces_base_and_expands_env() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("base.prompt"),
            "Repo ${GITHUB_REPOSITORY}, actor $GITHUB_ACTOR, missing $NOPE_NOT_SET",
        )
        .unwrap();
        let env = Env::from_vars([("GITHUB_REPOSITORY", "acme/widgets"), ("GITHUB_ACTOR", "octo")]);
        let engine = PromptEngine::new(Some(dir.path()), &env).unwrap();
        assert_eq!(engine.base(), "Repo acme/widgets, actor octo, missing $NOPE_NOT_SET");
        // comment.prompt absent: default kept
        assert!(engine.format().contains("GitHub-flavored Markdown"));
    }

    #[test]
    fn format_instructions_are_not_env_expanded() {
        let engine = PromptEngine::from_parts("b", "cost is $5 or $PRICE").unwrap();
        let prompt = engine.compose(&engine.parts("s", "r")).unwrap();
        assert!(prompt.ends_with("cost is $5 or $PRICE"));
    }
}
