//! Rule resolution: predefined rule names, custom prompt files, and the inline
//! custom prompt become an ordered list of labelled prompt bodies.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Inline custom prompts longer than this (in characters) are rejected.
pub const MAX_INLINE_PROMPT_CHARS: usize = 5000;
/// Custom prompt files larger than this (in bytes) are rejected.
pub const MAX_CUSTOM_FILE_BYTES: u64 = 1024 * 1024;
/// Label used for the inline custom prompt.
pub const INLINE_LABEL: &str = "custom";

/// Extensions stripped when deriving a label from a custom file name.
const RECOGNIZED_EXTENSIONS: &[&str] = &["prompt", "md", "markdown", "txt"];

/// Prompt files in a rules directory that are not rules themselves.
pub(crate) const RESERVED_PROMPTS: &[&str] = &["base", "comment"];

const BUILTIN_RULES: &[(&str, &str)] = &[
    ("code-review", include_str!("default_prompts/code-review.prompt")),
    (
        "documentation-check",
        include_str!("default_prompts/documentation-check.prompt"),
    ),
    ("owasp-check", include_str!("default_prompts/owasp-check.prompt")),
    (
        "performance-check",
        include_str!("default_prompts/performance-check.prompt"),
    ),
    ("test-coverage", include_str!("default_prompts/test-coverage.prompt")),
];

/// A reference to prompt content, before resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleSpec {
    Predefined(String),
    CustomFile(String),
    Inline(String),
}

/// What the caller asked to run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleRequest {
    pub rules: Vec<String>,
    pub custom_files: Vec<String>,
    pub custom: Option<String>,
}

impl RuleRequest {
    /// Specs in execution order: predefined, custom files, inline prompt last.
    pub fn specs(&self) -> Vec<RuleSpec> {
        let predefined = self
            .rules
            .iter()
            .map(|r| r.trim())
            .filter(|r| !r.is_empty())
            .map(|r| RuleSpec::Predefined(r.to_string()));
        let files = self
            .custom_files
            .iter()
            .map(|f| f.trim())
            .filter(|f| !f.is_empty())
            .map(|f| RuleSpec::CustomFile(f.to_string()));
        let inline = self
            .custom
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .map(|c| RuleSpec::Inline(c.to_string()));
        predefined.chain(files).chain(inline).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOrigin {
    Predefined,
    CustomFile(PathBuf),
    Inline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRule {
    pub label: String,
    pub body: String,
    pub origin: RuleOrigin,
}

/// Named rule bodies: the embedded defaults, optionally extended or overridden
/// by `<name>.prompt` files from a repository rules directory.
#[derive(Debug, Clone)]
pub struct RuleRegistry {
    rules: BTreeMap<String, String>,
}

impl RuleRegistry {
    pub fn builtin() -> Self {
        Self {
            rules: BUILTIN_RULES
                .iter()
                .map(|(name, body)| (name.to_string(), body.to_string()))
                .collect(),
        }
    }

    /// Built-in rules overlaid with every `*.prompt` file in `dir`.
    pub fn with_overrides(dir: &Path) -> Result<Self> {
        let mut registry = Self::builtin();
        let entries = std::fs::read_dir(dir).map_err(|e| {
            Error::ConfigValidation(format!("cannot read rules dir {}: {e}", dir.display()))
        })?;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("prompt") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if RESERVED_PROMPTS.contains(&name) {
                continue;
            }
            let body = std::fs::read_to_string(&path).map_err(|e| {
                Error::Prompt(format!("failed to read rule {}: {e}", path.display()))
            })?;
            debug!(rule = name, path = %path.display(), "loaded repository rule");
            registry.insert(name, body);
        }
        Ok(registry)
    }

    pub fn insert(&mut self, name: impl Into<String>, body: impl Into<String>) {
        self.rules.insert(name.into(), body.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.rules.get(name).map(String::as_str)
    }

    /// Rule names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.rules.keys().map(String::as_str).collect()
    }
}

pub struct RuleResolver<'a> {
    registry: &'a RuleRegistry,
    workspace: PathBuf,
}

impl<'a> RuleResolver<'a> {
    /// `workspace` anchors relative custom file paths.
    pub fn new(registry: &'a RuleRegistry, workspace: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            workspace: workspace.into(),
        }
    }

    /// Validate the request and resolve every spec, failing on the first
    /// problem. Labels are made unique by suffixing `-2`, `-3`, ...
    pub fn resolve(&self, request: &RuleRequest) -> Result<Vec<ResolvedRule>> {
        if let Some(custom) = request.custom.as_deref() {
            let length = custom.chars().count();
            if length > MAX_INLINE_PROMPT_CHARS {
                return Err(Error::PromptTooLong {
                    length,
                    limit: MAX_INLINE_PROMPT_CHARS,
                });
            }
        }

        let specs = request.specs();
        if specs.is_empty() {
            return Err(Error::NoWorkSpecified);
        }

        let mut resolved = specs
            .iter()
            .map(|spec| self.resolve_spec(spec))
            .collect::<Result<Vec<_>>>()?;
        make_labels_unique(&mut resolved);

        info!(
            count = resolved.len(),
            labels = ?resolved.iter().map(|r| r.label.as_str()).collect::<Vec<_>>(),
            "resolved rules"
        );
        Ok(resolved)
    }

    fn resolve_spec(&self, spec: &RuleSpec) -> Result<ResolvedRule> {
        match spec {
            RuleSpec::Predefined(name) => {
                let body = self
                    .registry
                    .get(name)
                    .filter(|b| !b.trim().is_empty())
                    .ok_or_else(|| Error::RuleNotFound {
                        name: name.clone(),
                        available: self.registry.names().join(", "),
                    })?;
                Ok(ResolvedRule {
                    label: name.clone(),
                    body: body.to_string(),
                    origin: RuleOrigin::Predefined,
                })
            }
            RuleSpec::CustomFile(reference) => self.load_custom_file(reference),
            RuleSpec::Inline(text) => Ok(ResolvedRule {
                label: INLINE_LABEL.to_string(),
                body: text.clone(),
                origin: RuleOrigin::Inline,
            }),
        }
    }

    fn load_custom_file(&self, reference: &str) -> Result<ResolvedRule> {
        let invalid = |reason: String| Error::InvalidCustomFile {
            path: reference.to_string(),
            reason,
        };

        let path = self.resolve_path(reference);
        let metadata = std::fs::metadata(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => invalid(format!("not found at {}", path.display())),
            _ => invalid(format!("cannot stat {}: {e}", path.display())),
        })?;
        if !metadata.is_file() {
            return Err(invalid("not a regular file".to_string()));
        }
        if metadata.len() > MAX_CUSTOM_FILE_BYTES {
            return Err(invalid(format!(
                "file too large ({} bytes, limit {MAX_CUSTOM_FILE_BYTES})",
                metadata.len()
            )));
        }
        let body =
            std::fs::read_to_string(&path).map_err(|e| invalid(format!("not readable: {e}")))?;
        if body.trim().is_empty() {
            return Err(invalid("file is empty".to_string()));
        }

        debug!(path = %path.display(), bytes = body.len(), "loaded custom rule file");
        Ok(ResolvedRule {
            label: derive_label(reference),
            body,
            origin: RuleOrigin::CustomFile(path),
        })
    }

    fn resolve_path(&self, reference: &str) -> PathBuf {
        let path = Path::new(reference);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace.join(path)
        }
    }
}

/// File name without directories and without a recognized extension.
pub fn derive_label(reference: &str) -> String {
    let path = Path::new(reference);
    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
        return reference.to_string();
    };
    let recognized = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            RECOGNIZED_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        });
    match path.file_stem().and_then(|s| s.to_str()) {
        Some(stem) if recognized && !stem.is_empty() => stem.to_string(),
        _ => file_name.to_string(),
    }
}

fn make_labels_unique(rules: &mut [ResolvedRule]) {
    let mut taken = HashSet::new();
    for rule in rules.iter_mut() {
        if taken.insert(rule.label.clone()) {
            continue;
        }
        let original = rule.label.clone();
        let mut n = 2;
        let renamed = loop {
            let candidate = format!("{original}-{n}");
            if taken.insert(candidate.clone()) {
                break candidate;
            }
            n += 1;
        };
        warn!(label = %original, renamed = %renamed, "duplicate rule label");
        rule.label = renamed;
    }
}
