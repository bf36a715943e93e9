//! Permission rule grammar and matching.
//!
//! A rule is either a bare tool name (`Read`) or a tool name with an
//! argument glob (`Bash(git *)`, `WebFetch(domain:api.example.com)`). The
//! glob is matched against the tool's primary parameter. Shell commands get
//! extra treatment: the command string decomposes into pipeline
//! sub-commands, and each sub-command must be covered individually.

use std::path::{Path, PathBuf};

use glob::Pattern;
use serde_json::Value;

/// Errors from parsing a rule string.
#[derive(Debug, thiserror::Error)]
pub enum RuleParseError {
    #[error("empty rule")]
    Empty,
    #[error("unbalanced parentheses in rule: {0}")]
    Unbalanced(String),
    #[error("invalid glob in rule {rule}: {source}")]
    BadGlob {
        rule: String,
        source: glob::PatternError,
    },
}

/// A single allow/deny/ask rule.
#[derive(Debug, Clone)]
pub struct PermissionRule {
    tool: String,
    arg_pattern: Option<Pattern>,
    raw: String,
}

impl PermissionRule {
    /// Parse `ToolName` or `ToolName(argGlob)`.
    pub fn parse(raw: &str) -> Result<Self, RuleParseError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(RuleParseError::Empty);
        }

        if let Some(open) = raw.find('(') {
            if !raw.ends_with(')') {
                return Err(RuleParseError::Unbalanced(raw.to_string()));
            }
            let tool = raw[..open].trim().to_string();
            let arg = &raw[open + 1..raw.len() - 1];
            let pattern = Pattern::new(arg).map_err(|source| RuleParseError::BadGlob {
                rule: raw.to_string(),
                source,
            })?;
            Ok(Self {
                tool,
                arg_pattern: Some(pattern),
                raw: raw.to_string(),
            })
        } else {
            Ok(Self {
                tool: raw.to_string(),
                arg_pattern: None,
                raw: raw.to_string(),
            })
        }
    }

    /// The rule string as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Match against a tool name and its primary parameter.
    ///
    /// Tool names compare exactly. A rule without an arg pattern matches
    /// every invocation of the tool; a rule with one requires a primary
    /// parameter that satisfies the glob.
    pub fn matches(&self, tool: &str, primary_arg: Option<&str>) -> bool {
        if self.tool != tool {
            return false;
        }
        match (&self.arg_pattern, primary_arg) {
            (None, _) => true,
            (Some(pattern), Some(arg)) => pattern.matches(arg),
            (Some(_), None) => false,
        }
    }
}

/// An ordered list of rules sharing one verdict (allow, deny, or ask).
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<PermissionRule>,
}

impl RuleSet {
    /// Parse a list of rule strings, skipping malformed entries with a warning.
    pub fn parse_lenient(raw: &[String]) -> Self {
        let mut rules = Vec::with_capacity(raw.len());
        for entry in raw {
            match PermissionRule::parse(entry) {
                Ok(rule) => rules.push(rule),
                Err(e) => tracing::warn!("ignoring malformed permission rule {entry:?}: {e}"),
            }
        }
        Self { rules }
    }

    pub fn push(&mut self, rule: PermissionRule) {
        self.rules.push(rule);
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether any rule matches the tool/arg pair.
    pub fn matches(&self, tool: &str, primary_arg: Option<&str>) -> bool {
        self.rules.iter().any(|r| r.matches(tool, primary_arg))
    }
}

/// Extract the parameter a rule glob is matched against.
///
/// Shell tools use the command string, file tools the path, fetch tools a
/// `domain:<host>` form so rules can pin a host rather than a full URL.
pub fn primary_parameter(tool_name: &str, parameters: &Value) -> Option<String> {
    let str_param = |key: &str| {
        parameters
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    match tool_name {
        "Bash" => str_param("command"),
        "Read" | "Write" | "Edit" | "MultiEdit" => str_param("file_path").or_else(|| str_param("path")),
        "WebFetch" => str_param("url")
            .and_then(|url| host_of(&url))
            .map(|host| format!("domain:{host}")),
        "Glob" | "Grep" => str_param("pattern"),
        _ => str_param("path").or_else(|| str_param("command")),
    }
}

fn host_of(url: &str) -> Option<String> {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let host = rest.split(['/', '?', '#']).next()?;
    let host = host.rsplit_once('@').map(|(_, h)| h).unwrap_or(host);
    let host = host.split(':').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

/// Whether a tool mutates files. Session allows for these are kept in
/// memory only and never written to the settings file.
pub fn is_write_tool(tool_name: &str) -> bool {
    matches!(tool_name, "Write" | "Edit" | "MultiEdit")
}

/// Split a shell command into its pipeline sub-commands.
///
/// Splits on `&&`, `||`, `;` and `|` outside single or double quotes.
/// Backslash escapes are honored outside single quotes.
pub fn split_shell_command(command: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = command.chars().peekable();
    let mut in_single = false;
    let mut in_double = false;

    while let Some(ch) = chars.next() {
        match ch {
            '\\' if !in_single => {
                current.push(ch);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '\'' if !in_double => {
                in_single = !in_single;
                current.push(ch);
            }
            '"' if !in_single => {
                in_double = !in_double;
                current.push(ch);
            }
            '&' | '|' if !in_single && !in_double && chars.peek() == Some(&ch) => {
                chars.next();
                push_part(&mut parts, &mut current);
            }
            '|' | ';' if !in_single && !in_double => {
                push_part(&mut parts, &mut current);
            }
            _ => current.push(ch),
        }
    }
    push_part(&mut parts, &mut current);
    parts
}

fn push_part(parts: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        parts.push(trimmed.to_string());
    }
    current.clear();
}

/// Whether a sub-command is a `cd` that stays inside the worktree.
///
/// These are treated as safe without a matching rule. A bare `cd` (home
/// directory) is not safe; neither is a worktree-relative escape through
/// `..` segments.
pub fn is_safe_cd(subcommand: &str, cwd: &Path, worktree: &Path) -> bool {
    let mut tokens = subcommand.split_whitespace();
    if tokens.next() != Some("cd") {
        return false;
    }
    let Some(target) = tokens.next() else {
        return false;
    };
    let target = target.trim_matches(|c| c == '"' || c == '\'');
    let resolved = if Path::new(target).is_absolute() {
        PathBuf::from(target)
    } else {
        cwd.join(target)
    };
    normalize(&resolved).starts_with(normalize(worktree))
}

/// Lexically resolve `.` and `..` segments without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}
