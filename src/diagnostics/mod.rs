//! Normalization of external tool output into diagnostic lines
//!
//! Each external tool gets a small adapter describing what noise to strip
//! and how to split the remainder into per-location fragments. Emission
//! order is preserved; diagnostics arrive ordered by source line and must
//! stay that way.

use regex::Regex;
use std::path::Path;

/// Which external tool produced the output being parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// Generic native verify script (arduino-cli compile underneath)
    NativeVerify,
    /// Family-specific verify batch script for constrained targets
    ConstrainedVerify,
    /// Native flash tool (avrdude underneath)
    Uploader,
    /// Interpreted-language linter (pyflakes)
    InterpreterLint,
    /// Interpreted-language device runner (ampy)
    InterpreterRun,
}

/// How the stripped output is cut into diagnostic fragments.
#[derive(Debug, Clone, Copy)]
enum SplitStrategy {
    /// Split on the staged source's absolute path; each fragment then
    /// corresponds to one diagnostic location.
    SourcePath,
    /// Split on a fixed tool prefix.
    Token(&'static str),
    /// One fragment per line.
    Lines,
}

/// Per-tool normalization rules.
pub struct ToolAdapter {
    kind: ToolKind,
    strip: Vec<Regex>,
    split: SplitStrategy,
}

impl ToolAdapter {
    /// Adapter for the given tool.
    pub fn for_kind(kind: ToolKind) -> Self {
        let (patterns, split): (&[&str], SplitStrategy) = match kind {
            ToolKind::NativeVerify => (
                &[r"exit status 1", r"error:", r"\btoken\b"],
                SplitStrategy::SourcePath,
            ),
            ToolKind::ConstrainedVerify => (&[r"exit status 1"], SplitStrategy::SourcePath),
            ToolKind::Uploader => (
                &[r"#{10,}", r"\|"],
                SplitStrategy::Token("avrdude:"),
            ),
            ToolKind::InterpreterLint => (
                &[r"Error: Command failed: python -m pyflakes"],
                SplitStrategy::Lines,
            ),
            ToolKind::InterpreterRun => (&[r"exit status 1"], SplitStrategy::Lines),
        };

        let strip = patterns
            .iter()
            .map(|p| Regex::new(p).expect("static strip pattern compiles"))
            .collect();

        Self { kind, strip, split }
    }

    pub fn kind(&self) -> ToolKind {
        self.kind
    }

    /// Normalize raw tool output into ordered diagnostic lines.
    pub fn parse(&self, output: &str, source_path: Option<&Path>) -> Vec<String> {
        let mut text = output.to_string();

        // The staged source path carries no information for the user; drop
        // it before splitting so fragments start at the location suffix.
        let path_str = source_path.map(|p| p.to_string_lossy().into_owned());

        for re in &self.strip {
            text = re.replace_all(&text, "").into_owned();
        }

        let fragments: Vec<&str> = match self.split {
            SplitStrategy::SourcePath => match &path_str {
                Some(path) => text.split(path.as_str()).collect(),
                None => text.lines().collect(),
            },
            SplitStrategy::Token(token) => text.split(token).collect(),
            SplitStrategy::Lines => {
                let mut t = text;
                if let Some(path) = &path_str {
                    t = t.replace(path.as_str(), "");
                }
                return t
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(String::from)
                    .collect();
            }
        };

        fragments
            .into_iter()
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(String::from)
            .collect()
    }
}

/// Convenience entry point: normalize `output` from a `kind` tool.
pub fn parse(output: &str, kind: ToolKind, source_path: Option<&Path>) -> Vec<String> {
    ToolAdapter::for_kind(kind).parse(output, source_path)
}
