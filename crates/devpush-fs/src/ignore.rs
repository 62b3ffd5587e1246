//! Gitignore-style ignore rules
//!
//! Supports the subset of gitignore syntax that matters for deciding which
//! files get pushed:
//!
//! - blank lines and `#` comments are skipped
//! - `name` (no inner slash) matches at any depth
//! - `/name` or `dir/name` is anchored to the root
//! - `name/` matches directories only
//! - a matched directory ignores everything beneath it
//! - `!pattern` re-includes a path an earlier pattern ignored
//!
//! As in gitignore, the last pattern that matches a path decides.

use std::fs;
use std::path::Path;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use crate::{Error, Result, WorkspacePath};

/// Patterns applied to every component regardless of configuration.
pub const DEFAULT_IGNORES: &[&str] = &[".git/", ".devpush/"];

/// Compiled ignore rules for one source root.
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    globs: GlobSet,
    /// One entry per glob in `globs`, same order
    rules: Vec<GlobRule>,
    patterns: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
struct GlobRule {
    /// Position of the source pattern; later patterns win
    order: usize,
    negated: bool,
    dir_only: bool,
}

struct Compiler {
    builder: GlobSetBuilder,
    rules: Vec<GlobRule>,
}

impl Compiler {
    fn new() -> Self {
        Self {
            builder: GlobSetBuilder::new(),
            rules: Vec::new(),
        }
    }

    fn add(&mut self, pattern: &str, original: &str, rule: GlobRule) -> Result<()> {
        self.builder.add(glob(pattern, original)?);
        self.rules.push(rule);
        Ok(())
    }
}

fn glob(pattern: &str, original: &str) -> Result<globset::Glob> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|e| Error::InvalidPattern {
            pattern: original.to_string(),
            message: e.to_string(),
        })
}

impl IgnoreRules {
    /// Compile a list of patterns. Comment and blank lines are accepted.
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut compiler = Compiler::new();
        let mut kept = Vec::new();

        for raw in patterns {
            let raw = raw.as_ref();
            if Self::add_pattern(&mut compiler, kept.len(), raw)? {
                kept.push(raw.trim().to_string());
            }
        }

        let globs = compiler.builder.build().map_err(|e| Error::InvalidPattern {
            pattern: "<set>".to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            globs,
            rules: compiler.rules,
            patterns: kept,
        })
    }

    /// Rules that ignore nothing.
    pub fn empty() -> Self {
        Self {
            globs: GlobSet::empty(),
            rules: Vec::new(),
            patterns: Vec::new(),
        }
    }

    /// [`DEFAULT_IGNORES`] followed by `extra`.
    pub fn with_defaults<I, S>(extra: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extra: Vec<String> = extra.into_iter().map(|s| s.as_ref().to_string()).collect();
        Self::new(DEFAULT_IGNORES.iter().map(|s| s.to_string()).chain(extra))
    }

    /// Build the rules for a source root.
    ///
    /// Reads `.devpushignore` when present, otherwise `.gitignore`, on top of
    /// [`DEFAULT_IGNORES`], then appends `extra`.
    pub fn load(root: &Path, extra: &[String]) -> Result<Self> {
        let mut patterns: Vec<String> = DEFAULT_IGNORES.iter().map(|s| s.to_string()).collect();

        for file in [WorkspacePath::IgnoreFile, WorkspacePath::GitIgnoreFile] {
            let path = root.join(file);
            if path.is_file() {
                let content = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
                tracing::debug!(file = %path.display(), "loaded ignore file");
                patterns.extend(content.lines().map(str::to_string));
                break;
            }
        }

        patterns.extend(extra.iter().cloned());
        Self::new(patterns)
    }

    /// Returns true when the pattern contributed a glob.
    fn add_pattern(compiler: &mut Compiler, order: usize, raw: &str) -> Result<bool> {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(false);
        }

        let (negated, line) = match line.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, line),
        };
        let (dir_only, line) = match line.strip_suffix('/') {
            Some(rest) => (true, rest),
            None => (false, line),
        };

        let anchored = line.contains('/');
        let body = line.trim_start_matches('/');
        if body.is_empty() {
            return Ok(false);
        }

        let base = if anchored {
            body.to_string()
        } else {
            format!("**/{body}")
        };
        let contents = format!("{base}/**");

        // Anything beneath a matched directory matches too.
        let rule = GlobRule {
            order,
            negated,
            dir_only,
        };
        compiler.add(&base, raw, rule)?;
        compiler.add(
            &contents,
            raw,
            GlobRule {
                dir_only: false,
                ..rule
            },
        )?;
        Ok(true)
    }

    /// The effective (non-comment) patterns, in order.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Whether a single root-relative path is ignored.
    pub fn is_ignored(&self, rel: &str, is_dir: bool) -> bool {
        let rel = rel.trim_start_matches("./").trim_end_matches('/');
        if rel.is_empty() {
            return false;
        }
        self.globs
            .matches(rel)
            .into_iter()
            .map(|i| self.rules[i])
            .filter(|rule| is_dir || !rule.dir_only)
            .max_by_key(|rule| rule.order)
            .is_some_and(|rule| !rule.negated)
    }

    /// Whether a path or any of its ancestor directories is ignored.
    ///
    /// Used where paths arrive without a directory walk, e.g. from
    /// filesystem notifications.
    pub fn is_path_ignored(&self, rel: &str, is_dir: bool) -> bool {
        let rel = rel.trim_start_matches("./").trim_end_matches('/');
        for (idx, ch) in rel.char_indices() {
            if ch == '/' && self.is_ignored(&rel[..idx], true) {
                return true;
            }
        }
        self.is_ignored(rel, is_dir)
    }
}

impl Default for IgnoreRules {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn rules(patterns: &[&str]) -> IgnoreRules {
        IgnoreRules::new(patterns.iter().copied()).unwrap()
    }

    #[rstest]
    #[case("*.log", "debug.log", false, true)]
    #[case("*.log", "nested/dir/debug.log", false, true)]
    #[case("*.log", "debug.txt", false, false)]
    #[case("/root.txt", "root.txt", false, true)]
    #[case("/root.txt", "sub/root.txt", false, false)]
    #[case("docs/*.md", "docs/a.md", false, true)]
    #[case("docs/*.md", "docs/deep/a.md", false, false)]
    #[case("target/", "target", true, true)]
    #[case("target/", "target", false, false)]
    #[case("target/", "target/debug/app", false, true)]
    #[case("node_modules", "web/node_modules/pkg/index.js", false, true)]
    fn single_pattern_matching(
        #[case] pattern: &str,
        #[case] path: &str,
        #[case] is_dir: bool,
        #[case] expected: bool,
    ) {
        assert_eq!(rules(&[pattern]).is_ignored(path, is_dir), expected);
    }

    #[test]
    fn negation_reincludes() {
        let r = rules(&["*.log", "!keep.log"]);
        assert!(r.is_ignored("drop.log", false));
        assert!(!r.is_ignored("keep.log", false));
    }

    #[test]
    fn last_matching_pattern_wins() {
        let r = rules(&["!keep.log", "*.log"]);
        assert!(r.is_ignored("keep.log", false));

        let r = rules(&["*.log", "!keep.log", "keep.*"]);
        assert!(r.is_ignored("keep.log", false));
    }

    #[test]
    fn dir_only_negation_leaves_files_alone() {
        let r = rules(&["cache*", "!cache/"]);
        assert!(!r.is_ignored("cache", true));
        assert!(r.is_ignored("cache", false));
    }

    #[test]
    fn comments_and_blanks_are_skipped() {
        let r = rules(&["# build output", "", "   ", "dist/"]);
        assert_eq!(r.patterns(), &["dist/".to_string()]);
    }

    #[test]
    fn defaults_cover_git_and_state_dir() {
        let r = IgnoreRules::with_defaults(Vec::<String>::new()).unwrap();
        assert!(r.is_ignored(".git", true));
        assert!(r.is_ignored(".git/HEAD", false));
        assert!(r.is_ignored(".devpush/state/app.toml", false));
        assert!(!r.is_ignored("src/main.rs", false));
    }

    #[test]
    fn path_ignored_through_ancestor() {
        let r = rules(&["build/"]);
        assert!(r.is_path_ignored("build/out/a.o", false));
        assert!(!r.is_path_ignored("src/build.rs", false));
    }

    #[test]
    fn load_prefers_devpushignore() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(".devpushignore"), "*.tmp\n").unwrap();
        fs::write(temp.path().join(".gitignore"), "*.log\n").unwrap();

        let r = IgnoreRules::load(temp.path(), &["extra/".to_string()]).unwrap();
        assert!(r.is_ignored("a.tmp", false));
        assert!(!r.is_ignored("a.log", false));
        assert!(r.is_ignored("extra/x", false));
        assert!(r.is_ignored(".git/config", false));
    }

    #[test]
    fn load_falls_back_to_gitignore() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(".gitignore"), "*.log\n").unwrap();

        let r = IgnoreRules::load(temp.path(), &[]).unwrap();
        assert!(r.is_ignored("a.log", false));
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let err = IgnoreRules::new(["src/[unclosed"]).unwrap_err();
        assert!(matches!(err, Error::InvalidPattern { .. }));
    }
}
