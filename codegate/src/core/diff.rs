//! Unified-diff parsing, validation and repair.
//!
//! Everything here works on diff text alone. Validation runs before any
//! filesystem access so structurally empty or no-op diffs never reach the
//! working tree.

/// Body lines of a diff, split by role. Header and hunk-marker lines are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedDiff {
    /// `-` lines without their prefix, in order.
    pub removed: Vec<String>,
    /// `+` lines without their prefix, in order.
    pub added: Vec<String>,
    /// Unchanged ` ` lines without their prefix, in order.
    pub context: Vec<String>,
    /// Where the first added line sits relative to its nearest non-blank context line.
    pub anchor: Option<Anchor>,
}

/// A context line that pins down where added lines go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anchor {
    /// Added lines follow this context line.
    After(String),
    /// Added lines open the hunk and precede this context line.
    Before(String),
}

impl ParsedDiff {
    pub fn changed_lines(&self) -> usize {
        self.removed.len() + self.added.len()
    }

    pub fn is_additions_only(&self) -> bool {
        self.removed.is_empty() && !self.added.is_empty()
    }
}

fn is_header_line(line: &str) -> bool {
    line.starts_with("---")
        || line.starts_with("+++")
        || line.starts_with("@@")
        || line.starts_with("diff --git")
}

pub fn parse_diff(diff: &str) -> ParsedDiff {
    let mut parsed = ParsedDiff::default();
    let mut last_context: Option<&str> = None;
    let mut awaiting_anchor = false;
    for line in diff.lines() {
        if is_header_line(line) {
            continue;
        }
        if let Some(rest) = line.strip_prefix('-') {
            parsed.removed.push(rest.to_string());
        } else if let Some(rest) = line.strip_prefix('+') {
            if parsed.added.is_empty() {
                match last_context {
                    Some(ctx) => parsed.anchor = Some(Anchor::After(ctx.to_string())),
                    None => awaiting_anchor = true,
                }
            }
            parsed.added.push(rest.to_string());
        } else if let Some(rest) = line.strip_prefix(' ') {
            if !rest.trim().is_empty() {
                if awaiting_anchor {
                    parsed.anchor = Some(Anchor::Before(rest.to_string()));
                    awaiting_anchor = false;
                }
                last_context = Some(rest);
            }
            parsed.context.push(rest.to_string());
        }
    }
    parsed
}

/// Path named by a `--- ` / `+++ ` marker, without its `a/` or `b/` prefix.
///
/// Returns `None` for other lines and for `/dev/null`.
fn marker_path(line: &str) -> Option<String> {
    let rest = line
        .strip_prefix("--- ")
        .or_else(|| line.strip_prefix("+++ "))?;
    let raw = rest.split('\t').next().unwrap_or_default().trim();
    if raw.is_empty() || raw == "/dev/null" {
        return None;
    }
    let path = raw
        .strip_prefix("a/")
        .or_else(|| raw.strip_prefix("b/"))
        .unwrap_or(raw);
    (!path.is_empty()).then(|| path.to_string())
}

/// Files named in the diff's old/new markers, deduplicated in first-seen order.
pub fn header_files(diff: &str) -> Vec<String> {
    let mut files: Vec<String> = Vec::new();
    for path in diff.lines().filter_map(marker_path) {
        if !files.contains(&path) {
            files.push(path);
        }
    }
    files
}

/// The last path named by any old/new marker.
pub fn last_header_file(diff: &str) -> Option<String> {
    diff.lines().filter_map(marker_path).last()
}

/// Reject diffs that cannot describe a meaningful change.
///
/// A length mismatch between removed and added lines always counts as a real
/// change; equal-length sequences must differ somewhere beyond whitespace.
pub fn validate_patch(diff: &str) -> Result<ParsedDiff, String> {
    if diff.trim().is_empty() {
        return Err("Empty diff".to_string());
    }

    let parsed = parse_diff(diff);
    if parsed.removed.is_empty() && parsed.added.is_empty() {
        return Err("No changes in diff (no + or - lines)".to_string());
    }
    if parsed.removed == parsed.added {
        return Err("No-op patch: removed lines identical to added lines".to_string());
    }

    let whitespace_only = parsed.removed.len() == parsed.added.len()
        && parsed
            .removed
            .iter()
            .zip(&parsed.added)
            .all(|(removed, added)| removed.trim() == added.trim());
    if whitespace_only {
        return Err("No meaningful changes (only whitespace differences)".to_string());
    }

    Ok(parsed)
}

fn strip_side_prefix<'a>(path: &'a str, prefix: &str) -> &'a str {
    path.strip_prefix(prefix).unwrap_or(path)
}

fn marker_raw_path(line: &str) -> &str {
    line.get(4..)
        .unwrap_or_default()
        .split('\t')
        .next()
        .unwrap_or_default()
        .trim()
}

/// Normalize a diff before applying it.
///
/// When no `diff --git` header exists, one is synthesized in front of every
/// `---`/`+++` marker pair. The result always ends with a newline.
pub fn repair_patch(diff: &str) -> String {
    let lines: Vec<&str> = diff.lines().collect();
    let has_git_header = lines.iter().any(|line| line.starts_with("diff --git"));

    let mut repaired: Vec<String> = Vec::with_capacity(lines.len() + 2);
    for (idx, line) in lines.iter().enumerate() {
        let next = lines.get(idx + 1);
        if !has_git_header
            && line.starts_with("---")
            && next.is_some_and(|next| next.starts_with("+++"))
        {
            let src = strip_side_prefix(marker_raw_path(line), "a/");
            let dst = next
                .map(|next| strip_side_prefix(marker_raw_path(next), "b/"))
                .unwrap_or(src);
            repaired.push(format!("diff --git a/{src} b/{dst}"));
        }
        repaired.push((*line).to_string());
    }

    let mut out = repaired.join("\n");
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "--- a/src/calc.py\n+++ b/src/calc.py\n@@ -1,2 +1,2 @@\n def f(x):\n-    return x + 1\n+    return x * 2\n";

    #[test]
    fn parse_splits_body_lines_by_role() {
        let parsed = parse_diff(SAMPLE);
        assert_eq!(parsed.removed, vec!["    return x + 1"]);
        assert_eq!(parsed.added, vec!["    return x * 2"]);
        assert_eq!(parsed.context, vec!["def f(x):"]);
        assert_eq!(parsed.changed_lines(), 2);
        assert_eq!(parsed.anchor, Some(Anchor::After("def f(x):".to_string())));
    }

    #[test]
    fn anchor_falls_forward_when_additions_open_the_hunk() {
        let parsed = parse_diff("@@ -1 +1,2 @@\n+import os\n import sys\n");
        assert_eq!(parsed.anchor, Some(Anchor::Before("import sys".to_string())));
        assert_eq!(parse_diff("+x = 1\n").anchor, None);
    }

    #[test]
    fn header_files_strip_prefixes_and_dedupe() {
        assert_eq!(header_files(SAMPLE), vec!["src/calc.py".to_string()]);
        let created = "--- /dev/null\n+++ b/new.py\n@@ -0,0 +1 @@\n+x = 1\n";
        assert_eq!(header_files(created), vec!["new.py".to_string()]);
        assert_eq!(last_header_file(created), Some("new.py".to_string()));
    }

    #[test]
    fn validate_rejects_empty_and_whitespace_diffs() {
        assert_eq!(validate_patch("").unwrap_err(), "Empty diff");
        assert_eq!(validate_patch("  \n\t").unwrap_err(), "Empty diff");
    }

    #[test]
    fn validate_rejects_headers_without_body() {
        let err = validate_patch("--- a/x.py\n+++ b/x.py\n@@ -1 +1 @@\n same\n").unwrap_err();
        assert!(err.contains("No changes"));
    }

    #[test]
    fn validate_rejects_no_op() {
        let err = validate_patch("--- a/x.py\n+++ b/x.py\n-same\n+same\n").unwrap_err();
        assert!(err.starts_with("No-op patch"));
    }

    #[test]
    fn validate_rejects_whitespace_only_changes() {
        let err = validate_patch("-    value = 1\n+  value = 1  \n").unwrap_err();
        assert!(err.contains("only whitespace"));
    }

    #[test]
    fn validate_counts_length_mismatch_as_change() {
        let parsed = validate_patch("-a = 1\n+a = 1\n+b = 2\n").expect("valid");
        assert_eq!(parsed.added.len(), 2);
        assert!(validate_patch("+only_added()\n").is_ok());
    }

    #[test]
    fn validate_accepts_real_change() {
        assert!(validate_patch(SAMPLE).is_ok());
    }

    #[test]
    fn repair_synthesizes_git_header_without_doubling_prefixes() {
        let repaired = repair_patch(SAMPLE.trim_end());
        assert!(repaired.starts_with("diff --git a/src/calc.py b/src/calc.py\n--- a/src/calc.py\n"));
        assert!(repaired.ends_with('\n'));
    }

    #[test]
    fn repair_keeps_existing_git_header() {
        let diff = format!("diff --git a/src/calc.py b/src/calc.py\n{SAMPLE}");
        let repaired = repair_patch(&diff);
        assert_eq!(repaired.matches("diff --git").count(), 1);
    }

    #[test]
    fn repair_handles_every_file_section() {
        let diff = "--- a/a.py\n+++ b/a.py\n-x\n+y\n--- a/b.py\n+++ b/b.py\n-x\n+y";
        let repaired = repair_patch(diff);
        assert!(repaired.contains("diff --git a/a.py b/a.py\n"));
        assert!(repaired.contains("diff --git a/b.py b/b.py\n"));
    }
}
