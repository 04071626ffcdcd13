//! Text-level edit strategies used when `git apply` cannot place a diff.
//!
//! Each function takes the current file content and returns the rewritten
//! content, or `None` when it could not make a change. Callers write the file
//! only on `Some`, so a strategy either rewrites its target or leaves it alone.

use crate::core::diff::{Anchor, ParsedDiff};

/// Find `needle` in `haystack` where it starts and ends on line boundaries.
fn find_whole_lines(haystack: &str, needle: &str) -> Option<usize> {
    haystack.match_indices(needle).map(|(idx, _)| idx).find(|&idx| {
        let starts_line = idx == 0 || haystack.as_bytes()[idx - 1] == b'\n';
        let end = idx + needle.len();
        let ends_line = end == haystack.len() || haystack.as_bytes()[end] == b'\n';
        starts_line && ends_line
    })
}

/// Replace the first whole-line occurrence of the removed block with the added block.
///
/// A pure deletion also consumes the newline that ended the block.
pub fn replace_block(content: &str, removed: &[String], added: &[String]) -> Option<String> {
    if removed.is_empty() {
        return None;
    }
    let old = removed.join("\n");
    if old.trim().is_empty() {
        return None;
    }
    let idx = find_whole_lines(content, &old)?;
    let mut end = idx + old.len();

    let replacement = if added.is_empty() {
        if content[end..].starts_with('\n') {
            end += 1;
        }
        String::new()
    } else {
        added.join("\n")
    };

    let modified = format!("{}{}{}", &content[..idx], replacement, &content[end..]);
    (modified != content).then_some(modified)
}

fn leading_whitespace(line: &str) -> &str {
    &line[..line.len() - line.trim_start().len()]
}

/// Replace removed lines one by one, matching on trimmed content.
///
/// Each removed line claims the first unclaimed file line with the same
/// trimmed text. It becomes the added line at the same position, re-indented
/// to match the file, or is deleted when there is no counterpart. Added lines
/// beyond the removed count follow the last replaced line.
pub fn replace_lines(content: &str, removed: &[String], added: &[String]) -> Option<String> {
    let mut lines: Vec<Option<String>> = content.split('\n').map(|l| Some(l.to_string())).collect();
    let mut claimed = vec![false; lines.len()];
    let mut last_replaced: Option<usize> = None;

    for (idx, old) in removed.iter().enumerate() {
        let wanted = old.trim();
        if wanted.is_empty() {
            continue;
        }
        let Some(pos) = lines.iter().enumerate().position(|(pos, line)| {
            !claimed[pos] && line.as_deref().is_some_and(|line| line.trim() == wanted)
        }) else {
            continue;
        };
        claimed[pos] = true;
        let replacement = match (added.get(idx), &lines[pos]) {
            (Some(new), Some(current)) => {
                last_replaced = Some(pos);
                Some(format!("{}{}", leading_whitespace(current), new.trim()))
            }
            _ => None,
        };
        lines[pos] = replacement;
    }

    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    for (pos, line) in lines.into_iter().enumerate() {
        if let Some(line) = line {
            out.push(line);
        }
        if Some(pos) == last_replaced && added.len() > removed.len() {
            out.extend(added[removed.len()..].iter().cloned());
        }
    }

    let modified = out.join("\n");
    (modified != content).then_some(modified)
}

/// Insert the added lines next to a context line of the diff.
///
/// Only applies to additions-only diffs. The anchor is tried first; when it
/// is missing from the file, the remaining non-blank context lines are tried
/// in diff order and the lines go after the first one found verbatim.
pub fn insert_at_context(content: &str, parsed: &ParsedDiff) -> Option<String> {
    if !parsed.is_additions_only() {
        return None;
    }

    let anchor = match &parsed.anchor {
        Some(Anchor::After(line)) => Some((line.as_str(), true)),
        Some(Anchor::Before(line)) => Some((line.as_str(), false)),
        None => None,
    };
    let fallbacks = parsed
        .context
        .iter()
        .map(String::as_str)
        .filter(|line| !line.trim().is_empty())
        .filter(|line| anchor.is_none_or(|(needle, _)| needle != *line))
        .map(|line| (line, true));

    let mut lines: Vec<String> = content.split('\n').map(str::to_string).collect();
    let at = anchor.into_iter().chain(fallbacks).find_map(|(needle, after)| {
        let pos = lines.iter().position(|line| line == needle)?;
        Some(if after { pos + 1 } else { pos })
    })?;
    lines.splice(at..at, parsed.added.iter().cloned());

    let modified = lines.join("\n");
    (modified != content).then_some(modified)
}

/// Try block replace, then per-line replace, then (when allowed) context insertion.
pub fn apply_textual(content: &str, parsed: &ParsedDiff, allow_insert: bool) -> Option<String> {
    replace_block(content, &parsed.removed, &parsed.added)
        .or_else(|| replace_lines(content, &parsed.removed, &parsed.added))
        .or_else(|| {
            if allow_insert {
                insert_at_context(content, parsed)
            } else {
                None
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::diff::parse_diff;

    fn strings(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|line| line.to_string()).collect()
    }

    #[test]
    fn block_replace_hits_first_whole_line_occurrence() {
        let content = "a = 1\nb = 2\na = 1\n";
        let out = replace_block(content, &strings(&["a = 1"]), &strings(&["a = 3"])).unwrap();
        assert_eq!(out, "a = 3\nb = 2\na = 1\n");
    }

    #[test]
    fn block_replace_ignores_partial_line_matches() {
        let content = "value = x + 10\n";
        assert_eq!(replace_block(content, &strings(&["value = x + 1"]), &strings(&["y"])), None);
    }

    #[test]
    fn block_deletion_removes_line_and_newline() {
        let content = "keep\ndrop\nkeep too\n";
        let out = replace_block(content, &strings(&["drop"]), &[]).unwrap();
        assert_eq!(out, "keep\nkeep too\n");
    }

    #[test]
    fn line_replace_preserves_file_indentation() {
        let content = "def f(x):\n        return x + 1\n";
        let out = replace_lines(content, &strings(&["  return x + 1"]), &strings(&["return x * 2"]))
            .unwrap();
        assert_eq!(out, "def f(x):\n        return x * 2\n");
    }

    #[test]
    fn line_replace_deletes_lines_without_counterpart() {
        let content = "a\n  b\nc\n";
        let out = replace_lines(content, &strings(&["c", "b"]), &strings(&["C"])).unwrap();
        assert_eq!(out, "a\nC\n");
    }

    #[test]
    fn line_replace_appends_surplus_added_lines() {
        let content = "x = 1\ny = 2\n";
        let out = replace_lines(content, &strings(&["x = 1"]), &strings(&["x = 10", "z = 3"])).unwrap();
        assert_eq!(out, "x = 10\nz = 3\ny = 2\n");
    }

    #[test]
    fn line_replace_without_match_changes_nothing() {
        assert_eq!(replace_lines("a\n", &strings(&["b"]), &strings(&["c"])), None);
    }

    #[test]
    fn insertion_follows_anchor() {
        let parsed = parse_diff("@@ -1,2 +1,3 @@\n import os\n+import re\n import sys\n");
        let out = insert_at_context("import os\nimport sys\n", &parsed).unwrap();
        assert_eq!(out, "import os\nimport re\nimport sys\n");
    }

    #[test]
    fn insertion_before_leading_anchor() {
        let parsed = parse_diff("@@ -1 +1,2 @@\n+#!/usr/bin/env python\n import sys\n");
        let out = insert_at_context("import sys\n", &parsed).unwrap();
        assert_eq!(out, "#!/usr/bin/env python\nimport sys\n");
    }

    #[test]
    fn insertion_requires_verbatim_anchor() {
        let parsed = parse_diff(" import os\n+import re\n");
        assert_eq!(insert_at_context("    import os\n", &parsed), None);
    }

    #[test]
    fn insertion_falls_back_to_later_context_when_anchor_is_missing() {
        let parsed = parse_diff("@@ -1,2 +1,3 @@\n import os\n+import re\n import sys\n");
        let out = insert_at_context("import sys\nimport json\n", &parsed).unwrap();
        assert_eq!(out, "import sys\nimport re\nimport json\n");
    }

    #[test]
    fn insertion_prefers_anchor_over_earlier_context() {
        let parsed = parse_diff("@@ -1,3 +1,4 @@\n import os\n import sys\n+import re\n");
        let out = insert_at_context("import os\nimport sys\n", &parsed).unwrap();
        assert_eq!(out, "import os\nimport sys\nimport re\n");
    }

    #[test]
    fn apply_textual_respects_insert_flag() {
        let parsed = parse_diff(" import os\n+import re\n");
        assert!(apply_textual("import os\n", &parsed, true).is_some());
        assert_eq!(apply_textual("import os\n", &parsed, false), None);
    }
}
