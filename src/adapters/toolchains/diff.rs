//! Line diffs for artifacts.

use std::fmt::Write as _;

/// Above this many line pairs the diff degrades to remove-all/add-all.
const MAX_TABLE_CELLS: usize = 4_000_000;

/// Line diff of `before` to `after` in unified style, without hunk headers.
///
/// Returns an empty string when the two are identical.
pub fn line_diff(path: &str, before: &str, after: &str) -> String {
    if before == after {
        return String::new();
    }
    let old: Vec<&str> = before.lines().collect();
    let new: Vec<&str> = after.lines().collect();

    let mut out = String::new();
    if old.is_empty() {
        out.push_str("--- /dev/null\n");
    } else {
        let _ = writeln!(out, "--- a/{path}");
    }
    let _ = writeln!(out, "+++ b/{path}");

    if old.len().saturating_mul(new.len()) > MAX_TABLE_CELLS {
        for line in &old {
            let _ = writeln!(out, "-{line}");
        }
        for line in &new {
            let _ = writeln!(out, "+{line}");
        }
        return out;
    }

    // lcs[i][j] = longest common subsequence of old[i..] and new[j..]
    let mut lcs = vec![vec![0u32; new.len() + 1]; old.len() + 1];
    for i in (0..old.len()).rev() {
        for j in (0..new.len()).rev() {
            lcs[i][j] = if old[i] == new[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let (mut i, mut j) = (0, 0);
    while i < old.len() && j < new.len() {
        if old[i] == new[j] {
            let _ = writeln!(out, " {}", old[i]);
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            let _ = writeln!(out, "-{}", old[i]);
            i += 1;
        } else {
            let _ = writeln!(out, "+{}", new[j]);
            j += 1;
        }
    }
    for line in &old[i..] {
        let _ = writeln!(out, "-{line}");
    }
    for line in &new[j..] {
        let _ = writeln!(out, "+{line}");
    }
    out
}
