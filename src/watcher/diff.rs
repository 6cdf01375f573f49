//! A single-pass line diff heuristic.
//!
//! Deliberately not Myers: cheap, stable under duplicate lines, with an
//! explicit bail-out above [`MAX_DIFF_LINES`]. At a mismatch, each side is
//! scanned ahead for the first reappearance of the other side's current
//! line; whichever reappears sooner tells us which side accumulated pure
//! insertions or deletions. A mutual non-match is treated as a one-line
//! replacement.

pub const MAX_DIFF_LINES: usize = 2000;

pub struct DiffResult {
    pub diff: Option<String>,
    pub lines_added: u32,
    pub lines_removed: u32,
}

pub fn diff_lines(old: &str, new: &str) -> DiffResult {
    let old_lines: Vec<&str> = old.split('\n').collect();
    let new_lines: Vec<&str> = new.split('\n').collect();

    if old_lines.len() > MAX_DIFF_LINES || new_lines.len() > MAX_DIFF_LINES {
        let delta = new_lines.len() as i64 - old_lines.len() as i64;
        return DiffResult {
            diff: Some(format!("(diff omitted: file too large, {delta:+} line delta)")),
            lines_added: delta.max(0) as u32,
            lines_removed: (-delta).max(0) as u32,
        };
    }

    let mut i = 0usize;
    let mut j = 0usize;
    let mut added: Vec<String> = Vec::new();
    let mut removed: Vec<String> = Vec::new();

    while i < old_lines.len() || j < new_lines.len() {
        if i < old_lines.len() && j < new_lines.len() && old_lines[i] == new_lines[j] {
            i += 1;
            j += 1;
            continue;
        }
        if i >= old_lines.len() {
            added.push(new_lines[j].to_string());
            j += 1;
            continue;
        }
        if j >= new_lines.len() {
            removed.push(old_lines[i].to_string());
            i += 1;
            continue;
        }

        let old_line = old_lines[i];
        let new_line = new_lines[j];
        let dist_in_new = new_lines[j..].iter().position(|&l| l == old_line);
        let dist_in_old = old_lines[i..].iter().position(|&l| l == new_line);

        match (dist_in_new, dist_in_old) {
            (Some(d_new), Some(d_old)) if d_new <= d_old => {
                added.extend(new_lines[j..j + d_new].iter().map(|s| s.to_string()));
                j += d_new;
            }
            (Some(_), Some(d_old)) => {
                removed.extend(old_lines[i..i + d_old].iter().map(|s| s.to_string()));
                i += d_old;
            }
            (Some(d_new), None) => {
                added.extend(new_lines[j..j + d_new].iter().map(|s| s.to_string()));
                j += d_new;
            }
            (None, Some(d_old)) => {
                removed.extend(old_lines[i..i + d_old].iter().map(|s| s.to_string()));
                i += d_old;
            }
            (None, None) => {
                removed.push(old_line.to_string());
                added.push(new_line.to_string());
                i += 1;
                j += 1;
            }
        }
    }

    DiffResult {
        lines_added: added.len() as u32,
        lines_removed: removed.len() as u32,
        diff: Some(render(&added, &removed)),
    }
}

fn render(added: &[String], removed: &[String]) -> String {
    let mut out = String::new();
    for line in removed.iter().take(10) {
        out.push_str("- ");
        out.push_str(line);
        out.push('\n');
    }
    for line in added.iter().take(10) {
        out.push_str("+ ");
        out.push_str(line);
        out.push('\n');
    }
    if added.len() > 10 || removed.len() > 10 {
        out.push_str(&format!(
            "... ({} added, {} removed total)\n",
            added.len(),
            removed.len()
        ));
    }
    out.trim_end().to_string()
}
