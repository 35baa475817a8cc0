//! Compaction of indentation-structured accessibility snapshots.
//!
//! A snapshot line such as `- generic [ref=e12]:` is a bare structural node: it only groups
//! its children. Such a line is dropped unless something below it carries information.
//! Every other non-blank line is kept verbatim, and blank lines are always kept.

use once_cell::sync::Lazy;
use regex::Regex;

static BARE_GENERIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*- generic \[ref=[^\]\s]+\]:?\s*$").expect("static regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind {
    Blank,
    Bare,
    Useful,
}

fn classify(line: &str) -> LineKind {
    if line.trim().is_empty() {
        LineKind::Blank
    } else if BARE_GENERIC.is_match(line) {
        LineKind::Bare
    } else {
        LineKind::Useful
    }
}

fn depth(line: &str) -> usize {
    line.chars().take_while(|c| c.is_whitespace()).count()
}

/// A bare node waiting for its subtree to close.
struct OpenNode {
    index: usize,
    depth: usize,
    useful: bool,
}

/// Remove bare structural nodes whose whole subtree carries no information.
///
/// Single pass: open bare ancestors sit on a stack, and a bare node that turns out useful
/// marks its parent when it closes. Linear in the number of lines.
pub fn compact(snapshot: &str) -> String {
    let lines: Vec<&str> = snapshot.split('\n').collect();
    let mut keep = vec![true; lines.len()];
    let mut stack: Vec<OpenNode> = Vec::new();

    for (index, line) in lines.iter().enumerate() {
        let kind = classify(line);
        if kind == LineKind::Blank {
            continue;
        }
        let d = depth(line);
        close_until(&mut stack, &mut keep, d);
        match kind {
            LineKind::Useful => {
                if let Some(parent) = stack.last_mut() {
                    parent.useful = true;
                }
            }
            LineKind::Bare => stack.push(OpenNode {
                index,
                depth: d,
                useful: false,
            }),
            LineKind::Blank => {}
        }
    }
    close_until(&mut stack, &mut keep, 0);

    lines
        .iter()
        .zip(keep)
        .filter_map(|(line, kept)| kept.then_some(*line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Close every open node at depth >= `depth`, deciding whether it stays.
fn close_until(stack: &mut Vec<OpenNode>, keep: &mut [bool], depth: usize) {
    while let Some(node) = stack.pop() {
        if node.depth < depth {
            stack.push(node);
            break;
        }
        keep[node.index] = node.useful;
        if node.useful {
            if let Some(parent) = stack.last_mut() {
                parent.useful = true;
            }
        }
    }
}
