//! Line diff used to compare snapshots against their baselines.

use difference::{Changeset, Difference};

/// Compares two full text contents line by line.
///
/// Returns `None` when they are identical, otherwise a rendering where each line
/// carries a `+` (added in `new`), `-` (removed from `baseline`) or ` ` prefix.
pub fn pretty_diff(baseline: &str, new: &str) -> Option<String> {
    if baseline == new {
        return None;
    }
    let changeset = Changeset::new(baseline, new, "\n");
    let mut rendered = Vec::new();
    for diff in &changeset.diffs {
        let (prefix, block) = match diff {
            Difference::Same(x) => (' ', x),
            Difference::Add(x) => ('+', x),
            Difference::Rem(x) => ('-', x),
        };
        for line in block.split('\n') {
            rendered.push(format!("{}{}", prefix, line));
        }
    }
    Some(rendered.join("\n"))
}
