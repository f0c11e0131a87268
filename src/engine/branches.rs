//! Parsing of `git branch` listings.

/// Normalise raw `git branch -l` output into an ordered list of branch names.
///
/// Splits on newlines, trims each line, drops blanks, and strips the leading
/// `* ` marker from the currently checked-out branch.  The remote listing
/// order is preserved, not sorted.
pub fn parse_branches(raw_output: &str) -> Vec<String> {
    raw_output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| line.strip_prefix("* ").unwrap_or(line).to_string())
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_current_branch_marker() {
        let raw = "  develop\n* main\n  release/1.4\n";
        assert_eq!(parse_branches(raw), vec!["develop", "main", "release/1.4"]);
    }

    #[test]
    fn drops_blank_lines_and_preserves_order() {
        let raw = "\n  zeta\n\n  alpha\n   \n";
        assert_eq!(parse_branches(raw), vec!["zeta", "alpha"]);
    }

    #[test]
    fn marker_inside_a_name_is_untouched() {
        let raw = "* main\n  feature/starred-*-thing\n";
        assert_eq!(
            parse_branches(raw),
            vec!["main", "feature/starred-*-thing"]
        );
    }

    #[test]
    fn empty_output_yields_empty_list() {
        assert!(parse_branches("").is_empty());
        assert!(parse_branches("\n\n").is_empty());
    }
}
