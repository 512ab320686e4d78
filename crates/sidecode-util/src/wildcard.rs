//! Wildcard pattern matching for policy rules.
//!
//! `*` matches any run of characters (including none). Everything else is
//! literal. A trailing `" *"` also matches the bare prefix, so `git push *`
//! covers `git push` as well as `git push origin main`.

/// Match `text` against a wildcard `pattern`.
///
/// ```
/// use sidecode_util::wildcard::matches;
///
/// assert!(matches("git *", "git status"));
/// assert!(matches("git push *", "git push"));
/// assert!(matches("*", "anything"));
/// assert!(!matches("echo *", "cat file"));
/// ```
pub fn matches(pattern: &str, text: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix(" *") {
        if text == prefix {
            return true;
        }
    }

    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    // Greedy scan with backtracking to the last star.
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<usize> = None;
    let mut mark = 0;

    while ti < t.len() {
        if pi < p.len() && p[pi] != '*' && p[pi] == t[ti] {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            mark = ti;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            mark += 1;
            ti = mark;
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|&c| c == '*')
}

/// Specificity score of a pattern. More literal characters rank higher.
pub fn specificity(pattern: &str) -> u32 {
    let literal = pattern.chars().filter(|&c| c != '*').count() as u32;
    let stars = pattern.chars().filter(|&c| c == '*').count() as u32;
    (literal * 100).saturating_sub(stars * 10)
}

/// The most specific pattern that matches `text`, if any.
pub fn find_most_specific_match<'a, I>(patterns: I, text: &str) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    patterns
        .into_iter()
        .filter(|p| matches(p, text))
        .max_by_key(|p| specificity(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal() {
        assert!(matches("ls", "ls"));
        assert!(!matches("ls", "lsof"));
    }

    #[test]
    fn test_star_positions() {
        assert!(matches("*.rs", "main.rs"));
        assert!(matches("cargo * --release", "cargo build --release"));
        assert!(!matches("cargo * --release", "cargo build"));
        assert!(matches("**", ""));
    }

    #[test]
    fn test_trailing_star_matches_bare_command() {
        assert!(matches("rm *", "rm"));
        assert!(matches("rm *", "rm file.txt"));
        assert!(!matches("rm *", "rmdir x"));
    }

    #[test]
    fn test_backtracking() {
        assert!(matches("a*b*c", "aXbYbZc"));
        assert!(!matches("a*b*c", "aXbYbZ"));
    }

    #[test]
    fn test_most_specific() {
        let patterns = ["git *", "git push *", "*"];
        assert_eq!(
            find_most_specific_match(patterns, "git push origin"),
            Some("git push *")
        );
        assert_eq!(find_most_specific_match(patterns, "ls"), Some("*"));
        assert_eq!(find_most_specific_match(["git *"], "ls"), None);
    }
}
