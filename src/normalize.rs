//! math delimiter normalization for streamed markdown.
//!
//! hosted models emit latex math as `\[ ... \]` (block) and `\( ... \)`
//! (inline); markdown math renderers want `$$ ... $$` and `$ ... $`. this
//! rewrites the former into the latter before the buffer reaches the
//! renderer. spans may contain newlines; matching is non-greedy and
//! left-to-right, first-match-wins, no nesting or escape handling.

use regex::{Captures, Regex};
use std::sync::LazyLock;

static BLOCK_MATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\\\[(.*?)\\\]").expect("block math regex"));

static INLINE_MATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\\\((.*?)\\\)").expect("inline math regex"));

/// rewrite provider-style math delimiters into dollar delimiters.
///
/// total and pure: text without delimiters (including already-normalized
/// text) comes back unchanged.
pub fn normalize_math_delimiters(text: &str) -> String {
    let block = BLOCK_MATH.replace_all(text, |c: &Captures| format!("$${}$$", &c[1]));
    INLINE_MATH
        .replace_all(&block, |c: &Captures| format!("${}$", &c[1]))
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::normalize_math_delimiters;
    use pretty_assertions::assert_eq;

    #[test]
    fn block_math_becomes_double_dollar() {
        assert_eq!(
            normalize_math_delimiters(r"the identity \[e^{i\pi} + 1 = 0\] holds"),
            r"the identity $$e^{i\pi} + 1 = 0$$ holds"
        );
    }

    #[test]
    fn inline_math_becomes_single_dollar() {
        assert_eq!(
            normalize_math_delimiters(r"let \(x\) and \(y\) be reals"),
            r"let $x$ and $y$ be reals"
        );
    }

    #[test]
    fn spans_may_contain_newlines() {
        assert_eq!(
            normalize_math_delimiters("\\[a\n+ b\\]"),
            "$$a\n+ b$$"
        );
        assert_eq!(
            normalize_math_delimiters("\\(a\n+ b\\)"),
            "$a\n+ b$"
        );
    }

    #[test]
    fn mixed_block_and_inline() {
        assert_eq!(
            normalize_math_delimiters(r"\[A\] and \(b\) and \[C\]"),
            r"$$A$$ and $b$ and $$C$$"
        );
    }

    #[test]
    fn replacement_is_non_greedy() {
        assert_eq!(
            normalize_math_delimiters(r"\(a\) text \(b\)"),
            r"$a$ text $b$"
        );
    }

    #[test]
    fn total_on_plain_and_empty_input() {
        assert_eq!(normalize_math_delimiters(""), "");
        assert_eq!(
            normalize_math_delimiters("# heading\nno math here"),
            "# heading\nno math here"
        );
    }

    #[test]
    fn second_pass_is_stable() {
        let once = normalize_math_delimiters(r"inline \(x^2\) and block \[y\]");
        let twice = normalize_math_delimiters(&once);
        assert_eq!(once, twice);
    }
}
