//! Heuristic bracket-balance scanning
//!
//! This is not a parser. It counts `()`, `[]` and `{}` while skipping string
//! literals (`'`, `"`, `` ` `` with backslash escapes), `//` line comments and
//! `/* */` block comments, and it tries not to mistake Rust lifetimes for
//! character literals. Good enough to notice a chunk or an edit that leaves
//! code structurally broken; it will miss plenty of real syntax errors.

/// Result of scanning a piece of text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalanceReport {
    /// Opening brackets seen outside literals and comments
    pub opens: usize,
    /// Closing brackets seen outside literals and comments
    pub closes: usize,
    /// Brackets still open at the end, innermost last
    pub unclosed: Vec<char>,
    /// Closers that did not match the innermost open bracket
    pub mismatched: usize,
    /// Quote character of a literal still open at the end
    pub open_literal: Option<char>,
    /// A block comment is still open at the end
    pub open_block_comment: bool,
}

impl BalanceReport {
    /// `opens - closes`
    #[inline]
    #[must_use]
    pub fn net(&self) -> isize {
        self.opens as isize - self.closes as isize
    }

    /// Exact structural balance
    #[inline]
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        self.unclosed.is_empty()
            && self.mismatched == 0
            && self.open_literal.is_none()
            && !self.open_block_comment
    }

    /// Lenient check used on incomplete content
    #[inline]
    #[must_use]
    pub fn within_tolerance(&self, tolerance: usize) -> bool {
        self.net().unsigned_abs() <= tolerance
    }

    /// One-line description of what is wrong, if anything
    #[must_use]
    pub fn describe(&self) -> Option<String> {
        if self.is_balanced() {
            return None;
        }
        let mut parts = Vec::new();
        if !self.unclosed.is_empty() {
            let open: String = self.unclosed.iter().collect();
            parts.push(format!("unclosed '{open}'"));
        }
        if self.mismatched > 0 {
            parts.push(format!("{} unmatched closer(s)", self.mismatched));
        }
        if let Some(quote) = self.open_literal {
            parts.push(format!("unterminated {quote} literal"));
        }
        if self.open_block_comment {
            parts.push("unterminated block comment".to_string());
        }
        Some(parts.join(", "))
    }
}

fn closer_for(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

fn is_ident(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Whether the `'` at `i` starts a Rust lifetime rather than a literal
fn is_lifetime(chars: &[char], i: usize) -> bool {
    let run_end = chars[i + 1..]
        .iter()
        .position(|&c| !is_ident(c))
        .map_or(chars.len(), |p| i + 1 + p);
    if run_end == i + 1 {
        return false;
    }
    let next = chars.get(run_end).copied();
    if next == Some('\'') {
        return false;
    }
    let prev = chars[..i].iter().rev().find(|c| !c.is_whitespace()).copied();
    match prev {
        Some('<' | '&' | '+') => true,
        Some(',') => matches!(next, Some('>' | ',')),
        _ => false,
    }
}

/// Scan `text` for bracket balance
#[must_use]
pub fn scan(text: &str) -> BalanceReport {
    let chars: Vec<char> = text.chars().collect();
    let mut report = BalanceReport::default();
    let mut stack: Vec<char> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                loop {
                    if i >= chars.len() {
                        report.open_block_comment = true;
                        break;
                    }
                    if chars[i] == '*' && chars.get(i + 1) == Some(&'/') {
                        i += 2;
                        break;
                    }
                    i += 1;
                }
                continue;
            }
            '\'' if is_lifetime(&chars, i) => {}
            '"' | '\'' | '`' => {
                let quote = c;
                i += 1;
                loop {
                    match chars.get(i) {
                        None => {
                            report.open_literal = Some(quote);
                            break;
                        }
                        Some('\\') => i += 2,
                        Some(&q) if q == quote => break,
                        Some(_) => i += 1,
                    }
                }
            }
            '(' | '[' | '{' => {
                report.opens += 1;
                stack.push(c);
            }
            ')' | ']' | '}' => {
                report.closes += 1;
                match stack.last() {
                    Some(&open) if closer_for(open) == c => {
                        stack.pop();
                    }
                    _ => report.mismatched += 1,
                }
            }
            _ => {}
        }
        i += 1;
    }

    report.unclosed = stack;
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_code() {
        let report = scan("fn main() { let v = vec![1, 2]; }");
        assert!(report.is_balanced());
        assert_eq!(report.opens, 3);
        assert_eq!(report.net(), 0);
    }

    #[test]
    fn brackets_in_literals_ignored() {
        assert!(scan(r#"let s = "{ ( [";"#).is_balanced());
        assert!(scan("let c = '{';").is_balanced());
        assert!(scan("const t = `${a} {`;").is_balanced());
        assert!(scan(r#"let s = "escaped \" {";"#).is_balanced());
    }

    #[test]
    fn brackets_in_comments_ignored() {
        assert!(scan("// {\nfn a() {}").is_balanced());
        assert!(scan("/* ( */ fn a() {}").is_balanced());
    }

    #[test]
    fn lifetimes_are_not_literals() {
        assert!(scan("fn f<'a>(x: &'a str) -> &'static str { x }").is_balanced());
        assert!(scan("struct S<'a, 'b> { a: &'a u8, b: &'b u8 }").is_balanced());
    }

    #[test]
    fn js_single_quoted_strings() {
        assert!(scan("call(a, 'hello { world')").is_balanced());
        assert!(scan("const xs = ['x', 'y'];").is_balanced());
    }

    #[test]
    fn partial_content_within_tolerance() {
        let report = scan("fn a() {\n    if x {\n");
        assert!(!report.is_balanced());
        assert_eq!(report.unclosed, vec!['{', '{']);
        assert!(report.within_tolerance(3));
        assert!(!scan("{{{{").within_tolerance(3));
    }

    #[test]
    fn mismatched_closer_reported() {
        let report = scan("fn a() { ) }");
        assert_eq!(report.mismatched, 1);
        assert!(report.describe().unwrap().contains("unmatched"));
    }

    #[test]
    fn unterminated_literal_reported() {
        let report = scan("let s = \"open");
        assert_eq!(report.open_literal, Some('"'));
        assert!(!report.is_balanced());
    }
}
