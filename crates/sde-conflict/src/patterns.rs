//! Text-pattern extraction for the heuristic passes
//!
//! Rust, TypeScript/JavaScript and Python are recognized line-by-line. None
//! of this is a parser: declarations split across lines, macros and unusual
//! formatting are simply missed.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};

static JS_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*import\s+(.+?)\s+from\s+['"]([^'"]+)['"]"#).expect("valid regex")
});
static PY_FROM_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*from\s+([\w.]+)\s+import\s+(.+?)\s*$").expect("valid regex"));
static PY_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*import\s+([\w.]+)(\s+as\s+\w+)?\s*$").expect("valid regex"));
static RUST_USE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:pub(?:\([^)]*\))?\s+)?use\s+([^;]+);").expect("valid regex"));

static EXPORT_DECL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(?:export\s+(?:default\s+)?(?:declare\s+)?(?:abstract\s+)?(?:async\s+)?(?:function\*?|class|const|let|var|interface|type|enum)\s+([A-Za-z_$][\w$]*)|pub(?:\([^)]*\))?\s+(?:async\s+)?(?:unsafe\s+)?(?:fn|struct|enum|trait|const|static|type|mod|union)\s+([A-Za-z_]\w*))",
    )
    .expect("valid regex")
});
static ANY_DECL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:fn|function|class|struct|enum|trait|interface|type|const|let|var|static|mod|def)\s+([A-Za-z_$][\w$]*)",
    )
    .expect("valid regex")
});
static FN_SIGNATURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:fn|function|def)\s+([A-Za-z_$][\w$]*)\s*(?:<[^>(]*>)?\s*\(([^)]*)\)")
        .expect("valid regex")
});
static TYPE_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:interface|struct)\s+([A-Za-z_$][\w$]*)[^{;(]*\{|\btype\s+([A-Za-z_$][\w$]*)\s*=\s*\{")
        .expect("valid regex")
});
static FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:readonly\s+)?([A-Za-z_$][\w$]*)\s*(\?)?\s*:")
        .expect("valid regex")
});
static STATE_MUTATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\bthis\.state|(?:^|[^.\w$])state)\.[A-Za-z_$][\w$]*(?:\.[\w$]+|\[[^\]]*\])*\s*=[^=]")
        .expect("valid regex")
});
static STRUCTURAL_STATEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(?:export\s+|pub(?:\([^)]*\))?\s+)?(?:default\s+)?(?:async\s+)?(?:import|use|from\s+\S+\s+import|function|class|interface|fn|struct|enum|trait|def|export)\b",
    )
    .expect("valid regex")
});

/// One import statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportDecl {
    /// Module the import pulls from
    pub module: String,
    /// What is imported, whitespace-normalized
    pub clause: String,
    /// 0-based line index within the scanned text
    pub line: usize,
}

fn squash(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Import statements in `text`
#[must_use]
pub fn imports(text: &str) -> Vec<ImportDecl> {
    let mut out = Vec::new();
    for (line, raw) in text.lines().enumerate() {
        if let Some(caps) = JS_IMPORT.captures(raw) {
            out.push(ImportDecl {
                module: caps[2].to_string(),
                clause: squash(&caps[1]),
                line,
            });
        } else if let Some(caps) = PY_FROM_IMPORT.captures(raw) {
            out.push(ImportDecl {
                module: caps[1].to_string(),
                clause: squash(&caps[2]),
                line,
            });
        } else if let Some(caps) = PY_IMPORT.captures(raw) {
            out.push(ImportDecl {
                module: caps[1].to_string(),
                clause: squash(caps.get(2).map_or("", |m| m.as_str())),
                line,
            });
        } else if let Some(caps) = RUST_USE.captures(raw) {
            let raw_path = caps[1].trim();
            let (module, clause) = if let Some(idx) = raw_path.find('{') {
                (
                    squash(raw_path[..idx].trim_end_matches([':', ' '])),
                    squash(&raw_path[idx..]),
                )
            } else if let Some((path, alias)) = raw_path.split_once(" as ") {
                (squash(path), format!("as{}", squash(alias)))
            } else {
                (squash(raw_path), String::new())
            };
            out.push(ImportDecl {
                module,
                clause,
                line,
            });
        }
    }
    out
}

/// Names declared as exported (`export …` / `pub …`)
#[must_use]
pub fn exported_names(text: &str) -> BTreeSet<String> {
    text.lines()
        .filter_map(|line| EXPORT_DECL.captures(line))
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Names declared with any visibility
#[must_use]
pub fn declared_names(text: &str) -> BTreeSet<String> {
    ANY_DECL
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// 1-based line numbers in `text` that mention `name` as a whole word
#[must_use]
pub fn references(text: &str, name: &str) -> Vec<usize> {
    let Ok(word) = Regex::new(&format!(r"(?:^|[^\w$]){}(?:[^\w$]|$)", regex::escape(name))) else {
        return Vec::new();
    };
    text.lines()
        .enumerate()
        .filter(|(_, line)| word.is_match(line))
        .map(|(i, _)| i + 1)
        .collect()
}

/// Function parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    /// Parameter name
    pub name: String,
    /// Callers may omit it
    pub optional: bool,
}

fn split_top_level(list: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in list.char_indices() {
        match c {
            '<' | '(' | '[' | '{' => depth += 1,
            '>' | ')' | ']' | '}' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&list[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&list[start..]);
    parts
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

fn parse_param(raw: &str) -> Option<Param> {
    let trimmed = raw.trim_start_matches("mut ").trim();
    if matches!(trimmed, "self" | "&self" | "&mut self" | "mut self" | "cls") {
        return None;
    }
    let rest = trimmed.trim_start_matches(['.', '*']);
    let name: String = rest
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '$')
        .collect();
    if name.is_empty() {
        return None;
    }
    let after_name = rest[name.len()..].trim_start();
    let optional = after_name.starts_with('?')
        || trimmed.contains('=')
        || trimmed.starts_with("...")
        || trimmed.starts_with('*');
    Some(Param { name, optional })
}

/// Function signatures keyed by name (last declaration wins)
#[must_use]
pub fn functions(text: &str) -> BTreeMap<String, Vec<Param>> {
    FN_SIGNATURE
        .captures_iter(text)
        .map(|caps| {
            let params = split_top_level(&caps[2])
                .into_iter()
                .filter_map(parse_param)
                .collect();
            (caps[1].to_string(), params)
        })
        .collect()
}

/// Field of a struct/interface/object type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Field name
    pub name: String,
    /// Declared without `?`
    pub required: bool,
}

fn block_body(text: &str, open: usize) -> &str {
    let mut depth = 0usize;
    for (offset, c) in text[open..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return &text[open + 1..open + offset];
                }
            }
            _ => {}
        }
    }
    &text[open + 1..]
}

/// Struct/interface/object-type declarations with their top-level fields
#[must_use]
pub fn type_shapes(text: &str) -> BTreeMap<String, Vec<Field>> {
    let mut shapes = BTreeMap::new();
    for caps in TYPE_HEADER.captures_iter(text) {
        let Some(name) = caps.get(1).or_else(|| caps.get(2)) else {
            continue;
        };
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let body = block_body(text, whole.end() - 1);
        let mut depth = 0i32;
        let mut segment = String::new();
        let mut segments = Vec::new();
        let mut prev = '\0';
        for c in body.chars() {
            match c {
                '{' | '(' | '<' | '[' => depth += 1,
                // `=>` and `->` are arrows, not closing brackets
                '>' if matches!(prev, '=' | '-') => {}
                '}' | ')' | '>' | ']' => depth -= 1,
                _ => {}
            }
            prev = c;
            if depth == 0 && matches!(c, '\n' | ',' | ';') {
                segments.push(std::mem::take(&mut segment));
            } else {
                segment.push(c);
            }
        }
        segments.push(segment);
        let fields = segments
            .iter()
            .filter_map(|seg| FIELD.captures(seg))
            .map(|f| Field {
                name: f[1].to_string(),
                required: f.get(2).is_none(),
            })
            .collect();
        shapes.insert(name.as_str().to_string(), fields);
    }
    shapes
}

/// 1-based lines that assign to held state directly
#[must_use]
pub fn state_mutations(text: &str) -> Vec<usize> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| STATE_MUTATION.is_match(line))
        .map(|(i, _)| i + 1)
        .collect()
}

/// Whether `line` is an import/export/function/class/interface-like statement
#[must_use]
pub fn is_structural_statement(line: &str) -> bool {
    STRUCTURAL_STATEMENT.is_match(line)
}
