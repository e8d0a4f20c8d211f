//! Recursive-descent parser for field paths and path expressions.
//!
//! Accepted syntaxes, auto-normalized to one step list:
//!
//! 1. Dot path: `a.b.c` (equivalent to `{.a.b.c}`)
//! 2. Delimited expression: `{.a[0].b[*].c[1:3][?(@.kind=='Ready')]}`

use serde_json::Value;

use super::PathError;

/// One step of a parsed path.
#[derive(Clone, Debug, PartialEq)]
pub enum Step {
    /// `.name` - member access.
    Child(String),
    /// `[i]` - sequence index.
    Index(usize),
    /// `[i:j]` - half-open sequence range; either bound may be omitted.
    Range(Option<usize>, Option<usize>),
    /// `[*]` - all elements of a sequence, or all values of a mapping.
    Wildcard,
    /// `[?(@.path==literal)]` - keep matching elements.
    Filter(FilterPred),
}

/// Comparison operator inside a filter predicate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
}

/// Filter predicate: compare `@.path` against a literal.
#[derive(Clone, Debug, PartialEq)]
pub struct FilterPred {
    path: Vec<String>,
    op: FilterOp,
    literal: Value,
}

impl FilterPred {
    /// True when `item` carries the predicate path and the comparison holds.
    /// A missing path never matches, for either operator.
    #[must_use]
    pub fn matches(&self, item: &Value) -> bool {
        let mut node = item;
        for seg in &self.path {
            match node {
                Value::Object(map) => match map.get(seg.as_str()) {
                    Some(v) => node = v,
                    None => return false,
                },
                _ => return false,
            }
        }
        let equal = literal_eq(node, &self.literal);
        match self.op {
            FilterOp::Eq => equal,
            FilterOp::Ne => !equal,
        }
    }
}

// Numbers compare numerically so `3 == 3.0` inside a predicate.
fn literal_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// A parsed, reusable field query.
#[derive(Clone, Debug, PartialEq)]
pub struct PathQuery {
    source: String,
    steps: Vec<Step>,
}

impl PathQuery {
    /// Parses either accepted syntax into a step list.
    pub fn parse(path: &str) -> Result<Self, PathError> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Err(PathError::Empty);
        }

        let body: String = if let Some(rest) = trimmed.strip_prefix('{') {
            let inner = rest.strip_suffix('}').ok_or_else(|| PathError::Delimiter {
                path: trimmed.to_string(),
            })?;
            inner.trim().to_string()
        } else {
            if trimmed.contains('}') {
                return Err(PathError::Delimiter {
                    path: trimmed.to_string(),
                });
            }
            // Normalize `a.b.c` to the expression form `.a.b.c`.
            format!(".{trimmed}")
        };
        if body.is_empty() {
            return Err(PathError::Empty);
        }

        let steps = Scanner::new(&body).run()?;
        if steps.is_empty() {
            return Err(PathError::Empty);
        }
        Ok(Self {
            source: trimmed.to_string(),
            steps,
        })
    }

    /// Original path string as written in config.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Parsed steps in application order.
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }
}

struct Scanner<'a> {
    chars: Vec<char>,
    pos: usize,
    _src: &'a str,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            chars: src.chars().collect(),
            pos: 0,
            _src: src,
        }
    }

    fn run(mut self) -> Result<Vec<Step>, PathError> {
        let mut steps = Vec::new();
        while self.pos < self.chars.len() {
            match self.chars[self.pos] {
                '.' => {
                    self.pos += 1;
                    steps.push(self.child()?);
                }
                '[' => {
                    self.pos += 1;
                    steps.push(self.selector()?);
                }
                other => {
                    return Err(PathError::Step {
                        pos: self.pos,
                        found: other,
                    });
                }
            }
        }
        Ok(steps)
    }

    fn child(&mut self) -> Result<Step, PathError> {
        let start = self.pos;
        let mut name = String::new();
        while self.pos < self.chars.len() {
            let c = self.chars[self.pos];
            if c == '.' || c == '[' {
                break;
            }
            if c == '{' || c == '}' || c == ']' {
                return Err(PathError::Step {
                    pos: self.pos,
                    found: c,
                });
            }
            name.push(c);
            self.pos += 1;
        }
        if name.is_empty() {
            return Err(PathError::EmptySegment { pos: start });
        }
        Ok(Step::Child(name))
    }

    fn selector(&mut self) -> Result<Step, PathError> {
        let start = self.pos;
        let mut depth = 1usize;
        let mut quote: Option<char> = None;
        let mut body = String::new();
        while self.pos < self.chars.len() {
            let c = self.chars[self.pos];
            self.pos += 1;
            match quote {
                Some(q) if c == q => quote = None,
                Some(_) => {}
                None if c == '\'' || c == '"' => quote = Some(c),
                None if c == '[' => depth += 1,
                None if c == ']' => {
                    depth -= 1;
                    if depth == 0 {
                        return parse_selector(body.trim(), start);
                    }
                }
                None => {}
            }
            if depth > 0 {
                body.push(c);
            }
        }
        Err(PathError::UnterminatedSelector { pos: start })
    }
}

fn parse_selector(body: &str, pos: usize) -> Result<Step, PathError> {
    if body == "*" {
        return Ok(Step::Wildcard);
    }
    if let Some(inner) = body.strip_prefix("?(").and_then(|s| s.strip_suffix(')')) {
        return parse_filter(inner.trim(), pos);
    }
    if let Some(name) = quoted(body) {
        return Ok(Step::Child(name));
    }
    if let Some((lo, hi)) = body.split_once(':') {
        let parse_bound = |s: &str| -> Result<Option<usize>, PathError> {
            let s = s.trim();
            if s.is_empty() {
                return Ok(None);
            }
            s.parse::<usize>().map(Some).map_err(|_| PathError::Range {
                pos,
                token: body.to_string(),
            })
        };
        let lo = parse_bound(lo)?;
        let hi = parse_bound(hi)?;
        if let (Some(lo), Some(hi)) = (lo, hi) {
            if lo > hi {
                return Err(PathError::Range {
                    pos,
                    token: body.to_string(),
                });
            }
        }
        return Ok(Step::Range(lo, hi));
    }
    body.parse::<usize>()
        .map(Step::Index)
        .map_err(|_| PathError::Index {
            pos,
            token: body.to_string(),
        })
}

fn parse_filter(body: &str, pos: usize) -> Result<Step, PathError> {
    let rest = body.strip_prefix('@').ok_or_else(|| PathError::Filter {
        pos,
        message: "predicate must start with '@'".to_string(),
    })?;

    let (op, idx) = if let Some(idx) = rest.find("==") {
        (FilterOp::Eq, idx)
    } else if let Some(idx) = rest.find("!=") {
        (FilterOp::Ne, idx)
    } else {
        return Err(PathError::Filter {
            pos,
            message: "expected '==' or '!=' comparison".to_string(),
        });
    };

    let (path_part, lit_part) = rest.split_at(idx);
    let lit_part = &lit_part[2..];

    let mut segs = Vec::new();
    for seg in path_part.trim().split('.') {
        if seg.is_empty() {
            continue;
        }
        segs.push(seg.trim().to_string());
    }
    if segs.is_empty() {
        return Err(PathError::Filter {
            pos,
            message: "predicate path is empty".to_string(),
        });
    }

    let literal = parse_literal(lit_part.trim()).ok_or_else(|| PathError::Filter {
        pos,
        message: format!("unparsable literal {:?}", lit_part.trim()),
    })?;

    Ok(Step::Filter(FilterPred {
        path: segs,
        op,
        literal,
    }))
}

fn quoted(body: &str) -> Option<String> {
    let body = body.trim();
    for q in ['\'', '"'] {
        if body.len() >= 2 && body.starts_with(q) && body.ends_with(q) {
            return Some(body[1..body.len() - 1].to_string());
        }
    }
    None
}

fn parse_literal(token: &str) -> Option<Value> {
    if let Some(s) = quoted(token) {
        return Some(Value::String(s));
    }
    match token {
        "true" => return Some(Value::Bool(true)),
        "false" => return Some(Value::Bool(false)),
        "null" => return Some(Value::Null),
        _ => {}
    }
    if let Ok(i) = token.parse::<i64>() {
        return Some(Value::Number(i.into()));
    }
    if let Ok(f) = token.parse::<f64>() {
        return serde_json::Number::from_f64(f).map(Value::Number);
    }
    None
}
