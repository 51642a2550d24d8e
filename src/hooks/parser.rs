//! Static reader for hook scripts.
//!
//! Hook scripts are never executed. Their declarative fields are literals
//! assigned at the top level of the script and are read as such; a field
//! assigned anything but a literal is rejected.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::hooks::HookError;

/// A literal value as written in a hook script.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Literal>),
    Tuple(Vec<Literal>),
}

impl Literal {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Literal::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Elements of a list or tuple.
    pub fn items(&self) -> Option<&[Literal]> {
        match self {
            Literal::List(items) | Literal::Tuple(items) => Some(items),
            _ => None,
        }
    }
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_trivia(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() || c == '\\' {
                self.bump();
            } else if c == '#' {
                while !matches!(self.peek(), None | Some('\n')) {
                    self.bump();
                }
            } else {
                break;
            }
        }
    }

    fn expect_end(&mut self) -> Result<(), String> {
        self.skip_trivia();
        match self.peek() {
            None => Ok(()),
            Some(c) => Err(format!("unexpected `{}` after value", c)),
        }
    }

    fn value(&mut self) -> Result<Literal, String> {
        self.skip_trivia();
        match self.peek() {
            None => Err("unexpected end of input".into()),
            Some('[') => {
                self.bump();
                let (items, _) = self.sequence(']')?;
                Ok(Literal::List(items))
            }
            Some('(') => {
                self.bump();
                let (mut items, trailing_comma) = self.sequence(')')?;
                if items.len() == 1 && !trailing_comma {
                    Ok(items.remove(0))
                } else {
                    Ok(Literal::Tuple(items))
                }
            }
            Some('\'' | '"') => self.string(false),
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' => self.number(),
            Some(c) if c.is_alphabetic() || c == '_' => {
                let ident = self.ident();
                match ident.as_str() {
                    "True" => Ok(Literal::Bool(true)),
                    "False" => Ok(Literal::Bool(false)),
                    "None" => Ok(Literal::None),
                    "r" | "R" if matches!(self.peek(), Some('\'' | '"')) => self.string(true),
                    "u" | "U" if matches!(self.peek(), Some('\'' | '"')) => self.string(false),
                    _ => Err(format!("`{}` is not a literal", ident)),
                }
            }
            Some(c) => Err(format!("unexpected `{}`", c)),
        }
    }

    /// Comma-separated values up to `close`; also reports a trailing comma.
    fn sequence(&mut self, close: char) -> Result<(Vec<Literal>, bool), String> {
        let mut items = Vec::new();
        let mut trailing_comma = false;
        loop {
            self.skip_trivia();
            if self.peek() == Some(close) {
                self.bump();
                return Ok((items, trailing_comma));
            }
            items.push(self.value()?);
            trailing_comma = false;
            self.skip_trivia();
            match self.bump() {
                Some(',') => trailing_comma = true,
                Some(c) if c == close => return Ok((items, trailing_comma)),
                Some(c) => return Err(format!("expected `,` or `{}`, found `{}`", close, c)),
                None => return Err(format!("missing `{}`", close)),
            }
        }
    }

    fn ident(&mut self) -> String {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.bump();
        }
        self.src[start..self.pos].to_string()
    }

    fn number(&mut self) -> Result<Literal, String> {
        let start = self.pos;
        if matches!(self.peek(), Some('-' | '+')) {
            self.bump();
        }
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '.' || c == '_') {
            self.bump();
        }
        let text = self.src[start..self.pos].replace('_', "");
        if let Ok(int) = text.parse::<i64>() {
            return Ok(Literal::Int(int));
        }
        text.parse::<f64>()
            .map(Literal::Float)
            .map_err(|_| format!("invalid number `{}`", text))
    }

    /// A quoted string; adjacent strings are concatenated.
    fn string(&mut self, raw: bool) -> Result<Literal, String> {
        let mut out = String::new();
        let mut raw = raw;
        loop {
            let Some(quote) = self.bump() else {
                return Err("unterminated string".into());
            };
            loop {
                match self.bump() {
                    None | Some('\n') => return Err("unterminated string".into()),
                    Some(c) if c == quote => break,
                    Some('\\') if !raw => match self.bump() {
                        Some('n') => out.push('\n'),
                        Some('t') => out.push('\t'),
                        Some('\\') => out.push('\\'),
                        Some('\'') => out.push('\''),
                        Some('"') => out.push('"'),
                        Some(c) => {
                            out.push('\\');
                            out.push(c);
                        }
                        None => return Err("unterminated string".into()),
                    },
                    Some(c) => out.push(c),
                }
            }

            let save = self.pos;
            self.skip_trivia();
            match self.peek() {
                Some('\'' | '"') => raw = false,
                Some('r' | 'R')
                    if matches!(self.src[self.pos + 1..].chars().next(), Some('\'' | '"')) =>
                {
                    self.bump();
                    raw = true;
                }
                _ => {
                    self.pos = save;
                    return Ok(Literal::Str(out));
                }
            }
        }
    }
}

/// Parse a single literal.
pub fn parse_literal(text: &str) -> Result<Literal, String> {
    let mut parser = Parser { src: text, pos: 0 };
    let value = parser.value()?;
    parser.expect_end()?;
    Ok(value)
}

/// Net bracket depth of a line, ignoring strings and comments.
fn bracket_depth(text: &str) -> i32 {
    let mut depth = 0;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in text.chars() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '#' => break,
            '\'' | '"' => quote = Some(c),
            '[' | '(' | '{' => depth += 1,
            ']' | ')' | '}' => depth -= 1,
            _ => {}
        }
    }
    depth
}

/// Source text assigned to `field` at the top level, if any. The last
/// assignment wins.
pub fn assignment_source(source: &str, field: &str) -> Option<String> {
    let lines: Vec<&str> = source.lines().collect();
    let mut found = None;
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        i += 1;
        let Some(rest) = line.strip_prefix(field) else {
            continue;
        };
        let rest = rest.trim_start();
        let Some(value) = rest.strip_prefix('=') else {
            continue;
        };
        if value.starts_with('=') {
            continue;
        }

        let mut text = value.to_string();
        let mut depth = bracket_depth(value);
        while depth > 0 && i < lines.len() {
            text.push('\n');
            text.push_str(lines[i]);
            depth += bracket_depth(lines[i]);
            i += 1;
        }
        found = Some(text);
    }
    found
}

/// Declarations read from one hook script.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StaticHook {
    pub path: PathBuf,
    pub hiddenimports: Option<Vec<String>>,
    pub excludedimports: Option<Vec<String>>,
    /// `(source glob, destination directory)` pairs
    pub datas: Option<Vec<(String, String)>>,
    pub binaries: Option<Vec<(String, String)>>,
    pub attrs: Option<Vec<(String, Literal)>>,
    /// The script defines `hook(hook_api)`
    pub has_hook_function: bool,
}

impl StaticHook {
    /// Read and parse the hook script at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read hook {}", path.display()))?;
        Ok(StaticHook::parse(path, &source)?)
    }

    pub fn parse(path: &Path, source: &str) -> Result<Self, HookError> {
        let field = |name: &'static str| -> Result<Option<Literal>, HookError> {
            assignment_source(source, name)
                .map(|text| {
                    parse_literal(&text).map_err(|message| HookError::Literal {
                        path: path.to_path_buf(),
                        field: name,
                        message,
                    })
                })
                .transpose()
        };

        Ok(StaticHook {
            path: path.to_path_buf(),
            hiddenimports: field("hiddenimports")?
                .map(|v| string_list(path, "hiddenimports", &v))
                .transpose()?,
            excludedimports: field("excludedimports")?
                .map(|v| string_list(path, "excludedimports", &v))
                .transpose()?,
            datas: field("datas")?
                .map(|v| pair_list(path, "datas", &v))
                .transpose()?,
            binaries: field("binaries")?
                .map(|v| pair_list(path, "binaries", &v))
                .transpose()?,
            attrs: field("attrs")?
                .map(|v| attr_list(path, &v))
                .transpose()?,
            has_hook_function: source
                .lines()
                .any(|l| l.starts_with("def hook(") || l.starts_with("def hook (")),
        })
    }
}

fn shape_error(path: &Path, field: &'static str, expected: &str) -> HookError {
    HookError::Literal {
        path: path.to_path_buf(),
        field,
        message: format!("expected {}", expected),
    }
}

/// Parse a string list such as `excludedimports`.
pub fn string_list(
    path: &Path,
    field: &'static str,
    value: &Literal,
) -> Result<Vec<String>, HookError> {
    let items = value
        .items()
        .ok_or_else(|| shape_error(path, field, "a list of strings"))?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| shape_error(path, field, "a list of strings"))
        })
        .collect()
}

fn pair_list(
    path: &Path,
    field: &'static str,
    value: &Literal,
) -> Result<Vec<(String, String)>, HookError> {
    let expected = "a list of (source, destination) pairs";
    let items = value.items().ok_or_else(|| shape_error(path, field, expected))?;
    items
        .iter()
        .map(|item| match item.items() {
            Some([Literal::Str(src), Literal::Str(dest)]) => Ok((src.clone(), dest.clone())),
            _ => Err(shape_error(path, field, expected)),
        })
        .collect()
}

fn attr_list(path: &Path, value: &Literal) -> Result<Vec<(String, Literal)>, HookError> {
    let expected = "a list of (name, value) pairs";
    let items = value.items().ok_or_else(|| shape_error(path, "attrs", expected))?;
    items
        .iter()
        .map(|item| match item.items() {
            Some([Literal::Str(name), value]) => Ok((name.clone(), value.clone())),
            _ => Err(shape_error(path, "attrs", expected)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_literals() {
        assert_eq!(parse_literal("None").unwrap(), Literal::None);
        assert_eq!(parse_literal("-3").unwrap(), Literal::Int(-3));
        assert_eq!(parse_literal("'a' \"b\"").unwrap(), Literal::Str("ab".into()));
        assert_eq!(parse_literal(r"r'C:\dir'").unwrap(), Literal::Str(r"C:\dir".into()));
        assert_eq!(
            parse_literal("('x',)").unwrap(),
            Literal::Tuple(vec![Literal::Str("x".into())])
        );
        assert_eq!(parse_literal("('x')").unwrap(), Literal::Str("x".into()));
        assert_eq!(
            parse_literal("[1, 2.5, True,]").unwrap(),
            Literal::List(vec![Literal::Int(1), Literal::Float(2.5), Literal::Bool(true)])
        );
        assert!(parse_literal("collect_submodules('x')").is_err());
        assert!(parse_literal("['a'").is_err());
    }

    #[test]
    fn test_parse_hook_script() {
        let source = r#"
# Hook for foo.
import os

hiddenimports = [
    'foo._speedups',  # C accelerator
    "foo.compat",
]
excludedimports = ['tkinter']
datas = [('data/*.json', 'foo/data')]
attrs = [('__version__', '1.0'), ('DEBUG', False)]

def hook(hook_api):
    hidden = ['ignored = []']
"#;
        let hook = StaticHook::parse(Path::new("hook-foo.py"), source).unwrap();
        assert_eq!(
            hook.hiddenimports.as_deref(),
            Some(&["foo._speedups".to_string(), "foo.compat".to_string()][..])
        );
        assert_eq!(hook.excludedimports, Some(vec!["tkinter".to_string()]));
        assert_eq!(
            hook.datas,
            Some(vec![("data/*.json".to_string(), "foo/data".to_string())])
        );
        assert!(hook.binaries.is_none());
        assert_eq!(hook.attrs.as_ref().map(Vec::len), Some(2));
        assert!(hook.has_hook_function);
    }

    #[test]
    fn test_non_literal_field_is_rejected() {
        let source = "hiddenimports = collect_submodules('foo')\n";
        let err = StaticHook::parse(Path::new("hook-foo.py"), source).unwrap_err();
        assert!(matches!(err, HookError::Literal { field: "hiddenimports", .. }));
    }

    #[test]
    fn test_assignment_source_ignores_comparisons_and_indented_lines() {
        let source = "if datas == []:\n    datas = ['x']\ndatas = []\n";
        assert_eq!(assignment_source(source, "datas").as_deref(), Some(" []"));
        assert!(assignment_source("binaries_extra = 1\n", "binaries").is_none());
    }
}
