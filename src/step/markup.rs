//! HTML steps: include directives and whitespace collapsing.
//!
//! An include directive pulls another file into the page, optionally with a
//! JSON object of variables that become available inside the included file:
//!
//! ```html
//! @include('partials/header.html', { "title": "Home", "nav": { "active": "home" } })
//! <h1>@title</h1>  <!-- inside header.html -->
//! <li class="@nav.active">
//! ```
//!
//! Paths resolve relative to the file containing the directive. Includes
//! nest; variables of an outer include stay visible in inner ones unless
//! shadowed.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::task::Asset;

const MAX_DEPTH: usize = 32;

/// Errors that can occur while resolving include directives.
#[derive(Debug, Error)]
pub enum IncludeError {
    #[error("{file}:{line}: malformed include directive, {reason}")]
    Malformed {
        file: Utf8PathBuf,
        line: usize,
        reason: &'static str,
    },

    #[error("{file}:{line}: invalid include context.\n{source}")]
    Context {
        file: Utf8PathBuf,
        line: usize,
        source: serde_json::Error,
    },

    #[error("{file}:{line}: couldn't read included file {path}.\n{source}")]
    Missing {
        file: Utf8PathBuf,
        line: usize,
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("{0} includes itself")]
    Cycle(Utf8PathBuf),

    #[error("{0}: includes nested deeper than {MAX_DEPTH} levels")]
    TooDeep(Utf8PathBuf),

    #[error("{0} is not valid UTF-8")]
    Encoding(Utf8PathBuf),
}

/// Resolve every `<prefix>include(...)` directive in the asset.
pub fn include(asset: Asset, prefix: &str) -> Result<Asset, IncludeError> {
    let text = std::str::from_utf8(&asset.data)
        .map_err(|_| IncludeError::Encoding(asset.source.clone()))?;

    let mut stack = vec![identity(&asset.source)];
    let text = expand(text, &asset.source, prefix, &Map::new(), &mut stack)?;

    Ok(Asset {
        data: text.into_bytes(),
        ..asset
    })
}

/// Collapse insignificant whitespace. Comments, optional closing tags and
/// the `<html>`/`<head>` tags are kept as written.
pub fn collapse_whitespace(asset: Asset) -> Asset {
    let mut cfg = minify_html::Cfg::new();
    cfg.keep_comments = true;
    cfg.keep_closing_tags = true;
    cfg.keep_html_and_head_opening_tags = true;

    let data = minify_html::minify(&asset.data, &cfg);

    Asset { data, ..asset }
}

fn identity(path: &Utf8Path) -> Utf8PathBuf {
    path.canonicalize_utf8().unwrap_or_else(|_| path.to_path_buf())
}

fn line_of(text: &str, offset: usize) -> usize {
    text[..offset].matches('\n').count() + 1
}

fn expand(
    text: &str,
    file: &Utf8Path,
    prefix: &str,
    vars: &Map<String, Value>,
    stack: &mut Vec<Utf8PathBuf>,
) -> Result<String, IncludeError> {
    if stack.len() > MAX_DEPTH {
        return Err(IncludeError::TooDeep(file.to_path_buf()));
    }

    let text = substitute(text, prefix, vars);
    let directive = format!("{prefix}include(");
    let dir = file.parent().unwrap_or(Utf8Path::new(""));

    let mut out = String::with_capacity(text.len());
    let mut rest = text.as_str();
    let mut offset = 0;

    while let Some(found) = rest.find(&directive) {
        out.push_str(&rest[..found]);

        let start = offset + found;
        let line = line_of(&text, start);
        let args = start + directive.len();
        let (target, context, end) = parse_args(&text, args).map_err(|reason| {
            IncludeError::Malformed {
                file: file.to_path_buf(),
                line,
                reason,
            }
        })?;

        let mut scope = vars.clone();
        if let Some(context) = context {
            let context: Map<String, Value> =
                serde_json::from_str(context).map_err(|source| IncludeError::Context {
                    file: file.to_path_buf(),
                    line,
                    source,
                })?;
            scope.extend(context);
        }

        let path = dir.join(&target);
        let included = fs::read_to_string(&path).map_err(|source| IncludeError::Missing {
            file: file.to_path_buf(),
            line,
            path: path.clone(),
            source,
        })?;

        let id = identity(&path);
        if stack.contains(&id) {
            return Err(IncludeError::Cycle(path));
        }

        stack.push(id);
        out.push_str(&expand(&included, &path, prefix, &scope, stack)?);
        stack.pop();

        offset = end;
        rest = &text[end..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Parse `'path'` optionally followed by `, { json }` and the closing paren,
/// starting right after the opening paren. Returns the path, the raw JSON
/// text and the offset just past the closing paren.
fn parse_args(text: &str, start: usize) -> Result<(String, Option<&str>, usize), &'static str> {
    let bytes = text.as_bytes();
    let mut i = skip_ws(bytes, start);

    let quote = match bytes.get(i) {
        Some(q @ (b'\'' | b'"')) => *q,
        _ => return Err("expected a quoted path"),
    };
    i += 1;

    let mut path = String::new();
    loop {
        match bytes.get(i) {
            None => return Err("unterminated path"),
            Some(b'\\') if bytes.get(i + 1) == Some(&quote) => {
                path.push(quote as char);
                i += 2;
            }
            Some(b) if *b == quote => break,
            Some(_) => {
                // push the whole UTF-8 character
                let ch = text[i..].chars().next().ok_or("unterminated path")?;
                path.push(ch);
                i += ch.len_utf8();
            }
        }
    }
    i += 1;

    if path.trim().is_empty() {
        return Err("empty path");
    }

    i = skip_ws(bytes, i);
    let mut context = None;

    if bytes.get(i) == Some(&b',') {
        i = skip_ws(bytes, i + 1);
        if bytes.get(i) != Some(&b'{') {
            return Err("expected a JSON object after the path");
        }
        let end = match_brace(bytes, i).ok_or("unbalanced braces in context")?;
        context = Some(&text[i..=end]);
        i = skip_ws(bytes, end + 1);
    }

    match bytes.get(i) {
        Some(b')') => Ok((path, context, i + 1)),
        _ => Err("expected a closing parenthesis"),
    }
}

fn skip_ws(bytes: &[u8], mut i: usize) -> usize {
    while bytes.get(i).is_some_and(u8::is_ascii_whitespace) {
        i += 1;
    }
    i
}

/// Index of the brace closing the one at `open`, skipping string literals.
fn match_brace(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = None;
    let mut i = open;

    while let Some(&b) = bytes.get(i) {
        match in_string {
            Some(q) => match b {
                b'\\' => i += 1,
                _ if b == q => in_string = None,
                _ => {}
            },
            None => match b {
                b'"' | b'\'' => in_string = Some(b),
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            },
        }
        i += 1;
    }

    None
}

/// Replace `<prefix>name` and `<prefix>a.b` with values from `vars`. Unknown
/// names are left untouched.
fn substitute(text: &str, prefix: &str, vars: &Map<String, Value>) -> String {
    if vars.is_empty() {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(found) = rest.find(prefix) {
        out.push_str(&rest[..found]);
        let after = &rest[found + prefix.len()..];

        let len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '.'))
            .unwrap_or(after.len());
        let name = after[..len].trim_end_matches('.');

        match lookup(vars, name) {
            Some(value) if name != "include" => {
                out.push_str(&render(value));
                rest = &after[name.len()..];
            }
            _ => {
                out.push_str(prefix);
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

fn lookup<'a>(vars: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    if name.is_empty() {
        return None;
    }

    if let Some(value) = vars.get(name) {
        return Some(value);
    }

    let mut parts = name.split('.');
    let mut value = vars.get(parts.next()?)?;
    for part in parts {
        value = value.get(part)?;
    }

    Some(value)
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Project {
        _dir: tempfile::TempDir,
        root: Utf8PathBuf,
    }

    impl Project {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
            Self { _dir: dir, root }
        }

        fn file(&self, path: &str, text: &str) -> Utf8PathBuf {
            let path = self.root.join(path);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, text).unwrap();
            path
        }

        fn page(&self, path: &str, text: &str) -> Asset {
            let source = self.file(path, text);
            Asset {
                source,
                path: Utf8Path::new(path).file_name().unwrap().into(),
                data: text.as_bytes().to_vec(),
            }
        }
    }

    fn html(asset: Asset) -> String {
        String::from_utf8(asset.data).unwrap()
    }

    #[test]
    fn test_plain_include() {
        let p = Project::new();
        p.file("src/parts/header.html", "<header>Top</header>");
        let page = p.page("src/index.html", "@include('parts/header.html')\n<main></main>");

        let out = include(page, "@").unwrap();

        assert_eq!(html(out), "<header>Top</header>\n<main></main>");
    }

    #[test]
    fn test_nested_include_is_relative_to_includer() {
        let p = Project::new();
        p.file("src/parts/icon.svg", "<svg/>");
        p.file("src/parts/nav.html", "<nav>@include(\"icon.svg\")</nav>");
        let page = p.page("src/index.html", "@include('parts/nav.html')");

        let out = include(page, "@").unwrap();

        assert_eq!(html(out), "<nav><svg/></nav>");
    }

    #[test]
    fn test_context_variables() {
        let p = Project::new();
        p.file("src/parts/head.html", "<title>@title</title><body class=\"@page.kind\">@missing");
        let page = p.page(
            "src/about.html",
            r#"@include('parts/head.html', { "title": "About", "page": { "kind": "wide" } })"#,
        );

        let out = include(page, "@").unwrap();

        assert_eq!(
            html(out),
            "<title>About</title><body class=\"wide\">@missing"
        );
    }

    #[test]
    fn test_variables_flow_into_nested_includes() {
        let p = Project::new();
        p.file("src/parts/inner.html", "<b>@name</b>");
        p.file("src/parts/outer.html", "@include('inner.html')");
        let page = p.page("src/index.html", r#"@include('parts/outer.html', {"name": "x"})"#);

        let out = include(page, "@").unwrap();

        assert_eq!(html(out), "<b>x</b>");
    }

    #[test]
    fn test_text_without_directives_is_unchanged() {
        let p = Project::new();
        let text = "<a href=\"mailto:me@example.com\">@handle</a>";
        let page = p.page("src/index.html", text);

        let out = include(page, "@").unwrap();

        assert_eq!(html(out), text);
    }

    #[test]
    fn test_missing_file() {
        let p = Project::new();
        let page = p.page("src/index.html", "<p>\n@include('nope.html')");

        let err = include(page, "@").unwrap_err();

        assert!(matches!(err, IncludeError::Missing { line: 2, .. }));
    }

    #[test]
    fn test_malformed_directive() {
        let p = Project::new();
        let page = p.page("src/index.html", "@include(header.html)");

        let err = include(page, "@").unwrap_err();

        assert!(matches!(err, IncludeError::Malformed { line: 1, .. }));
    }

    #[test]
    fn test_unclosed_directive() {
        let p = Project::new();
        let page = p.page("src/index.html", "@include('a.html'");

        let err = include(page, "@").unwrap_err();

        assert!(matches!(err, IncludeError::Malformed { .. }));
    }

    #[test]
    fn test_invalid_context() {
        let p = Project::new();
        p.file("src/a.html", "");
        let page = p.page("src/index.html", "@include('a.html', { title: 1 })");

        let err = include(page, "@").unwrap_err();

        assert!(matches!(err, IncludeError::Context { .. }));
    }

    #[test]
    fn test_cycle() {
        let p = Project::new();
        p.file("src/a.html", "@include('b.html')");
        p.file("src/b.html", "@include('a.html')");
        let page = p.page("src/index.html", "@include('a.html')");

        let err = include(page, "@").unwrap_err();

        assert!(matches!(err, IncludeError::Cycle(_)));
    }

    #[test]
    fn test_collapse_whitespace() {
        let input = Asset {
            source: "/project/src/index.html".into(),
            path: "index.html".into(),
            data: b"<html>\n  <head></head>\n  <body>\n    <!-- keep -->\n    <p>  a   b  </p>\n  </body>\n</html>\n".to_vec(),
        };

        let out = html(collapse_whitespace(input));

        assert!(out.contains("<!-- keep -->"));
        assert!(out.contains("<p>a b</p>") || out.contains("<p> a b </p>"));
        assert!(!out.contains("\n    "));
    }
}
