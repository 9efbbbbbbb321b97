//! URI construction for modules and symbols
//!
//! `<archive>[/<dir>]?<module>[?<symbol>]`

/// Namespace of a directory inside an archive.
pub fn namespace(archive: &str, dir: &str) -> String {
    let dir = dir.trim_matches('/');
    if dir.is_empty() {
        archive.to_string()
    } else {
        format!("{archive}/{dir}")
    }
}

pub fn module_uri(namespace: &str, module: &str) -> String {
    format!("{namespace}?{module}")
}

pub fn symbol_uri(module_uri: &str, symbol: &str) -> String {
    format!("{module_uri}?{symbol}")
}

/// Split a symbol URI into `(module uri, symbol name)`.
pub fn split_symbol_uri(uri: &str) -> Option<(&str, &str)> {
    let (module, name) = uri.rsplit_once('?')?;
    module.contains('?').then_some((module, name))
}

/// Module name part of a module URI.
pub fn module_name(uri: &str) -> &str {
    uri.split_once('?').map_or(uri, |(_, name)| name)
}

/// Directory of a source-relative path (`a/b/c.en.tex` -> `a/b`).
pub fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(dir, _)| dir)
}

/// Join two relative directory paths, resolving `..` segments.
pub fn join_dirs(base: &str, rel: &str) -> String {
    let mut parts: Vec<&str> = base.split('/').filter(|s| !s.is_empty()).collect();
    for seg in rel.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}
