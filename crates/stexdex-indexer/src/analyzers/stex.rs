//! sTeX document analyzer
//!
//! Recognized markup:
//!
//! - `\begin{smodule}[opts]{name}` ... `\end{smodule}`, nesting as `parent/child`
//! - `\begin{mathstructure}{name}[symbol]` and `extstructure`, declaring `symbol` in the
//!   enclosing module and opening the structure module `parent/name-module`
//! - `\symdecl*{name}`, `\symdef{name}[opts]{notation}` (an explicit `name=` wins)
//! - `\importmodule[archive]{path?module}`, `\usemodule`, `\requiremodule`
//! - `\definiendum{symbol}{text}`, `\sr{symbol}{text}`
//! - `\sn`, `\sns`, `\Sn`, `\Sns`, `\definame`, `\Definame` with the text derived from
//!   the symbol name, honouring `pre=` and `post=`

use stexdex_core::uri::{join_dirs, module_uri, namespace, parent_dir, symbol_uri};
use stexdex_core::{
    AnalysisInput, Analyzer, Dependency, DependencyKind, Extraction, ExtractionError, Module, Span, Symbol,
    Verbalization, lang_from_file_name,
};

use super::latex::{self, Invocation, SyntaxError};

const MODULE_ENV: &str = "smodule";
const STRUCTURE_ENVS: [&str; 2] = ["mathstructure", "extstructure"];

/// Regex and brace-matching analyzer for `.tex` sources. Stateless.
#[derive(Debug, Clone, Copy, Default)]
pub struct StexAnalyzer;

impl Analyzer for StexAnalyzer {
    fn analyze(&self, input: &AnalysisInput<'_>) -> Result<Extraction, ExtractionError> {
        let location = format!("{}/{}", input.archive, input.path);
        let text = std::str::from_utf8(input.content).map_err(|_| ExtractionError::InvalidUtf8 {
            path: location.clone(),
        })?;
        let text = latex::strip_comments(text);

        let mut doc = Document::new(input);
        doc.read(&text).map_err(|err| ExtractionError::Malformed {
            path: location.clone(),
            offset: err.offset,
            message: err.message,
        })?;
        let extraction = doc.finish().map_err(|err| ExtractionError::Malformed {
            path: location.clone(),
            offset: err.offset,
            message: err.message,
        })?;

        tracing::debug!(
            "Analyzed {}: {} modules, {} dependencies, {} file-level verbalizations",
            location,
            extraction.modules.len(),
            extraction.dependencies.len(),
            extraction.verbalizations.len()
        );
        Ok(extraction)
    }
}

/// A verbalization waiting to be attached to a declaration or kept at file level.
struct PendingVerbalization {
    module: Option<usize>,
    verbalization: Verbalization,
}

struct Document<'a> {
    archive: &'a str,
    /// Directory of the file below its content directory.
    dir: &'a str,
    namespace: String,
    lang: String,
    modules: Vec<Module>,
    /// Indices into `modules` of the currently open environments.
    open: Vec<usize>,
    dependencies: Vec<Dependency>,
    verbalizations: Vec<PendingVerbalization>,
}

impl<'a> Document<'a> {
    fn new(input: &AnalysisInput<'a>) -> Self {
        let relative = input.path.split_once('/').map_or(input.path, |(_, rest)| rest);
        let dir = parent_dir(relative);
        Document {
            archive: input.archive,
            dir,
            namespace: namespace(input.archive, dir),
            lang: lang_from_file_name(input.path),
            modules: Vec::new(),
            open: Vec::new(),
            dependencies: Vec::new(),
            verbalizations: Vec::new(),
        }
    }

    fn read(&mut self, text: &str) -> Result<(), SyntaxError> {
        for (start, name) in latex::control_words(text) {
            match name {
                "begin" => self.begin(text, start)?,
                "end" => self.end(text, start)?,
                "symdecl" => {
                    if let Some(call) = latex::parse_invocation(text, start, name, "*{")? {
                        self.declare(call.arg(0), None, &call);
                    }
                }
                "symdef" => {
                    if let Some(call) = latex::parse_invocation(text, start, name, "{[{")? {
                        self.declare(call.arg(0), call.arg(1), &call);
                    }
                }
                "importmodule" | "usemodule" | "requiremodule" => {
                    if let Some(call) = latex::parse_invocation(text, start, name, "[{")? {
                        let kind = if name == "importmodule" {
                            DependencyKind::Import
                        } else {
                            DependencyKind::Use
                        };
                        self.depend(&call, kind);
                    }
                }
                "sr" | "definiendum" => {
                    if let Some(call) = latex::parse_invocation(text, start, name, "[{{")? {
                        let text = call.arg(2).map(latex::plain_text).unwrap_or_default();
                        self.verbalize(&call, text, name == "definiendum");
                    }
                }
                "sn" | "sns" | "Sn" | "Sns" | "definame" | "Definame" => {
                    if let Some(call) = latex::parse_invocation(text, start, name, "[{")? {
                        let text = derived_verbalization(name, call.arg(0), call.arg(1).unwrap_or_default());
                        self.verbalize(&call, text, name.eq_ignore_ascii_case("definame"));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn begin(&mut self, text: &str, start: usize) -> Result<(), SyntaxError> {
        let Some(env) = latex::parse_invocation(text, start, "begin", "{")? else {
            return Ok(());
        };
        match env.arg(0).map(str::trim) {
            Some(MODULE_ENV) => self.begin_module(text, start, env.end),
            Some(name) if STRUCTURE_ENVS.contains(&name) => self.begin_structure(text, start, env.end, name),
            _ => Ok(()),
        }
    }

    fn begin_module(&mut self, text: &str, start: usize, pos: usize) -> Result<(), SyntaxError> {
        let Some(call) = latex::parse_from(text, start, "begin", pos, "[{")? else {
            return Err(SyntaxError {
                offset: start,
                message: "smodule without a name".to_string(),
            });
        };
        let local = call.arg(1).unwrap_or_default().trim();
        self.open_module(local, Span::new(start, call.end), false);
        Ok(())
    }

    fn begin_structure(&mut self, text: &str, start: usize, pos: usize, env: &str) -> Result<(), SyntaxError> {
        let spec = if env == "extstructure" { "{[{" } else { "{[" };
        let Some(call) = latex::parse_from(text, start, "begin", pos, spec)? else {
            return Err(SyntaxError {
                offset: start,
                message: format!("{env} without a name"),
            });
        };
        let name = call.arg(0).unwrap_or_default().trim();
        let Some(&parent) = self.open.last() else {
            tracing::debug!("Ignoring {} {} outside of a module", env, name);
            return Ok(());
        };
        let symbol = call
            .arg(1)
            .and_then(|options| options.split(',').next())
            .map(str::trim)
            .filter(|symbol| !symbol.is_empty())
            .unwrap_or(name);
        let module = &mut self.modules[parent];
        module.symbols.push(Symbol {
            name: symbol.to_string(),
            uri: symbol_uri(&module.uri, symbol),
            module: module.uri.clone(),
            span: Span::new(call.start, call.end),
            verbalizations: Vec::new(),
        });
        self.open_module(&format!("{name}-module"), Span::new(start, call.end), true);
        Ok(())
    }

    fn open_module(&mut self, local: &str, span: Span, is_structure: bool) {
        let parent = self.open.last().copied();
        let name = match parent {
            Some(parent) => format!("{}/{}", self.modules[parent].name, local),
            None => local.to_string(),
        };
        let uri = module_uri(&self.namespace, &name);
        if let Some(parent) = parent {
            self.modules[parent].children.push(uri.clone());
        }
        self.open.push(self.modules.len());
        self.modules.push(Module {
            name,
            namespace: self.namespace.clone(),
            uri,
            parent: parent.map(|parent| self.modules[parent].uri.clone()),
            children: Vec::new(),
            symbols: Vec::new(),
            imports: Vec::new(),
            span,
            is_structure,
        });
    }

    fn end(&mut self, text: &str, start: usize) -> Result<(), SyntaxError> {
        let Some(env) = latex::parse_invocation(text, start, "end", "{")? else {
            return Ok(());
        };
        let structure = match env.arg(0).map(str::trim) {
            Some(MODULE_ENV) => false,
            Some(name) if STRUCTURE_ENVS.contains(&name) => true,
            _ => return Ok(()),
        };
        let top = self.open.last().map(|&index| self.modules[index].is_structure);
        match (top, structure) {
            (Some(open), closing) if open == closing => {}
            // Structures declared outside of a module were never opened.
            (None | Some(false), true) => return Ok(()),
            (None, false) => {
                return Err(SyntaxError {
                    offset: start,
                    message: "\\end{smodule} without a matching \\begin".to_string(),
                });
            }
            (Some(_), _) => {
                return Err(SyntaxError {
                    offset: start,
                    message: "\\end{smodule} inside an open structure".to_string(),
                });
            }
        }
        if let Some(index) = self.open.pop() {
            self.modules[index].span.end = env.end as u32;
        }
        Ok(())
    }

    fn declare(&mut self, name: Option<&str>, options: Option<&str>, call: &Invocation<'_>) {
        let explicit = options
            .map(latex::key_values)
            .and_then(|pairs| pairs.into_iter().find(|(key, _)| *key == "name").map(|(_, value)| value));
        let Some(name) = explicit.or(name).map(str::trim).filter(|name| !name.is_empty()) else {
            return;
        };
        let Some(&index) = self.open.last() else {
            tracing::debug!("Ignoring \\{} of {} outside of a module", call.name, name);
            return;
        };
        let module = &mut self.modules[index];
        module.symbols.push(Symbol {
            name: name.to_string(),
            uri: symbol_uri(&module.uri, name),
            module: module.uri.clone(),
            span: Span::new(call.start, call.end),
            verbalizations: Vec::new(),
        });
    }

    fn depend(&mut self, call: &Invocation<'_>, kind: DependencyKind) {
        let Some(reference) = call.arg(1).map(str::trim).filter(|r| !r.is_empty()) else {
            return;
        };
        let archive = call.arg(0).map(str::trim).filter(|a| !a.is_empty());
        let (target, fallback) = self.resolve_module_ref(archive, reference);

        let source = self.open.last().map(|&index| self.modules[index].uri.clone());
        if let (Some(&index), DependencyKind::Import) = (self.open.last(), kind) {
            self.modules[index].imports.push(target.clone());
        }
        self.dependencies.push(Dependency {
            source,
            target,
            fallback,
            kind,
            span: Span::new(call.start, call.end),
        });
    }

    /// Target URI of `[archive]{path?module}` plus the alternative relative to this file.
    fn resolve_module_ref(&self, archive: Option<&str>, reference: &str) -> (String, Option<String>) {
        let (path, module) = match reference.split_once('?') {
            Some((path, module)) => (Some(path.trim_matches('/')), module),
            None => (None, reference),
        };
        match (archive, path) {
            (Some(archive), path) => (module_uri(&namespace(archive, path.unwrap_or_default()), module), None),
            (None, None) => (module_uri(&self.namespace, module), None),
            (None, Some(path)) => {
                let target = module_uri(&namespace(self.archive, path), module);
                let relative = module_uri(&namespace(self.archive, &join_dirs(self.dir, path)), module);
                let fallback = (relative != target).then_some(relative);
                (target, fallback)
            }
        }
    }

    fn verbalize(&mut self, call: &Invocation<'_>, text: String, is_defining: bool) {
        let Some(reference) = call.arg(1).map(str::trim).filter(|r| !r.is_empty()) else {
            return;
        };
        if text.is_empty() {
            return;
        }
        let (path_hint, symbol_name) = match reference.rsplit_once('?') {
            Some((hint, name)) => (Some(hint.to_string()), name.to_string()),
            None => (None, reference.to_string()),
        };
        self.verbalizations.push(PendingVerbalization {
            module: self.open.last().copied(),
            verbalization: Verbalization {
                symbol_ref: reference.to_string(),
                symbol_name,
                path_hint,
                text,
                lang: self.lang.clone(),
                span: Span::new(call.start, call.end),
                is_defining,
            },
        });
    }

    /// Attach verbalizations naming a symbol of their enclosing module; the rest stay at
    /// file level for the linker to resolve.
    fn finish(mut self) -> Result<Extraction, SyntaxError> {
        if let Some(&index) = self.open.last() {
            return Err(SyntaxError {
                offset: self.modules[index].span.start as usize,
                message: format!("smodule {} is never closed", self.modules[index].name),
            });
        }

        let mut file_level = Vec::new();
        for pending in std::mem::take(&mut self.verbalizations) {
            let verbalization = pending.verbalization;
            let symbol = pending
                .module
                .filter(|_| verbalization.path_hint.is_none())
                .and_then(|index| {
                    self.modules[index]
                        .symbols
                        .iter_mut()
                        .find(|symbol| symbol.name == verbalization.symbol_name)
                });
            match symbol {
                Some(symbol) => symbol.verbalizations.push(verbalization),
                None => file_level.push(verbalization),
            }
        }

        Ok(Extraction {
            lang: self.lang,
            modules: self.modules,
            dependencies: self.dependencies,
            verbalizations: file_level,
        })
    }
}

/// Text of `\sn`-style macros: last segment of the symbol reference, capitalized for the
/// upper-case variants, pluralized for `sns`, wrapped in `pre=` / `post=`.
fn derived_verbalization(macro_name: &str, options: Option<&str>, reference: &str) -> String {
    let base = reference.trim().rsplit('?').next().unwrap_or_default();
    let mut text = match macro_name {
        "Sn" | "Sns" | "Definame" => capitalize(base),
        _ => base.to_string(),
    };
    if matches!(macro_name, "sns" | "Sns") {
        text.push('s');
    }
    if text.is_empty() {
        return text;
    }
    let pairs = options.map(latex::key_values).unwrap_or_default();
    latex::plain_text(&format!("{}{}{}", option(&pairs, "pre"), text, option(&pairs, "post")))
}

fn option<'o>(pairs: &[(&'o str, &'o str)], key: &str) -> &'o str {
    pairs.iter().find(|(k, _)| *k == key).map_or("", |(_, value)| *value)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(path: &str, text: &str) -> Result<Extraction, ExtractionError> {
        StexAnalyzer.analyze(&AnalysisInput {
            archive: "A",
            path,
            content: text.as_bytes(),
        })
    }

    #[test]
    fn derives_verbalizations() {
        assert_eq!(derived_verbalization("sn", None, "set?member"), "member");
        assert_eq!(derived_verbalization("Sns", None, "edge"), "Edges");
        assert_eq!(derived_verbalization("sn", Some("pre=un"), "bounded"), "unbounded");
        assert_eq!(derived_verbalization("sns", Some("post={ of }"), "set"), "sets of");
        assert_eq!(derived_verbalization("Definame", None, "ä"), "Ä");
        assert_eq!(derived_verbalization("sn", None, ""), "");
    }

    #[test]
    fn resolves_module_references() {
        let input = AnalysisInput {
            archive: "A",
            path: "source/sets/intro.en.tex",
            content: b"",
        };
        let doc = Document::new(&input);
        assert_eq!(doc.namespace, "A/sets");
        assert_eq!(doc.resolve_module_ref(None, "m"), ("A/sets?m".to_string(), None));
        assert_eq!(
            doc.resolve_module_ref(None, "mod?m"),
            ("A/mod?m".to_string(), Some("A/sets/mod?m".to_string()))
        );
        assert_eq!(doc.resolve_module_ref(Some("B"), "mod?m"), ("B/mod?m".to_string(), None));
        assert_eq!(doc.resolve_module_ref(Some("B"), "m"), ("B?m".to_string(), None));
    }

    #[test]
    fn reads_modules_symbols_and_dependencies() {
        let text = r"
\begin{smodule}{m}
  \importmodule[B]{sets?set}
  \symdecl*{foo}
  \symdef{plus}[name=addition, args=2]{#1 + #2}
  % \symdecl{commented}
  \begin{smodule}{inner}
    \usemodule{other}
    \symdecl{bar}
  \end{smodule}
\end{smodule}
";
        let extraction = analyze("source/m.en.tex", text).unwrap();
        assert_eq!(extraction.lang, "en");
        let uris: Vec<_> = extraction.modules.iter().map(|m| m.uri.as_str()).collect();
        assert_eq!(uris, ["A?m", "A?m/inner"]);

        let outer = &extraction.modules[0];
        let symbols: Vec<_> = outer.symbols.iter().map(|s| s.uri.as_str()).collect();
        assert_eq!(symbols, ["A?m?foo", "A?m?addition"]);
        assert_eq!(outer.imports, ["B/sets?set"]);
        assert_eq!(outer.children, ["A?m/inner"]);
        assert_eq!(&text[outer.span.start as usize..outer.span.start as usize + 6], r"\begin");
        assert!(text[..outer.span.end as usize].ends_with(r"\end{smodule}"));

        let inner = &extraction.modules[1];
        assert_eq!(inner.name, "m/inner");
        assert_eq!(inner.parent.as_deref(), Some("A?m"));
        assert_eq!(inner.symbols[0].uri, "A?m/inner?bar");
        assert!(outer.span.contains(inner.span));

        let deps: Vec<_> = extraction
            .dependencies
            .iter()
            .map(|d| (d.source.as_deref(), d.target.as_str(), d.kind))
            .collect();
        assert_eq!(
            deps,
            [
                (Some("A?m"), "B/sets?set", DependencyKind::Import),
                (Some("A?m/inner"), "A?other", DependencyKind::Use),
            ]
        );
    }

    #[test]
    fn reads_math_structures() {
        let text = r"
\begin{smodule}{m}
  \begin{mathstructure}{monoid}[monoidstruct]
    \symdecl{op}
  \end{mathstructure}
  \begin{mathstructure}{group}
  \end{mathstructure}
\end{smodule}
\begin{mathstructure}{loose}
\end{mathstructure}
";
        let extraction = analyze("source/m.en.tex", text).unwrap();
        let modules: Vec<_> = extraction
            .modules
            .iter()
            .map(|m| (m.uri.as_str(), m.is_structure))
            .collect();
        assert_eq!(
            modules,
            [("A?m", false), ("A?m/monoid-module", true), ("A?m/group-module", true)]
        );

        let outer = &extraction.modules[0];
        let symbols: Vec<_> = outer.symbols.iter().map(|s| s.uri.as_str()).collect();
        assert_eq!(symbols, ["A?m?monoidstruct", "A?m?group"]);
        assert_eq!(outer.children, ["A?m/monoid-module", "A?m/group-module"]);
        assert_eq!(extraction.modules[1].symbols[0].uri, "A?m/monoid-module?op");
        assert!(outer.span.contains(extraction.modules[1].span));
    }

    #[test]
    fn attaches_verbalizations_to_local_symbols() {
        let text = r"
\begin{smodule}{m}
  \symdecl{foo}
  \begin{sdefinition}
    A \definiendum{foo}{Foo Thing} is a \sr{set?member}{member}.
    See \Sns{foo} and \sn{bar}.
  \end{sdefinition}
\end{smodule}
\sn{foo}
";
        let extraction = analyze("source/m.en.tex", text).unwrap();
        let foo = &extraction.modules[0].symbols[0];
        let attached: Vec<_> = foo
            .verbalizations
            .iter()
            .map(|v| (v.text.as_str(), v.is_defining))
            .collect();
        assert_eq!(attached, [("Foo Thing", true), ("Foos", false)]);

        let file_level: Vec<_> = extraction
            .verbalizations
            .iter()
            .map(|v| (v.symbol_ref.as_str(), v.path_hint.as_deref(), v.text.as_str()))
            .collect();
        assert_eq!(
            file_level,
            [
                ("set?member", Some("set"), "member"),
                ("bar", None, "bar"),
                ("foo", None, "foo"),
            ]
        );
    }

    #[test]
    fn rejects_malformed_documents() {
        let err = analyze("source/x.tex", "\\begin{smodule}{m}\n\\symdecl{a}").unwrap_err();
        assert!(matches!(err, ExtractionError::Malformed { offset: 0, .. }), "{err}");

        let err = analyze("source/x.tex", "text \\end{smodule}").unwrap_err();
        assert!(matches!(err, ExtractionError::Malformed { offset: 5, .. }), "{err}");

        let err = analyze("source/x.tex", "\\begin{smodule}{m}\\begin{mathstructure}{s}\\end{smodule}").unwrap_err();
        assert!(matches!(err, ExtractionError::Malformed { offset: 42, .. }), "{err}");

        let err = analyze("source/x.tex", "\\sr{a}{never closed").unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"A/source/x.tex:6: unterminated '{' argument");

        let err = StexAnalyzer
            .analyze(&AnalysisInput {
                archive: "A",
                path: "source/x.tex",
                content: &[0xff, 0xfe],
            })
            .unwrap_err();
        assert_eq!(
            err,
            ExtractionError::InvalidUtf8 {
                path: "A/source/x.tex".to_string()
            }
        );
    }

    #[test]
    fn identical_content_gives_identical_records() {
        let text = "\\begin{smodule}{m}\\symdecl{x}\\sn{x}\\end{smodule}";
        assert_eq!(analyze("source/m.tex", text).unwrap(), analyze("source/m.tex", text).unwrap());
    }
}
