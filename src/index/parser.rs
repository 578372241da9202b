//! Tree-sitter based symbol extraction for the supported languages.

use std::collections::HashSet;

use anyhow::{anyhow, Result};
use tree_sitter::{Node, Parser};

use super::{Language, RefKind, SymbolRef};

/// Parse a file and extract definition and reference occurrences.
///
/// Definitions are collected first; references whose name coincides with a
/// definition in the same file are suppressed.
pub fn parse_symbols(content: &str, rel_path: &str, language: Language) -> Result<Vec<SymbolRef>> {
    let ts_language: tree_sitter::Language = match language {
        Language::Rust => tree_sitter_rust::LANGUAGE.into(),
        Language::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
        Language::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
        Language::Python => tree_sitter_python::LANGUAGE.into(),
        Language::Go => tree_sitter_go::LANGUAGE.into(),
        Language::Unknown => return Ok(Vec::new()),
    };

    let mut parser = Parser::new();
    parser.set_language(&ts_language)?;

    let tree = parser
        .parse(content, None)
        .ok_or_else(|| anyhow!("failed to parse {}", rel_path))?;

    let mut defs: Vec<(String, usize)> = Vec::new();
    let mut refs: Vec<(String, usize)> = Vec::new();
    collect(tree.root_node(), content, language, &mut defs, &mut refs);

    let mut symbols = Vec::new();
    let mut seen: HashSet<(String, usize)> = HashSet::new();
    for (name, line) in defs {
        if name.is_empty() || !seen.insert((name.clone(), line)) {
            continue;
        }
        symbols.push(SymbolRef {
            name,
            file_path: rel_path.to_string(),
            line,
            kind: RefKind::Definition,
        });
    }

    let def_names: HashSet<String> = symbols.iter().map(|s| s.name.clone()).collect();
    let mut ref_seen: HashSet<(String, usize)> = HashSet::new();
    for (name, line) in refs {
        if name.is_empty() || def_names.contains(name.as_str()) {
            continue;
        }
        if !ref_seen.insert((name.clone(), line)) {
            continue;
        }
        symbols.push(SymbolRef {
            name,
            file_path: rel_path.to_string(),
            line,
            kind: RefKind::Reference,
        });
    }

    Ok(symbols)
}

/// Node kinds that declare a named entity, per language. Every listed kind
/// carries a `name` field in its grammar.
fn definition_kinds(language: Language) -> &'static [&'static str] {
    match language {
        Language::Rust => &[
            "function_item",
            "function_signature_item",
            "struct_item",
            "enum_item",
            "union_item",
            "trait_item",
            "type_item",
            "const_item",
            "static_item",
            "mod_item",
        ],
        Language::JavaScript => &[
            "function_declaration",
            "generator_function_declaration",
            "class_declaration",
            "method_definition",
            "variable_declarator",
        ],
        Language::TypeScript => &[
            "function_declaration",
            "generator_function_declaration",
            "class_declaration",
            "method_definition",
            "variable_declarator",
            "interface_declaration",
            "type_alias_declaration",
            "enum_declaration",
        ],
        Language::Python => &["function_definition", "class_definition"],
        Language::Go => &["function_declaration", "method_declaration", "type_spec"],
        Language::Unknown => &[],
    }
}

/// Identifier node kinds counted as references, per language.
fn reference_kinds(language: Language) -> &'static [&'static str] {
    match language {
        Language::Rust => &["identifier", "type_identifier", "field_identifier"],
        Language::JavaScript => &["identifier"],
        Language::TypeScript => &["identifier", "type_identifier"],
        Language::Python => &["identifier"],
        Language::Go => &["identifier", "type_identifier", "field_identifier"],
        Language::Unknown => &[],
    }
}

/// Depth-first walk collecting definition names and identifier occurrences.
fn collect(
    root: Node,
    content: &str,
    language: Language,
    defs: &mut Vec<(String, usize)>,
    refs: &mut Vec<(String, usize)>,
) {
    let def_kinds = definition_kinds(language);
    let ref_kinds = reference_kinds(language);

    let mut cursor = root.walk();
    'outer: loop {
        let node = cursor.node();
        let kind = node.kind();

        if def_kinds.contains(&kind) {
            if let Some(name_node) = node.child_by_field_name("name") {
                defs.push((
                    node_text(&name_node, content),
                    name_node.start_position().row + 1,
                ));
            }
        } else if ref_kinds.contains(&kind) {
            refs.push((node_text(&node, content), node.start_position().row + 1));
        }

        if cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                break 'outer;
            }
        }
    }
}

fn node_text(node: &Node, content: &str) -> String {
    node.utf8_text(content.as_bytes())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defs_of(symbols: &[SymbolRef]) -> Vec<&str> {
        symbols
            .iter()
            .filter(|s| s.kind == RefKind::Definition)
            .map(|s| s.name.as_str())
            .collect()
    }

    fn refs_of(symbols: &[SymbolRef]) -> Vec<&str> {
        symbols
            .iter()
            .filter(|s| s.kind == RefKind::Reference)
            .map(|s| s.name.as_str())
            .collect()
    }

    #[test]
    fn test_rust_definitions() {
        let source = "pub struct Widget;\n\npub trait Draw {\n    fn draw(&self);\n}\n\nfn render(w: &Widget) {\n    paint(w);\n}\n";
        let symbols = parse_symbols(source, "widget.rs", Language::Rust).unwrap();

        let defs = defs_of(&symbols);
        assert!(defs.contains(&"Widget"));
        assert!(defs.contains(&"Draw"));
        assert!(defs.contains(&"render"));

        let refs = refs_of(&symbols);
        assert!(refs.contains(&"paint"));
        // Same-file definitions never double as references.
        assert!(!refs.contains(&"Widget"));
    }

    #[test]
    fn test_python_definitions() {
        let source = "class Loader:\n    def read(self):\n        return fetch(self.path)\n";
        let symbols = parse_symbols(source, "loader.py", Language::Python).unwrap();

        let defs = defs_of(&symbols);
        assert!(defs.contains(&"Loader"));
        assert!(defs.contains(&"read"));
        assert!(refs_of(&symbols).contains(&"fetch"));
    }

    #[test]
    fn test_typescript_interface() {
        let source = "interface Shape {\n  area(): number;\n}\n\nfunction describe(s: Shape) {\n  format(s);\n}\n";
        let symbols = parse_symbols(source, "shape.ts", Language::TypeScript).unwrap();

        let defs = defs_of(&symbols);
        assert!(defs.contains(&"Shape"));
        assert!(defs.contains(&"describe"));
        assert!(refs_of(&symbols).contains(&"format"));
    }

    #[test]
    fn test_go_type_and_method() {
        let source = "package main\n\ntype Server struct{}\n\nfunc (s *Server) Start() {\n\tlisten()\n}\n";
        let symbols = parse_symbols(source, "server.go", Language::Go).unwrap();

        let defs = defs_of(&symbols);
        assert!(defs.contains(&"Server"));
        assert!(defs.contains(&"Start"));
        assert!(refs_of(&symbols).contains(&"listen"));
    }

    #[test]
    fn test_lines_are_one_based() {
        let source = "fn first() {}\nfn second() {}\n";
        let symbols = parse_symbols(source, "a.rs", Language::Rust).unwrap();
        let first = symbols.iter().find(|s| s.name == "first").unwrap();
        let second = symbols.iter().find(|s| s.name == "second").unwrap();
        assert_eq!(first.line, 1);
        assert_eq!(second.line, 2);
    }

    #[test]
    fn test_unknown_language_yields_nothing() {
        let symbols = parse_symbols("whatever", "a.xyz", Language::Unknown).unwrap();
        assert!(symbols.is_empty());
    }
}
