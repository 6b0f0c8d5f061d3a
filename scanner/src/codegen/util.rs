//! Identifier and doc-comment helpers

use crate::protocol::Description;
use proc_macro2::{Ident, Span, TokenStream};
use quote::quote;

const KEYWORDS: &[&str] = &[
    "abstract", "as", "async", "await", "become", "box", "break", "const", "continue", "crate",
    "do", "dyn", "else", "enum", "extern", "false", "final", "fn", "for", "if", "impl", "in",
    "let", "loop", "macro", "match", "mod", "move", "mut", "override", "priv", "pub", "ref",
    "return", "self", "Self", "static", "struct", "super", "trait", "true", "try", "type",
    "typeof", "unsafe", "unsized", "use", "virtual", "where", "while", "yield",
];

// Parameter names the generated methods use for themselves
const RESERVED_PARAMS: &[&str] = &["conn", "child_data", "child_version"];

fn is_keyword(name: &str) -> bool {
    KEYWORDS.contains(&name)
}

pub fn is_valid_ident(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name != "_" && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn ident(name: &str) -> Ident {
    Ident::new(name, Span::call_site())
}

/// `wl_display` -> `WlDisplay`
pub fn camel_case(name: &str) -> String {
    name.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// Ident usable for modules, functions, fields and bindings
pub fn snake_ident(name: &str) -> Ident {
    let mut name = name.to_string();
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    if is_keyword(&name) {
        name.push('_');
    }
    ident(&name)
}

/// Ident for a message argument; never shadows a generated parameter
pub fn arg_ident(name: &str) -> Ident {
    if RESERVED_PARAMS.contains(&name) {
        ident(&format!("{}_", name))
    } else {
        snake_ident(name)
    }
}

/// Ident for types, enum variants and flag constants
pub fn camel_ident(name: &str) -> Ident {
    let mut camel = camel_case(name);
    if camel.is_empty() || camel.starts_with(|c: char| c.is_ascii_digit()) {
        camel.insert(0, '_');
    }
    if is_keyword(&camel) {
        camel.push('_');
    }
    ident(&camel)
}

pub fn upper_ident(name: &str) -> Ident {
    let mut upper = name.to_ascii_uppercase();
    if upper.starts_with(|c: char| c.is_ascii_digit()) {
        upper.insert(0, '_');
    }
    ident(&upper)
}

/// `WL_DISPLAY_INTERFACE`
pub fn interface_static(name: &str) -> Ident {
    ident(&format!("{}_INTERFACE", name.to_ascii_uppercase()))
}

/// `REQ_SYNC_OPCODE` style constant names
pub fn opcode_const(prefix: &str, message: &str) -> Ident {
    ident(&format!("{}_{}_OPCODE", prefix, message.to_ascii_uppercase()))
}

pub fn since_const(prefix: &str, message: &str) -> Ident {
    ident(&format!("{}_{}_SINCE", prefix, message.to_ascii_uppercase()))
}

/// `#[doc]` attributes for an element's description plus extra notes
pub fn doc_attrs(description: Option<&Description>, summary: Option<&str>, notes: &[String]) -> TokenStream {
    let mut lines: Vec<String> = Vec::new();
    match description {
        Some(description) => {
            if !description.summary.is_empty() {
                lines.push(capitalize(&description.summary));
            }
            if !description.body.is_empty() {
                if !lines.is_empty() {
                    lines.push(String::new());
                }
                lines.extend(description.body.lines().map(str::to_string));
            }
        }
        None => {
            if let Some(summary) = summary {
                lines.push(capitalize(summary));
            }
        }
    }
    for note in notes {
        if !lines.is_empty() {
            lines.push(String::new());
        }
        lines.push(note.clone());
    }

    let lines = lines.into_iter().map(|line| {
        let line = if line.is_empty() { line } else { format!(" {}", line) };
        quote! { #[doc = #line] }
    });
    quote! { #(#lines)* }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Parse a runtime crate path such as `crate`, `waywire` or `::waywire::rt`
pub fn path_tokens(path: &str) -> Option<TokenStream> {
    let (absolute, rest) = match path.strip_prefix("::") {
        Some(rest) => (true, rest),
        None => (false, path),
    };
    let mut segments = Vec::new();
    for segment in rest.split("::") {
        let allowed = is_valid_ident(segment) && (!is_keyword(segment) || segment == "crate" || segment == "self" || segment == "super");
        if !allowed {
            return None;
        }
        segments.push(ident(segment));
    }
    if absolute && segments.first().map_or(false, |s| s == "crate") {
        return None;
    }
    if absolute {
        Some(quote! { #(:: #segments)* })
    } else {
        Some(quote! { #(#segments)::* })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camel_case() {
        assert_eq!(camel_case("wl_display"), "WlDisplay");
        assert_eq!(camel_case("delete_id"), "DeleteId");
        assert_eq!(camel_case("rgb565"), "Rgb565");
        assert_eq!(camel_ident("90").to_string(), "_90");
        assert_eq!(camel_ident("flipped_270").to_string(), "Flipped270");
        assert_eq!(camel_ident("self").to_string(), "Self_");
    }

    #[test]
    fn test_snake_keywords() {
        assert_eq!(snake_ident("type").to_string(), "type_");
        assert_eq!(snake_ident("move").to_string(), "move_");
        assert_eq!(snake_ident("surface").to_string(), "surface");
        assert_eq!(arg_ident("conn").to_string(), "conn_");
    }

    #[test]
    fn test_constant_names() {
        assert_eq!(interface_static("wl_display").to_string(), "WL_DISPLAY_INTERFACE");
        assert_eq!(opcode_const("REQ", "get_registry").to_string(), "REQ_GET_REGISTRY_OPCODE");
        assert_eq!(upper_ident("2d").to_string(), "_2D");
    }

    #[test]
    fn test_path_tokens() {
        assert_eq!(path_tokens("crate").unwrap().to_string(), "crate");
        assert_eq!(
            path_tokens("::waywire::rt").unwrap().to_string().replace(' ', ""),
            "::waywire::rt"
        );
        assert!(path_tokens("").is_none());
        assert!(path_tokens("way-wire").is_none());
        assert!(path_tokens("::crate").is_none());
        assert!(path_tokens("fn").is_none());
    }

    #[test]
    fn test_doc_attrs() {
        let description = Description {
            summary: "core global object".into(),
            body: "First line.\n\nSecond paragraph.".into(),
        };
        let tokens = doc_attrs(Some(&description), None, &[]).to_string();
        assert!(tokens.contains("\" Core global object\""));
        assert!(tokens.contains("\" Second paragraph.\""));
        assert!(doc_attrs(None, None, &[]).is_empty());
    }
}
