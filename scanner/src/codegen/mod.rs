//! Rust code generation
//!
//! Every interface becomes a module holding its static descriptor, opcode
//! constants and enums, plus a `client` and/or `server` submodule with the
//! typed handle, the decoded incoming-message enum and the handler glue.
//! All modules are emitted flat, so cross-interface references are
//! `super::<interface>` paths and the output can be `include!`d anywhere.

mod interfaces;
mod side;
pub(crate) mod util;

use crate::protocol::{validate, ArgType, Interface, ParseError, Protocol};
use proc_macro2::TokenStream;
use quote::quote;
use side::Side;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("invalid protocol: {0}")]
    InvalidProtocol(#[from] ParseError),
    #[error("unsupported construct: {0}")]
    Unsupported(String),
    #[error("invalid runtime path '{0}'")]
    InvalidRuntimePath(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Code generator configuration
#[derive(Debug, Clone)]
pub struct Generator {
    runtime: String,
    client: bool,
    server: bool,
}

impl Default for Generator {
    fn default() -> Self {
        Generator {
            runtime: "waywire".to_string(),
            client: true,
            server: true,
        }
    }
}

pub(crate) struct Context<'a> {
    pub rt: TokenStream,
    pub interfaces: HashMap<&'a str, &'a Interface>,
}

impl Generator {
    pub fn new() -> Self {
        Generator::default()
    }

    /// Path under which the generated code reaches the runtime crate.
    ///
    /// `waywire` for ordinary users, `crate` inside the runtime itself.
    pub fn runtime_path(mut self, path: impl Into<String>) -> Self {
        self.runtime = path.into();
        self
    }

    pub fn client(mut self, enabled: bool) -> Self {
        self.client = enabled;
        self
    }

    pub fn server(mut self, enabled: bool) -> Self {
        self.server = enabled;
        self
    }

    /// Generate bindings for a full set of protocols.
    ///
    /// The set is validated first; nothing is produced for an inconsistent one.
    pub fn generate(&self, protocols: &[Protocol]) -> Result<TokenStream, GenerationError> {
        validate(protocols)?;
        check_supported(protocols)?;

        let rt = util::path_tokens(&self.runtime)
            .ok_or_else(|| GenerationError::InvalidRuntimePath(self.runtime.clone()))?;
        let interfaces = protocols
            .iter()
            .flat_map(|p| p.interfaces.iter())
            .map(|i| (i.name.as_str(), i))
            .collect();
        let ctx = Context { rt, interfaces };

        let mut modules = Vec::new();
        for protocol in protocols {
            log::debug!("generating protocol '{}'", protocol.name);
            for interface in &protocol.interfaces {
                let client = if self.client {
                    Some(side::generate(&ctx, Side::Client, interface))
                } else {
                    None
                };
                let server = if self.server {
                    Some(side::generate(&ctx, Side::Server, interface))
                } else {
                    None
                };
                modules.push(interfaces::generate(&ctx, interface, client, server));
            }
        }
        Ok(quote! { #(#modules)* })
    }

    pub fn generate_to_string(&self, protocols: &[Protocol]) -> Result<String, GenerationError> {
        Ok(self.generate(protocols)?.to_string())
    }

    /// Generate and write to `path`; the file is not touched on error
    pub fn write_to_file(
        &self,
        protocols: &[Protocol],
        path: impl AsRef<Path>,
    ) -> Result<(), GenerationError> {
        let code = self.generate_to_string(protocols)?;
        fs::write(path.as_ref(), code)?;
        log::info!("wrote {}", path.as_ref().display());
        Ok(())
    }
}

fn check_supported(protocols: &[Protocol]) -> Result<(), GenerationError> {
    for protocol in protocols {
        for interface in &protocol.interfaces {
            for (kind, message) in interface.messages() {
                let new_ids = message
                    .args
                    .iter()
                    .filter(|arg| arg.kind == ArgType::NewId)
                    .count();
                if new_ids > 1 {
                    return Err(GenerationError::Unsupported(format!(
                        "interface '{}' {} '{}' creates {} objects, at most one is supported",
                        interface.name,
                        kind.as_str(),
                        message.name,
                        new_ids
                    )));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{parse_str, ParseErrorKind};

    const CALC_XML: &str = r#"<protocol name="calc">
      <interface name="calculator" version="2">
        <description summary="adds numbers">Adds numbers together.</description>
        <request name="add">
          <arg name="a" type="int"/>
          <arg name="b" type="int"/>
          <arg name="result" type="new_id" interface="calculator_result"/>
        </request>
        <request name="scale" since="2">
          <arg name="factor" type="fixed"/>
        </request>
        <request name="destroy" type="destructor"/>
        <enum name="flags" bitfield="true">
          <entry name="none" value="0"/>
          <entry name="round" value="1"/>
        </enum>
        <enum name="rotation">
          <entry name="90" value="1"/>
          <entry name="180" value="2"/>
        </enum>
      </interface>
      <interface name="calculator_result" version="1">
        <event name="value"><arg name="v" type="int"/></event>
      </interface>
    </protocol>"#;

    fn calc() -> Protocol {
        parse_str(CALC_XML).unwrap()
    }

    fn compact(tokens: String) -> String {
        tokens.split_whitespace().collect()
    }

    #[test]
    fn test_generation_is_deterministic() {
        let generator = Generator::new();
        let first = generator.generate_to_string(&[calc()]).unwrap();
        let second = generator.generate_to_string(&[calc()]).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_opcodes_follow_declaration_order() {
        let code = compact(Generator::new().generate_to_string(&[calc()]).unwrap());
        assert!(code.contains("pubconstREQ_ADD_OPCODE:u16=0u16;"));
        assert!(code.contains("pubconstREQ_SCALE_OPCODE:u16=1u16;"));
        assert!(code.contains("pubconstREQ_SCALE_SINCE:u32=2u32;"));
        assert!(code.contains("pubconstREQ_DESTROY_OPCODE:u16=2u16;"));
        assert!(code.contains("pubconstEVT_VALUE_OPCODE:u16=0u16;"));
    }

    #[test]
    fn test_runtime_path_is_used() {
        let code = compact(
            Generator::new()
                .runtime_path("crate")
                .generate_to_string(&[calc()])
                .unwrap(),
        );
        assert!(code.contains("pubstaticCALCULATOR_INTERFACE:crate::protocol::Interface"));
        assert!(!code.contains("waywire::"));
    }

    #[test]
    fn test_sides_can_be_disabled() {
        let code = compact(
            Generator::new()
                .server(false)
                .generate_to_string(&[calc()])
                .unwrap(),
        );
        assert!(code.contains("pubmodclient"));
        assert!(!code.contains("pubmodserver"));
    }

    #[test]
    fn test_enum_names_are_escaped() {
        let code = compact(Generator::new().generate_to_string(&[calc()]).unwrap());
        assert!(code.contains("_90=1u32"));
        assert!(code.contains("pubconstRound:Flags=Flags(1u32);"));
    }

    #[test]
    fn test_invalid_protocol_produces_nothing() {
        let mut protocol = calc();
        protocol.interfaces[0].requests[0].args[2].interface = Some("missing".into());
        let err = Generator::new().generate(&[protocol]).unwrap_err();
        assert!(matches!(err, GenerationError::InvalidProtocol(_)));
    }

    #[test]
    fn test_invalid_names_are_rejected() {
        let mut protocol = calc();
        protocol.interfaces[0].requests[0].name = "bad-name".into();
        match Generator::new().generate(&[protocol]) {
            Err(GenerationError::InvalidProtocol(err)) => {
                assert_eq!(err.kind, ParseErrorKind::InvalidName("bad-name".into()));
            }
            other => panic!("expected an invalid protocol, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_two_new_ids_are_unsupported() {
        let mut protocol = calc();
        let extra = protocol.interfaces[0].requests[0].args[2].clone();
        let mut extra = extra;
        extra.name = "other".into();
        protocol.interfaces[0].requests[0].args.push(extra);
        let err = Generator::new().generate(&[protocol]).unwrap_err();
        assert!(matches!(err, GenerationError::Unsupported(_)));
    }

    #[test]
    fn test_invalid_runtime_path() {
        let err = Generator::new()
            .runtime_path("not a path")
            .generate(&[calc()])
            .unwrap_err();
        assert!(matches!(err, GenerationError::InvalidRuntimePath(_)));
    }

    #[test]
    fn test_write_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calc.rs");
        Generator::new().write_to_file(&[calc()], &path).unwrap();
        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("CALCULATOR_RESULT_INTERFACE"));
    }
}
