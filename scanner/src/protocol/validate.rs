//! Structural validation of protocol documents

use super::errors::{ParseError, ParseErrorKind};
use super::*;
use std::collections::{HashMap, HashSet};

fn interface_context(protocol: &Protocol, interface: &Interface) -> String {
    format!("protocol '{}' interface '{}'", protocol.name, interface.name)
}

fn message_context(
    protocol: &Protocol,
    interface: &Interface,
    kind: MessageKind,
    message: &Message,
) -> String {
    format!(
        "{} {} '{}'",
        interface_context(protocol, interface),
        kind.as_str(),
        message.name
    )
}

fn arg_context(
    protocol: &Protocol,
    interface: &Interface,
    kind: MessageKind,
    message: &Message,
    arg: &Arg,
) -> String {
    format!(
        "{} arg '{}'",
        message_context(protocol, interface, kind, message),
        arg.name
    )
}

/// Names end up as Rust identifiers; only interfaces may not start with a digit
fn check_name(context: &str, name: &str, leading_digit: bool) -> Result<(), ParseError> {
    let valid = match name.chars().next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_' || (leading_digit && first.is_ascii_digit()))
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(ParseError::new(context, ParseErrorKind::InvalidName(name.to_string())))
    }
}

/// Rules that can be checked within a single document
pub fn validate_protocol(protocol: &Protocol) -> Result<(), ParseError> {
    let mut names = HashSet::new();
    for interface in &protocol.interfaces {
        let context = interface_context(protocol, interface);
        check_name(&context, &interface.name, false)?;
        if !names.insert(interface.name.as_str()) {
            return Err(ParseError::new(
                context,
                ParseErrorKind::DuplicateInterface(interface.name.clone()),
            ));
        }
        if interface.version == 0 {
            return Err(ParseError::new(context, ParseErrorKind::InvalidVersion(0)));
        }

        let mut requests = HashSet::new();
        let mut events = HashSet::new();
        for (kind, message) in interface.messages() {
            let context = message_context(protocol, interface, kind, message);
            check_name(&context, &message.name, true)?;
            let seen = match kind {
                MessageKind::Request => &mut requests,
                MessageKind::Event => &mut events,
            };
            if !seen.insert(message.name.as_str()) {
                return Err(ParseError::new(
                    context,
                    ParseErrorKind::DuplicateMessage {
                        kind: kind.as_str(),
                        name: message.name.clone(),
                    },
                ));
            }
            if message.since == 0 {
                return Err(ParseError::new(context, ParseErrorKind::InvalidVersion(0)));
            }
            if message.since > interface.version {
                return Err(ParseError::new(
                    context,
                    ParseErrorKind::SinceTooNew {
                        since: message.since,
                        version: interface.version,
                    },
                ));
            }

            let mut arg_names = HashSet::new();
            for arg in &message.args {
                let context = arg_context(protocol, interface, kind, message, arg);
                check_name(&context, &arg.name, true)?;
                if !arg_names.insert(arg.name.as_str()) {
                    return Err(ParseError::new(
                        context,
                        ParseErrorKind::DuplicateArg(arg.name.clone()),
                    ));
                }
                if arg.allow_null && !arg.kind.nullable() {
                    return Err(ParseError::new(
                        context,
                        ParseErrorKind::NullNotAllowed(arg.kind.as_str()),
                    ));
                }
                if arg.enum_.is_some() && !matches!(arg.kind, ArgType::Int | ArgType::Uint) {
                    return Err(ParseError::new(
                        context,
                        ParseErrorKind::EnumOnInvalidType(arg.kind.as_str()),
                    ));
                }
            }
        }

        let mut enum_names = HashSet::new();
        for enum_ in &interface.enums {
            let context = format!("{} enum '{}'", interface_context(protocol, interface), enum_.name);
            check_name(&context, &enum_.name, true)?;
            if !enum_names.insert(enum_.name.as_str()) {
                return Err(ParseError::new(
                    context,
                    ParseErrorKind::DuplicateEnum(enum_.name.clone()),
                ));
            }
            let mut entry_names = HashSet::new();
            for entry in &enum_.entries {
                check_name(&format!("{} entry '{}'", context, entry.name), &entry.name, true)?;
                if !entry_names.insert(entry.name.as_str()) {
                    return Err(ParseError::new(
                        context,
                        ParseErrorKind::DuplicateEntry(entry.name.clone()),
                    ));
                }
            }
        }
    }
    Ok(())
}

/// Validate a full set of documents.
///
/// Interface and enum references may point into any document of the set.
pub fn validate(protocols: &[Protocol]) -> Result<(), ParseError> {
    let mut interfaces: HashMap<&str, &Interface> = HashMap::new();
    for protocol in protocols {
        validate_protocol(protocol)?;
        for interface in &protocol.interfaces {
            if interfaces.insert(&interface.name, interface).is_some() {
                return Err(ParseError::new(
                    interface_context(protocol, interface),
                    ParseErrorKind::DuplicateInterface(interface.name.clone()),
                ));
            }
        }
    }

    for protocol in protocols {
        for interface in &protocol.interfaces {
            for (kind, message) in interface.messages() {
                for arg in &message.args {
                    if let Some(target) = &arg.interface {
                        if matches!(arg.kind, ArgType::Object | ArgType::NewId)
                            && !interfaces.contains_key(target.as_str())
                        {
                            return Err(ParseError::new(
                                arg_context(protocol, interface, kind, message, arg),
                                ParseErrorKind::UnknownInterface(target.clone()),
                            ));
                        }
                    }
                    if let Some(reference) = &arg.enum_ {
                        let (owner, name) = split_enum_ref(reference, &interface.name);
                        let found = interfaces
                            .get(owner)
                            .and_then(|owner| owner.find_enum(name))
                            .is_some();
                        if !found {
                            return Err(ParseError::new(
                                arg_context(protocol, interface, kind, message, arg),
                                ParseErrorKind::UnknownEnum(reference.clone()),
                            ));
                        }
                    }
                }
            }
        }
    }
    Ok(())
}
