//! Protocol XML parser
//!
//! Streams the document with quick-xml and assembles the model bottom-up.
//! Elements the model has no use for are skipped with their whole subtree so
//! newer schema additions do not break older scanners.

use super::errors::{ParseError, ParseErrorKind};
use super::validate::validate_protocol;
use super::*;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::fs;
use std::path::Path;

/// Parse one protocol document.
///
/// Only document-local rules are checked here; references to interfaces of
/// other documents are resolved by [`validate`](super::validate) once the
/// whole set is loaded.
pub fn parse_str(xml: &str) -> Result<Protocol, ParseError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut builder = Builder::default();
    loop {
        let position = reader.buffer_position();
        let event = reader
            .read_event()
            .map_err(|e| builder.xml_error(position, e.to_string()))?;
        match event {
            Event::Start(e) => builder.open(&e)?,
            Event::Empty(e) => {
                builder.open(&e)?;
                builder.close(e.name().as_ref())?;
            }
            Event::End(e) => builder.close(e.name().as_ref())?,
            Event::Text(t) => {
                let text = t
                    .unescape()
                    .map_err(|e| builder.xml_error(position, e.to_string()))?;
                builder.text(&text);
            }
            Event::CData(c) => builder.text(&String::from_utf8_lossy(&c.into_inner())),
            Event::Eof => break,
            _ => {}
        }
    }

    let protocol = builder.finish()?;
    validate_protocol(&protocol)?;
    log::debug!(
        "parsed protocol '{}' with {} interfaces",
        protocol.name,
        protocol.interfaces.len()
    );
    Ok(protocol)
}

/// Read and parse a protocol document from disk
pub fn parse_file(path: impl AsRef<Path>) -> Result<Protocol, ParseError> {
    let path = path.as_ref();
    let xml = fs::read_to_string(path).map_err(|e| {
        ParseError::new(path.display().to_string(), ParseErrorKind::Io(e.to_string()))
    })?;
    parse_str(&xml).map_err(|e| ParseError {
        context: format!("{}: {}", path.display(), e.context),
        kind: e.kind,
    })
}

enum TextTarget {
    Copyright,
    Description,
}

#[derive(Default)]
struct Builder {
    protocol: Option<Protocol>,
    interface: Option<Interface>,
    message: Option<(MessageKind, Message)>,
    arg: Option<Arg>,
    enum_: Option<Enum>,
    entry: Option<Entry>,
    text: Option<TextTarget>,
    buffer: String,
    summary: String,
    skip_depth: usize,
    finished: Option<Protocol>,
}

struct Attributes(Vec<(String, String)>);

impl Attributes {
    fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

impl Builder {
    fn context(&self) -> String {
        let mut parts = Vec::new();
        if let Some(protocol) = &self.protocol {
            parts.push(format!("protocol '{}'", protocol.name));
        }
        if let Some(interface) = &self.interface {
            parts.push(format!("interface '{}'", interface.name));
        }
        if let Some((kind, message)) = &self.message {
            parts.push(format!("{} '{}'", kind.as_str(), message.name));
        }
        if let Some(arg) = &self.arg {
            parts.push(format!("arg '{}'", arg.name));
        }
        if let Some(enum_) = &self.enum_ {
            parts.push(format!("enum '{}'", enum_.name));
        }
        if let Some(entry) = &self.entry {
            parts.push(format!("entry '{}'", entry.name));
        }
        if parts.is_empty() {
            "document".to_string()
        } else {
            parts.join(" ")
        }
    }

    fn error(&self, kind: ParseErrorKind) -> ParseError {
        ParseError::new(self.context(), kind)
    }

    fn xml_error(&self, position: usize, message: String) -> ParseError {
        self.error(ParseErrorKind::Xml { position, message })
    }

    fn attributes(&self, e: &BytesStart) -> Result<Attributes, ParseError> {
        let mut attributes = Vec::new();
        for attr in e.attributes() {
            let attr = attr.map_err(|err| self.xml_error(0, err.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|err| self.xml_error(0, err.to_string()))?
                .into_owned();
            attributes.push((key, value));
        }
        Ok(Attributes(attributes))
    }

    fn required(&self, attrs: &Attributes, name: &'static str) -> Result<String, ParseError> {
        attrs
            .get(name)
            .map(str::to_string)
            .ok_or_else(|| self.error(ParseErrorKind::MissingAttribute(name)))
    }

    fn number(&self, attrs: &Attributes, name: &'static str) -> Result<Option<u32>, ParseError> {
        match attrs.get(name) {
            None => Ok(None),
            Some(value) => parse_number(value).map(Some).ok_or_else(|| {
                self.error(ParseErrorKind::InvalidAttribute {
                    name,
                    value: value.to_string(),
                })
            }),
        }
    }

    fn boolean(&self, attrs: &Attributes, name: &'static str) -> Result<bool, ParseError> {
        match attrs.get(name) {
            None | Some("false") => Ok(false),
            Some("true") => Ok(true),
            Some(value) => Err(self.error(ParseErrorKind::InvalidAttribute {
                name,
                value: value.to_string(),
            })),
        }
    }

    fn unexpected(&self, name: &str) -> ParseError {
        self.error(ParseErrorKind::UnexpectedElement(name.to_string()))
    }

    fn open(&mut self, e: &BytesStart) -> Result<(), ParseError> {
        if self.skip_depth > 0 {
            self.skip_depth += 1;
            return Ok(());
        }

        let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
        let attrs = self.attributes(e)?;
        match name.as_str() {
            "protocol" => {
                if self.protocol.is_some() || self.finished.is_some() {
                    return Err(self.unexpected(&name));
                }
                self.protocol = Some(Protocol {
                    name: self.required(&attrs, "name")?,
                    copyright: None,
                    description: None,
                    interfaces: Vec::new(),
                });
            }
            "copyright" => {
                if self.protocol.is_none() || self.interface.is_some() {
                    return Err(self.unexpected(&name));
                }
                self.begin_text(TextTarget::Copyright, String::new());
            }
            "description" => {
                if self.protocol.is_none() {
                    return Err(self.unexpected(&name));
                }
                let summary = attrs.get("summary").unwrap_or_default().to_string();
                self.begin_text(TextTarget::Description, summary);
            }
            "interface" => {
                if self.protocol.is_none() || self.interface.is_some() {
                    return Err(self.unexpected(&name));
                }
                let interface_name = self.required(&attrs, "name")?;
                self.interface = Some(Interface::new(interface_name, 0));
                let version = self
                    .number(&attrs, "version")?
                    .ok_or_else(|| self.error(ParseErrorKind::MissingAttribute("version")))?;
                if let Some(interface) = self.interface.as_mut() {
                    interface.version = version;
                }
            }
            "request" | "event" => {
                if self.interface.is_none() || self.message.is_some() || self.enum_.is_some() {
                    return Err(self.unexpected(&name));
                }
                let kind = if name == "request" {
                    MessageKind::Request
                } else {
                    MessageKind::Event
                };
                let mut message = Message::new(self.required(&attrs, "name")?);
                self.message = Some((kind, message.clone()));
                match attrs.get("type") {
                    None => {}
                    Some("destructor") => message.is_destructor = true,
                    Some(value) => {
                        return Err(self.error(ParseErrorKind::InvalidAttribute {
                            name: "type",
                            value: value.to_string(),
                        }))
                    }
                }
                message.since = self.number(&attrs, "since")?.unwrap_or(1);
                message.deprecated_since = self.number(&attrs, "deprecated-since")?;
                self.message = Some((kind, message));
            }
            "arg" => {
                if self.message.is_none() || self.arg.is_some() {
                    return Err(self.unexpected(&name));
                }
                let arg_name = self.required(&attrs, "name")?;
                self.arg = Some(Arg::new(arg_name, ArgType::Int));
                let type_name = self.required(&attrs, "type")?;
                let kind = ArgType::from_xml(&type_name).ok_or_else(|| {
                    self.error(ParseErrorKind::InvalidAttribute {
                        name: "type",
                        value: type_name.clone(),
                    })
                })?;
                let allow_null = self.boolean(&attrs, "allow-null")?;
                if let Some(arg) = self.arg.as_mut() {
                    arg.kind = kind;
                    arg.allow_null = allow_null;
                    arg.summary = attrs.get("summary").map(str::to_string);
                    arg.interface = attrs.get("interface").map(str::to_string);
                    arg.enum_ = attrs.get("enum").map(str::to_string);
                }
            }
            "enum" => {
                if self.interface.is_none() || self.message.is_some() || self.enum_.is_some() {
                    return Err(self.unexpected(&name));
                }
                let mut enum_ = Enum::new(self.required(&attrs, "name")?);
                self.enum_ = Some(enum_.clone());
                enum_.since = self.number(&attrs, "since")?.unwrap_or(1);
                enum_.bitfield = self.boolean(&attrs, "bitfield")?;
                self.enum_ = Some(enum_);
            }
            "entry" => {
                if self.enum_.is_none() || self.entry.is_some() {
                    return Err(self.unexpected(&name));
                }
                let entry_name = self.required(&attrs, "name")?;
                self.entry = Some(Entry {
                    name: entry_name,
                    value: 0,
                    since: 1,
                    summary: attrs.get("summary").map(str::to_string),
                });
                let value = self
                    .number(&attrs, "value")?
                    .ok_or_else(|| self.error(ParseErrorKind::MissingAttribute("value")))?;
                let since = self.number(&attrs, "since")?.unwrap_or(1);
                if let Some(entry) = self.entry.as_mut() {
                    entry.value = value;
                    entry.since = since;
                }
            }
            _ => {
                log::debug!("{}: ignoring <{}>", self.context(), name);
                self.skip_depth = 1;
            }
        }
        Ok(())
    }

    fn close(&mut self, name: &[u8]) -> Result<(), ParseError> {
        if self.skip_depth > 0 {
            self.skip_depth -= 1;
            return Ok(());
        }

        match name {
            b"protocol" => self.finished = self.protocol.take(),
            b"copyright" => {
                let text = self.end_text();
                if let Some(protocol) = self.protocol.as_mut() {
                    protocol.copyright = Some(text);
                }
            }
            b"description" => {
                let body = self.end_text();
                let summary = std::mem::take(&mut self.summary);
                self.attach_description(Description { summary, body });
            }
            b"interface" => {
                if let (Some(protocol), Some(interface)) =
                    (self.protocol.as_mut(), self.interface.take())
                {
                    protocol.interfaces.push(interface);
                }
            }
            b"request" | b"event" => {
                if let (Some(interface), Some((kind, message))) =
                    (self.interface.as_mut(), self.message.take())
                {
                    match kind {
                        MessageKind::Request => interface.requests.push(message),
                        MessageKind::Event => interface.events.push(message),
                    }
                }
            }
            b"arg" => {
                if let (Some((_, message)), Some(arg)) = (self.message.as_mut(), self.arg.take()) {
                    message.args.push(arg);
                }
            }
            b"enum" => {
                if let (Some(interface), Some(enum_)) = (self.interface.as_mut(), self.enum_.take())
                {
                    interface.enums.push(enum_);
                }
            }
            b"entry" => {
                if let (Some(enum_), Some(entry)) = (self.enum_.as_mut(), self.entry.take()) {
                    enum_.entries.push(entry);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn begin_text(&mut self, target: TextTarget, summary: String) {
        self.text = Some(target);
        self.buffer.clear();
        self.summary = summary;
    }

    fn end_text(&mut self) -> String {
        self.text = None;
        normalize_text(&std::mem::take(&mut self.buffer))
    }

    fn text(&mut self, text: &str) {
        if self.text.is_some() {
            self.buffer.push_str(text);
        }
    }

    // innermost open element owns the description
    fn attach_description(&mut self, description: Description) {
        if let Some(entry) = self.entry.as_mut() {
            if entry.summary.is_none() && !description.summary.is_empty() {
                entry.summary = Some(description.summary);
            }
        } else if let Some(enum_) = self.enum_.as_mut() {
            enum_.description = Some(description);
        } else if let Some(arg) = self.arg.as_mut() {
            if arg.summary.is_none() && !description.summary.is_empty() {
                arg.summary = Some(description.summary);
            }
        } else if let Some((_, message)) = self.message.as_mut() {
            message.description = Some(description);
        } else if let Some(interface) = self.interface.as_mut() {
            interface.description = Some(description);
        } else if let Some(protocol) = self.protocol.as_mut() {
            protocol.description = Some(description);
        }
    }

    fn finish(self) -> Result<Protocol, ParseError> {
        self.finished
            .ok_or_else(|| ParseError::new("document", ParseErrorKind::MissingProtocol))
    }
}

/// Decimal or `0x` hexadecimal
fn parse_number(value: &str) -> Option<u32> {
    let value = value.trim();
    match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

// Strip the per-line indentation XML documents carry; keep paragraph breaks.
fn normalize_text(text: &str) -> String {
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    lines.join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DISPLAY_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<protocol name="wayland">
  <copyright>
    Copyright holders
  </copyright>
  <interface name="wl_display" version="1">
    <description summary="core global object">
      The core global object.
      This is a special singleton object.
    </description>
    <request name="sync">
      <description summary="asynchronous roundtrip"/>
      <arg name="callback" type="new_id" interface="wl_callback"
           summary="callback object for the sync request"/>
    </request>
    <event name="error">
      <arg name="object_id" type="object"/>
      <arg name="code" type="uint"/>
      <arg name="message" type="string"/>
    </event>
    <enum name="error">
      <entry name="invalid_object" value="0"/>
      <entry name="invalid_method" value="0x1"/>
    </enum>
  </interface>
  <interface name="wl_callback" version="1">
    <event name="done" type="destructor">
      <arg name="callback_data" type="uint"/>
    </event>
  </interface>
</protocol>
"#;

    #[test]
    fn test_parse_declaration_order() {
        let protocol = parse_str(DISPLAY_XML).unwrap();
        assert_eq!(protocol.name, "wayland");
        assert_eq!(protocol.copyright.as_deref(), Some("Copyright holders"));
        assert_eq!(protocol.interfaces.len(), 2);

        let display = &protocol.interfaces[0];
        assert_eq!(display.name, "wl_display");
        assert_eq!(display.version, 1);
        assert_eq!(display.requests[0].name, "sync");
        assert_eq!(display.requests[0].args[0].kind, ArgType::NewId);
        assert_eq!(
            display.requests[0].args[0].interface.as_deref(),
            Some("wl_callback")
        );
        let args: Vec<&str> = display.events[0]
            .args
            .iter()
            .map(|a| a.name.as_str())
            .collect();
        assert_eq!(args, ["object_id", "code", "message"]);
        assert_eq!(display.enums[0].entries[1].value, 1);

        let description = display.description.as_ref().unwrap();
        assert_eq!(description.summary, "core global object");
        assert_eq!(
            description.body,
            "The core global object.\nThis is a special singleton object."
        );

        assert!(protocol.interfaces[1].events[0].is_destructor);
    }

    #[test]
    fn test_parse_is_deterministic() {
        assert_eq!(parse_str(DISPLAY_XML).unwrap(), parse_str(DISPLAY_XML).unwrap());
    }

    #[test]
    fn test_unknown_elements_are_skipped() {
        let xml = r#"<protocol name="p">
            <interface name="a" version="1">
              <future-thing><nested/></future-thing>
              <request name="r"/>
            </interface>
          </protocol>"#;
        let protocol = parse_str(xml).unwrap();
        assert_eq!(protocol.interfaces[0].requests.len(), 1);
    }

    #[test]
    fn test_missing_attribute_names_element() {
        let xml = r#"<protocol name="p">
            <interface name="a" version="1">
              <request name="r"><arg name="x"/></request>
            </interface>
          </protocol>"#;
        let err = parse_str(xml).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::MissingAttribute("type"));
        assert_eq!(err.context, "protocol 'p' interface 'a' request 'r' arg 'x'");
    }

    #[test]
    fn test_invalid_arg_type() {
        let xml = r#"<protocol name="p">
            <interface name="a" version="1">
              <event name="e"><arg name="x" type="double"/></event>
            </interface>
          </protocol>"#;
        let err = parse_str(xml).unwrap_err();
        assert!(matches!(
            err.kind,
            ParseErrorKind::InvalidAttribute { name: "type", .. }
        ));
    }

    #[test]
    fn test_malformed_xml() {
        let err = parse_str("<protocol name=\"p\"><interface name=\"a\" version=\"1\"></protocol>")
            .unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::Xml { .. }));
    }

    #[test]
    fn test_missing_protocol() {
        let err = parse_str("<?xml version=\"1.0\"?>").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::MissingProtocol);
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("12"), Some(12));
        assert_eq!(parse_number("0x10"), Some(16));
        assert_eq!(parse_number("0xffffffff"), Some(u32::MAX));
        assert_eq!(parse_number("-1"), None);
        assert_eq!(parse_number("ten"), None);
    }
}
