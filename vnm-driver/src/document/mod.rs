//! VM description document model.
//!
//! A VM description is an XML document rooted at the VM element. It is parsed
//! once into an immutable [`Element`] tree and then only read through path
//! queries (see [`path`] for the supported grammar).

pub mod path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::debug;

use crate::error::{DriverError, Result};

/// Deepest element nesting accepted by [`VmDocument::parse`]. Readers walk
/// the tree recursively, so anything deeper is rejected as malformed.
pub const MAX_DEPTH: usize = 1024;

/// Decode a base64 VM description. Line breaks and other whitespace are
/// ignored.
pub fn decode_base64(vm_64: &str) -> Result<Vec<u8>> {
    let compact: String = vm_64.chars().filter(|c| !c.is_whitespace()).collect();
    Ok(STANDARD.decode(compact)?)
}

/// One element of a parsed VM description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
    text: Option<String>,
}

impl Element {
    /// Tag name, as written in the document.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value of an attribute, if present.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Direct child elements in document order.
    pub fn children(&self) -> &[Element] {
        &self.children
    }

    /// Whether the element has at least one child element.
    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Text directly inside the element. Whitespace-only content counts as
    /// no text.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// All elements matching `path`, evaluated with this element as context.
    pub fn select(&self, path: &str) -> Vec<&Element> {
        path::select(self, path)
    }

    /// First element matching `path`.
    pub fn first(&self, path: &str) -> Option<&Element> {
        self.select(path).into_iter().next()
    }

    /// Text of the first element matching `path`.
    pub fn field(&self, path: &str) -> Option<String> {
        self.first(path)
            .and_then(|el| el.text())
            .map(str::to_string)
    }
}

/// Parsed VM description.
#[derive(Debug, Clone)]
pub struct VmDocument {
    root: Element,
}

impl VmDocument {
    /// Parse a serialized VM description.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::from_reader(bytes);
        let mut buf = Vec::new();
        let mut stack: Vec<OpenElement> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(start) => {
                    ensure_single_root(&stack, &root)?;
                    ensure_depth(&stack)?;
                    stack.push(OpenElement::new(&start)?);
                }
                Event::Empty(start) => {
                    ensure_single_root(&stack, &root)?;
                    ensure_depth(&stack)?;
                    let element = OpenElement::new(&start)?.finish();
                    attach(&mut stack, &mut root, element);
                }
                Event::End(end) => {
                    let open = stack.pop().ok_or_else(|| {
                        DriverError::Parse(format!(
                            "unexpected closing tag </{}>",
                            String::from_utf8_lossy(end.name().as_ref())
                        ))
                    })?;
                    attach(&mut stack, &mut root, open.finish());
                }
                Event::Text(text) => {
                    let value = text.unescape()?;
                    push_text(&mut stack, &value)?;
                }
                Event::CData(data) => {
                    let value = String::from_utf8(data.into_inner().into_owned())
                        .map_err(|e| DriverError::Parse(e.to_string()))?;
                    push_text(&mut stack, &value)?;
                }
                Event::Eof => break,
                // Declarations, comments, processing instructions, doctype
                _ => {}
            }
            buf.clear();
        }

        if let Some(open) = stack.last() {
            return Err(DriverError::Parse(format!(
                "element <{}> is never closed",
                open.element.name
            )));
        }

        let root = root.ok_or_else(|| {
            DriverError::Parse("document has no root element".to_string())
        })?;

        debug!(root = %root.name, "Parsed VM description");

        Ok(Self { root })
    }

    /// Parse a base64 encoded VM description.
    pub fn from_base64(vm_64: &str) -> Result<Self> {
        Self::parse(&decode_base64(vm_64)?)
    }

    /// The VM element.
    pub fn root(&self) -> &Element {
        &self.root
    }

    /// Text of the first element matching `path`, relative to the root.
    pub fn field(&self, path: &str) -> Option<String> {
        self.root.field(path)
    }

    /// All elements matching `path` in document order.
    pub fn elements(&self, path: &str) -> Vec<&Element> {
        self.root.select(path)
    }
}

/// Element whose closing tag has not been read yet.
struct OpenElement {
    element: Element,
    text: String,
}

impl OpenElement {
    fn new(start: &BytesStart<'_>) -> Result<Self> {
        let name = std::str::from_utf8(start.name().as_ref())
            .map_err(|e| DriverError::Parse(e.to_string()))?
            .to_string();

        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| DriverError::Parse(e.to_string()))?;
            let key = std::str::from_utf8(attr.key.as_ref())
                .map_err(|e| DriverError::Parse(e.to_string()))?
                .to_string();
            let value = attr.unescape_value()?.into_owned();
            attributes.push((key, value));
        }

        Ok(Self {
            element: Element {
                name,
                attributes,
                children: Vec::new(),
                text: None,
            },
            text: String::new(),
        })
    }

    fn finish(mut self) -> Element {
        if !self.text.trim().is_empty() {
            self.element.text = Some(self.text);
        }
        self.element
    }
}

fn ensure_single_root(stack: &[OpenElement], root: &Option<Element>) -> Result<()> {
    if stack.is_empty() && root.is_some() {
        return Err(DriverError::Parse(
            "document has more than one root element".to_string(),
        ));
    }
    Ok(())
}

fn ensure_depth(stack: &[OpenElement]) -> Result<()> {
    if stack.len() >= MAX_DEPTH {
        return Err(DriverError::Parse(format!(
            "document nested deeper than {} elements",
            MAX_DEPTH
        )));
    }
    Ok(())
}

fn attach(stack: &mut [OpenElement], root: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.element.children.push(element),
        None => *root = Some(element),
    }
}

fn push_text(stack: &mut [OpenElement], value: &str) -> Result<()> {
    match stack.last_mut() {
        Some(open) => {
            open.text.push_str(value);
            Ok(())
        }
        None if value.trim().is_empty() => Ok(()),
        None => Err(DriverError::Parse(
            "text outside of the root element".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VM: &str = r#"<?xml version="1.0"?>
<VM>
  <ID>42</ID>
  <NAME>web-1</NAME>
  <DEPLOY_ID></DEPLOY_ID>
  <TEMPLATE>
    <NIC>
      <BRIDGE>br0</BRIDGE>
      <MAC><![CDATA[02:00:00:00:00:01]]></MAC>
    </NIC>
    <NIC>
      <BRIDGE>br1</BRIDGE>
      <MAC>02:00:00:00:00:02</MAC>
    </NIC>
    <CONTEXT network="YES"/>
  </TEMPLATE>
</VM>"#;

    #[test]
    fn test_field_lookup() {
        let doc = VmDocument::parse(VM.as_bytes()).unwrap();

        assert_eq!(doc.root().name(), "VM");
        assert_eq!(doc.field("ID").as_deref(), Some("42"));
        assert_eq!(doc.field("NAME").as_deref(), Some("web-1"));
        assert_eq!(doc.field("TEMPLATE/NIC/BRIDGE").as_deref(), Some("br0"));
        assert_eq!(doc.field("TEMPLATE/NIC/MAC").as_deref(), Some("02:00:00:00:00:01"));
    }

    #[test]
    fn test_field_without_text_is_none() {
        let doc = VmDocument::parse(VM.as_bytes()).unwrap();

        assert_eq!(doc.field("DEPLOY_ID"), None);
        assert_eq!(doc.field("TEMPLATE/CONTEXT"), None);
        assert_eq!(doc.field("MISSING"), None);
    }

    #[test]
    fn test_elements_in_document_order() {
        let doc = VmDocument::parse(VM.as_bytes()).unwrap();
        let nics = doc.elements("TEMPLATE/NIC");

        assert_eq!(nics.len(), 2);
        assert_eq!(nics[0].field("BRIDGE").as_deref(), Some("br0"));
        assert_eq!(nics[1].field("BRIDGE").as_deref(), Some("br1"));
    }

    #[test]
    fn test_attributes_and_entities() {
        let doc = VmDocument::parse(
            br#"<VM><NAME>a &amp; b</NAME><CONTEXT network="YES"/></VM>"#,
        )
        .unwrap();

        assert_eq!(doc.field("NAME").as_deref(), Some("a & b"));
        let context = doc.root().first("CONTEXT").unwrap();
        assert_eq!(context.attribute("network"), Some("YES"));
        assert_eq!(context.attribute("other"), None);
    }

    #[test]
    fn test_from_base64_ignores_line_breaks() {
        // <VM><NAME>b64</NAME></VM>
        let doc = VmDocument::from_base64("PFZNPjxOQU1FPmI2NDwv\nTkFNRT48L1ZNPg==\n").unwrap();
        assert_eq!(doc.field("NAME").as_deref(), Some("b64"));

        assert!(matches!(VmDocument::from_base64("not base64!"), Err(DriverError::Decode(_))));
    }

    #[test]
    fn test_malformed_documents() {
        let cases: [&[u8]; 10] = [
            b"",
            b"<VM><NAME>x</VM>",
            b"<VM><NAME>x</NAME>",
            b"<VM/><VM/>",
            b"stray<VM/>",
            b"<VM></NAME></VM>",
            b"<VM><NAME>\xff\xfe</NAME></VM>",
            b"<VM><CONTEXT network=\"\xff\xfe\"/></VM>",
            b"<VM><NAME>&bogus;</NAME></VM>",
            b"<VM><CONTEXT network=\"&bogus;\"/></VM>",
        ];

        for case in cases {
            let result = VmDocument::parse(case);
            assert!(
                matches!(result, Err(DriverError::Parse(_))),
                "expected parse error for {:?}",
                String::from_utf8_lossy(case)
            );
        }
    }

    fn nested(depth: usize) -> String {
        let mut xml = String::from("<VM><TEMPLATE><NIC><BRIDGE>br0</BRIDGE>");
        xml.push_str(&"<A>".repeat(depth));
        xml.push_str(&"</A>".repeat(depth));
        xml.push_str("</NIC></TEMPLATE></VM>");
        xml
    }

    #[test]
    fn test_nesting_depth_is_capped() {
        // VM, TEMPLATE and NIC take three levels
        let doc = VmDocument::parse(nested(MAX_DEPTH - 3).as_bytes()).unwrap();
        assert_eq!(doc.field("TEMPLATE/NIC/BRIDGE").as_deref(), Some("br0"));

        let result = VmDocument::parse(nested(MAX_DEPTH - 2).as_bytes());
        assert!(matches!(result, Err(DriverError::Parse(msg)) if msg.contains("nested deeper")));

        let result = VmDocument::parse(nested(20_000).as_bytes());
        assert!(matches!(result, Err(DriverError::Parse(_))));

        let result = VmDocument::parse(b"<VM><A/></VM>".as_slice());
        assert!(result.is_ok());
    }
}
