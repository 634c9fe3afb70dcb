//! Minimal namespace-aware XML tree used by the signature parser and XML CVR reader,
//! plus the inclusive C14N 1.0 serializer for signed subtrees

use std::collections::BTreeMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::{NsReader, Reader};

const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub(crate) struct XmlError(pub(crate) String);

/// An element with its resolved namespace, local name, attributes and text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct XmlElement {
    pub namespace: Option<String>,
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
    pub text: String,
}

impl XmlElement {
    /// First child with the given local name
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|child| child.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |child| child.name == name)
    }

    /// First child with the given local name bound to `namespace`
    pub fn child_in(&self, namespace: &str, name: &str) -> Option<&XmlElement> {
        self.children
            .iter()
            .find(|child| child.name == name && child.namespace.as_deref() == Some(namespace))
    }

    pub fn children_in<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
    ) -> impl Iterator<Item = &'a XmlElement> {
        self.children
            .iter()
            .filter(move |child| child.name == name && child.namespace.as_deref() == Some(namespace))
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn text(&self) -> &str {
        self.text.trim()
    }

    /// Text of the first child with the given local name, if non-empty
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name)
            .map(XmlElement::text)
            .filter(|text| !text.is_empty())
    }

    /// Value carried either as an unprefixed attribute or as a nested text
    /// element bound to `namespace`. Attributes win when both are present.
    pub fn attribute_or_child_text_in(&self, namespace: &str, name: &str) -> Option<&str> {
        self.attribute(name)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .or_else(|| {
                self.child_in(namespace, name)
                    .map(XmlElement::text)
                    .filter(|text| !text.is_empty())
            })
    }
}

/// Parse a complete document into its root element
pub(crate) fn parse_document(bytes: &[u8]) -> Result<XmlElement, XmlError> {
    let mut reader = NsReader::from_reader(bytes);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        let (resolved, event) = reader
            .read_resolved_event_into(&mut buf)
            .map_err(|e| XmlError(e.to_string()))?;
        let namespace = match resolved {
            ResolveResult::Bound(Namespace(uri)) => Some(String::from_utf8_lossy(uri).into_owned()),
            ResolveResult::Unbound => None,
            ResolveResult::Unknown(prefix) => {
                return Err(XmlError(format!(
                    "undeclared namespace prefix '{}'",
                    String::from_utf8_lossy(&prefix)
                )));
            }
        };

        match event {
            Event::Start(start) => stack.push(open_element(namespace, &start)?),
            Event::Empty(start) => {
                let element = open_element(namespace, &start)?;
                attach(element, &mut stack, &mut root)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| XmlError("unbalanced end tag".to_string()))?;
                attach(element, &mut stack, &mut root)?;
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(|e| XmlError(e.to_string()))?;
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&text);
                }
            }
            Event::CData(data) => {
                let data = String::from_utf8(data.into_inner().into_owned())
                    .map_err(|e| XmlError(e.to_string()))?;
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&data);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(XmlError("unexpected end of document".to_string()));
    }
    root.ok_or_else(|| XmlError("document has no root element".to_string()))
}

fn open_element(namespace: Option<String>, start: &BytesStart<'_>) -> Result<XmlElement, XmlError> {
    let mut attributes = Vec::new();
    for attribute in start.attributes() {
        let attribute = attribute.map_err(|e| XmlError(e.to_string()))?;
        if attribute.key.as_namespace_binding().is_some() {
            continue;
        }
        let key = String::from_utf8_lossy(attribute.key.local_name().as_ref()).into_owned();
        let value = attribute
            .unescape_value()
            .map_err(|e| XmlError(e.to_string()))?
            .into_owned();
        attributes.push((key, value));
    }

    Ok(XmlElement {
        namespace,
        name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
        attributes,
        children: Vec::new(),
        text: String::new(),
    })
}

fn attach(
    element: XmlElement,
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
) -> Result<(), XmlError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => return Err(XmlError("multiple root elements".to_string())),
    }
    Ok(())
}

/// Namespace bindings and attributes one open element declares
struct Frame {
    qname: String,
    bindings: Vec<(String, String)>,
    attributes: Vec<(String, String)>,
    on_path: bool,
}

/// Inclusive C14N 1.0 of the first element reached by `path`, a list of
/// `(namespace, local name)` steps starting at the root.
///
/// The apex element carries every namespace binding in scope and the `xml:*`
/// attributes inherited from its ancestors. Whitespace text is kept, empty
/// elements are expanded, namespace declarations precede attributes, and
/// attributes are ordered by namespace URI then local name. Comments are kept
/// only when `with_comments` is set.
pub(crate) fn canonicalize_subtree(
    bytes: &[u8],
    path: &[(&str, &str)],
    with_comments: bool,
) -> Result<Vec<u8>, XmlError> {
    let mut reader = Reader::from_reader(bytes);
    reader.expand_empty_elements(true);

    let mut buf = Vec::new();
    let mut frames: Vec<Frame> = Vec::new();
    let mut out: Option<String> = None;
    let mut apex_depth = 0;

    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| XmlError(e.to_string()))?
        {
            Event::Start(start) => {
                let depth = frames.len();
                let parent_on_path = frames.last().is_none_or(|parent| parent.on_path);
                frames.push(open_frame(&start)?);

                let (namespace, local) = resolve(&frames, &frames[depth].qname, false)?;
                let on_path = parent_on_path
                    && path
                        .get(depth)
                        .is_some_and(|step| *step == (namespace.as_str(), local));
                frames[depth].on_path = on_path;

                if let Some(out) = out.as_mut() {
                    render_start(out, &frames, false)?;
                } else if on_path && depth + 1 == path.len() {
                    let mut apex = String::with_capacity(1024);
                    render_start(&mut apex, &frames, true)?;
                    out = Some(apex);
                    apex_depth = depth;
                }
            }
            Event::End(_) => {
                let frame = frames
                    .pop()
                    .ok_or_else(|| XmlError("unbalanced end tag".to_string()))?;
                if let Some(rendered) = out.as_mut() {
                    rendered.push_str("</");
                    rendered.push_str(&frame.qname);
                    rendered.push('>');
                    if frames.len() == apex_depth {
                        return Ok(out.take().unwrap_or_default().into_bytes());
                    }
                }
            }
            Event::Text(text) => {
                if let Some(out) = out.as_mut() {
                    let raw = normalize_newlines(utf8(&text)?);
                    let value =
                        quick_xml::escape::unescape(&raw).map_err(|e| XmlError(e.to_string()))?;
                    out.push_str(&escape_text(&value));
                }
            }
            Event::CData(data) => {
                if let Some(out) = out.as_mut() {
                    out.push_str(&escape_text(&normalize_newlines(utf8(&data)?)));
                }
            }
            Event::Comment(comment) => {
                if let Some(out) = out.as_mut().filter(|_| with_comments) {
                    out.push_str("<!--");
                    out.push_str(&normalize_newlines(utf8(&comment)?));
                    out.push_str("-->");
                }
            }
            Event::PI(instruction) => {
                if let Some(out) = out.as_mut() {
                    out.push_str("<?");
                    out.push_str(&normalize_newlines(utf8(&instruction)?));
                    out.push_str("?>");
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let wanted: Vec<&str> = path.iter().map(|(_, local)| *local).collect();
    Err(XmlError(format!("element {} not found", wanted.join("/"))))
}

fn open_frame(start: &BytesStart<'_>) -> Result<Frame, XmlError> {
    let mut bindings = Vec::new();
    let mut attributes = Vec::new();
    for attribute in start.attributes() {
        let attribute = attribute.map_err(|e| XmlError(e.to_string()))?;
        let key = utf8(attribute.key.as_ref())?.to_string();
        let value = attribute_value(&attribute.value)?;
        if key == "xmlns" {
            bindings.push((String::new(), value));
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            bindings.push((prefix.to_string(), value));
        } else {
            attributes.push((key, value));
        }
    }

    Ok(Frame {
        qname: utf8(start.name().as_ref())?.to_string(),
        bindings,
        attributes,
        on_path: false,
    })
}

/// Namespace URI and local part of `qname` in the scope of `frames`.
/// Unprefixed attributes are never in the default namespace.
fn resolve<'q>(
    frames: &[Frame],
    qname: &'q str,
    is_attribute: bool,
) -> Result<(String, &'q str), XmlError> {
    let (prefix, local) = match qname.split_once(':') {
        Some((prefix, local)) => (prefix, local),
        None if is_attribute => return Ok((String::new(), qname)),
        None => ("", qname),
    };
    if prefix == "xml" {
        return Ok((XML_NAMESPACE.to_string(), local));
    }

    match in_scope(frames).remove(prefix) {
        Some(uri) => Ok((uri, local)),
        None if prefix.is_empty() => Ok((String::new(), local)),
        None => Err(XmlError(format!("undeclared namespace prefix '{prefix}'"))),
    }
}

/// Bindings visible at the innermost frame, keyed by prefix (`""` is the default)
fn in_scope(frames: &[Frame]) -> BTreeMap<String, String> {
    let mut scope = BTreeMap::new();
    for frame in frames {
        for (prefix, uri) in &frame.bindings {
            scope.insert(prefix.clone(), uri.clone());
        }
    }
    scope
}

fn render_start(out: &mut String, frames: &[Frame], apex: bool) -> Result<(), XmlError> {
    let Some((element, ancestors)) = frames.split_last() else {
        return Ok(());
    };

    let scope = in_scope(frames);
    let rendered = if apex { BTreeMap::new() } else { in_scope(ancestors) };

    out.push('<');
    out.push_str(&element.qname);

    for (prefix, uri) in &scope {
        if prefix == "xml" {
            continue;
        }
        let parent = rendered.get(prefix).map(String::as_str);
        let changed = if prefix.is_empty() {
            uri.as_str() != parent.unwrap_or("")
        } else {
            Some(uri.as_str()) != parent
        };
        if !changed {
            continue;
        }
        if prefix.is_empty() {
            out.push_str(" xmlns=\"");
        } else {
            out.push_str(" xmlns:");
            out.push_str(prefix);
            out.push_str("=\"");
        }
        out.push_str(&escape_attribute(uri));
        out.push('"');
    }

    let mut attributes = element.attributes.clone();
    if apex {
        for ancestor in ancestors.iter().rev() {
            for (key, value) in &ancestor.attributes {
                if key.starts_with("xml:") && !attributes.iter().any(|(k, _)| k == key) {
                    attributes.push((key.clone(), value.clone()));
                }
            }
        }
    }

    let mut keyed = Vec::with_capacity(attributes.len());
    for (key, value) in attributes {
        let (namespace, local) = resolve(frames, &key, true)?;
        let local = local.to_string();
        keyed.push(((namespace, local), key, value));
    }
    keyed.sort_by(|a, b| a.0.cmp(&b.0));

    for (_, key, value) in keyed {
        out.push(' ');
        out.push_str(&key);
        out.push_str("=\"");
        out.push_str(&escape_attribute(&value));
        out.push('"');
    }
    out.push('>');
    Ok(())
}

/// Attribute value after XML end-of-line and whitespace normalization
fn attribute_value(raw: &[u8]) -> Result<String, XmlError> {
    let normalized = utf8(raw)?
        .replace("\r\n", " ")
        .replace(['\r', '\n', '\t'], " ");
    quick_xml::escape::unescape(&normalized)
        .map(|value| value.into_owned())
        .map_err(|e| XmlError(e.to_string()))
}

fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

fn utf8(bytes: &[u8]) -> Result<&str, XmlError> {
    std::str::from_utf8(bytes).map_err(|e| XmlError(e.to_string()))
}

/// Escape an attribute value the way C14N renders it
pub(crate) fn escape_attribute(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            c => out.push(c),
        }
    }
    out
}

/// Escape character data the way C14N renders it
pub(crate) fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_document_with_prefix() {
        let doc = br#"<?xml version="1.0"?>
            <ds:Root xmlns:ds="urn:example" Kind="a &amp; b">
                <ds:Child>  hello  </ds:Child>
                <ds:Empty Value="x"/>
            </ds:Root>"#;

        let root = parse_document(doc).unwrap();
        assert_eq!(root.name, "Root");
        assert_eq!(root.namespace.as_deref(), Some("urn:example"));
        assert_eq!(root.attribute("Kind"), Some("a & b"));
        assert_eq!(root.child_text("Child"), Some("hello"));
        assert_eq!(root.child("Empty").unwrap().attribute("Value"), Some("x"));
    }

    #[test]
    fn test_attribute_or_child_text() {
        let attr_style = parse_document(br#"<M xmlns="urn:a" Algorithm="urn:alg"/>"#).unwrap();
        let element_style =
            parse_document(br#"<M xmlns="urn:a"><Algorithm>urn:alg</Algorithm></M>"#).unwrap();
        assert_eq!(attr_style.attribute_or_child_text_in("urn:a", "Algorithm"), Some("urn:alg"));
        assert_eq!(element_style.attribute_or_child_text_in("urn:a", "Algorithm"), Some("urn:alg"));
        assert_eq!(element_style.attribute_or_child_text_in("urn:a", "Missing"), None);
    }

    #[test]
    fn test_namespaced_child_lookup() {
        let doc = parse_document(
            br#"<ds:Root xmlns:ds="urn:a" xmlns:o="urn:b"><o:Item/><ds:Item Value="x"/></ds:Root>"#,
        )
        .unwrap();
        assert_eq!(doc.child("Item").unwrap().namespace.as_deref(), Some("urn:b"));
        assert_eq!(doc.child_in("urn:a", "Item").unwrap().attribute("Value"), Some("x"));
        assert!(doc.child_in("urn:c", "Item").is_none());
        assert_eq!(doc.children_in("urn:b", "Item").count(), 1);

        let nested = parse_document(br#"<M xmlns="urn:a"><Algorithm>urn:alg</Algorithm></M>"#).unwrap();
        assert_eq!(nested.attribute_or_child_text_in("urn:a", "Algorithm"), Some("urn:alg"));
        assert_eq!(nested.attribute_or_child_text_in("urn:b", "Algorithm"), None);
    }

    #[test]
    fn test_canonical_subtree_carries_inherited_namespaces() {
        let doc = b"<?xml version=\"1.0\"?>\r\n<r:Root xmlns:r=\"urn:r\" xmlns=\"urn:d\" xmlns:z=\"urn:z\" xml:lang=\"en\">\r\n  <r:Part b=\"2\" a=\"1&amp;\" z:c=\"3\" Id=\"p\">\r\n    <Empty/>\r\n    <!-- note -->\r\n    <r:Text>a &lt; b</r:Text>\r\n  </r:Part>\r\n</r:Root>";

        let canonical = canonicalize_subtree(doc, &[("urn:r", "Root"), ("urn:r", "Part")], false).unwrap();
        assert_eq!(
            String::from_utf8(canonical).unwrap(),
            "<r:Part xmlns=\"urn:d\" xmlns:r=\"urn:r\" xmlns:z=\"urn:z\" Id=\"p\" a=\"1&amp;\" b=\"2\" xml:lang=\"en\" z:c=\"3\">\n    <Empty></Empty>\n    \n    <r:Text>a &lt; b</r:Text>\n  </r:Part>"
        );

        let with_comments =
            canonicalize_subtree(doc, &[("urn:r", "Root"), ("urn:r", "Part")], true).unwrap();
        assert!(String::from_utf8(with_comments).unwrap().contains("\n    <!-- note -->\n"));
    }

    #[test]
    fn test_canonical_subtree_renders_only_changed_bindings() {
        let doc = br#"<a:Root xmlns:a="urn:a"><a:Inner xmlns="urn:d"><Leaf xmlns:a="urn:a"><Bare xmlns=""/></Leaf></a:Inner></a:Root>"#;
        let canonical = canonicalize_subtree(doc, &[("urn:a", "Root"), ("urn:a", "Inner")], false).unwrap();
        assert_eq!(
            String::from_utf8(canonical).unwrap(),
            r#"<a:Inner xmlns="urn:d" xmlns:a="urn:a"><Leaf><Bare xmlns=""></Bare></Leaf></a:Inner>"#
        );
    }

    #[test]
    fn test_canonical_subtree_requires_namespace_match() {
        let doc = br#"<Root xmlns="urn:a"><o:Part xmlns:o="urn:other"/><Part>x</Part></Root>"#;
        let canonical = canonicalize_subtree(doc, &[("urn:a", "Root"), ("urn:a", "Part")], false).unwrap();
        assert_eq!(canonical, br#"<Part xmlns="urn:a">x</Part>"#);

        assert!(canonicalize_subtree(doc, &[("urn:a", "Root"), ("urn:a", "Missing")], false).is_err());
        assert!(canonicalize_subtree(br#"<a><p:b/></a>"#, &[("", "a"), ("", "b")], false).is_err());
    }

    #[test]
    fn test_rejects_malformed_documents() {
        assert!(parse_document(b"<a><b></a>").is_err());
        assert!(parse_document(b"<a>").is_err());
        assert!(parse_document(b"").is_err());
        assert!(parse_document(b"<p:a/>").is_err());
    }
}
