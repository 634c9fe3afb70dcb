//! Detached XML signature documents
//!
//! Vendors ship each export with an XML-DSig `Signature` document. Two
//! encodings are seen in practice: algorithm identifiers, the reference URI and
//! the RSA key components either as XML attributes
//! (`<DigestMethod Algorithm="..."/>`) or as nested text elements
//! (`<DigestMethod><Algorithm>...</Algorithm></DigestMethod>`). Both parse to
//! the same [`SignatureBlock`] fields. The signed bytes are the inclusive
//! C14N 1.0 form of the `SignedInfo` element exactly as the document carries it.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::crypto::CryptoUtils;
use crate::crypto::verifier::C14N_1_0_WITH_COMMENTS;
use crate::xml::{self, XmlElement, escape_attribute, escape_text};

/// XML-DSig namespace the `Signature` root must be bound to
pub const XMLDSIG_NAMESPACE: &str = "http://www.w3.org/2000/09/xmldsig#";

/// Failure to turn a signature document into a [`SignatureBlock`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("malformed XML: {0}")]
    Xml(String),

    #[error("root element must be Signature in the XML-DSig namespace, found {0}")]
    WrongRoot(String),

    #[error("missing field {0}")]
    MissingField(&'static str),

    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("cannot read {path}: {message}")]
    Unreadable { path: PathBuf, message: String },
}

/// Layout used when rendering a block back to XML
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldEncoding {
    Attributes,
    Elements,
}

/// Raw field values for building a [`SignatureBlock`] directly
#[derive(Debug, Clone, Default)]
pub struct SignatureBlockParts {
    pub canonicalization_method: String,
    pub signature_method: String,
    pub reference_uri: String,
    pub digest_method: String,
    pub digest_value: String,
    pub signature_value: String,
    pub modulus: String,
    pub exponent: String,
}

const SIGNED_INFO_PATH: [(&str, &str); 2] = [
    (XMLDSIG_NAMESPACE, "Signature"),
    (XMLDSIG_NAMESPACE, "SignedInfo"),
];

/// Parsed signature document. Encoded values are stored as compact base64.
///
/// Equality compares the field values only, so the same signature read from
/// either encoding compares equal even though the signed bytes differ.
#[derive(Debug, Clone, Serialize)]
pub struct SignatureBlock {
    canonicalization_method: String,
    signature_method: String,
    reference_uri: String,
    digest_method: String,
    digest_value: String,
    signature_value: String,
    modulus: String,
    exponent: String,
    #[serde(skip)]
    signed_info: Vec<u8>,
}

impl PartialEq for SignatureBlock {
    fn eq(&self, other: &Self) -> bool {
        self.canonicalization_method == other.canonicalization_method
            && self.signature_method == other.signature_method
            && self.reference_uri == other.reference_uri
            && self.digest_method == other.digest_method
            && self.digest_value == other.digest_value
            && self.signature_value == other.signature_value
            && self.modulus == other.modulus
            && self.exponent == other.exponent
    }
}

impl Eq for SignatureBlock {}

impl SignatureBlock {
    /// Validate and assemble a block from raw parts. The signed bytes are those
    /// of the attribute-encoded document [`SignatureBlock::to_xml`] renders.
    pub fn from_parts(parts: SignatureBlockParts) -> Result<Self, ParseError> {
        let mut block = Self::validate(parts)?;
        let rendered = block.to_xml(FieldEncoding::Attributes);
        block.signed_info = block.canonical_signed_info(rendered.as_bytes())?;
        Ok(block)
    }

    fn validate(parts: SignatureBlockParts) -> Result<Self, ParseError> {
        let required = |value: String, field: &'static str| {
            let value = value.trim().to_string();
            if value.is_empty() {
                Err(ParseError::MissingField(field))
            } else {
                Ok(value)
            }
        };

        Ok(Self {
            canonicalization_method: required(
                parts.canonicalization_method,
                "SignedInfo/CanonicalizationMethod/@Algorithm",
            )?,
            signature_method: required(parts.signature_method, "SignedInfo/SignatureMethod/@Algorithm")?,
            reference_uri: required(parts.reference_uri, "SignedInfo/Reference/@URI")?,
            digest_method: required(parts.digest_method, "Reference/DigestMethod/@Algorithm")?,
            digest_value: base64_field(&parts.digest_value, "Reference/DigestValue")?,
            signature_value: base64_field(&parts.signature_value, "SignatureValue")?,
            modulus: base64_field(&parts.modulus, "RSAKeyValue/Modulus")?,
            exponent: base64_field(&parts.exponent, "RSAKeyValue/Exponent")?,
            signed_info: Vec::new(),
        })
    }

    /// C14N of the `SignedInfo` element in `document`
    fn canonical_signed_info(&self, document: &[u8]) -> Result<Vec<u8>, ParseError> {
        let with_comments = self.canonicalization_method == C14N_1_0_WITH_COMMENTS;
        xml::canonicalize_subtree(document, &SIGNED_INFO_PATH, with_comments)
            .map_err(|e| ParseError::Xml(e.0))
    }

    pub fn canonicalization_method(&self) -> &str {
        &self.canonicalization_method
    }

    pub fn signature_method(&self) -> &str {
        &self.signature_method
    }

    pub fn reference_uri(&self) -> &str {
        &self.reference_uri
    }

    pub fn digest_method(&self) -> &str {
        &self.digest_method
    }

    pub fn digest_value(&self) -> &str {
        &self.digest_value
    }

    pub fn signature_value(&self) -> &str {
        &self.signature_value
    }

    pub fn modulus(&self) -> &str {
        &self.modulus
    }

    pub fn exponent(&self) -> &str {
        &self.exponent
    }

    /// Canonical `SignedInfo` bytes the `SignatureValue` is computed over
    pub fn signed_info(&self) -> &[u8] {
        &self.signed_info
    }

    /// Render the block as a signature document
    pub fn to_xml(&self, encoding: FieldEncoding) -> String {
        let field = |element: &str, name: &str, value: &str| match encoding {
            FieldEncoding::Attributes => {
                format!("<{element} {name}=\"{}\"/>", escape_attribute(value))
            }
            FieldEncoding::Elements => format!(
                "<{element}><{name}>{}</{name}></{element}>",
                escape_text(value)
            ),
        };
        let reference_open = match encoding {
            FieldEncoding::Attributes => {
                format!("<Reference URI=\"{}\">", escape_attribute(&self.reference_uri))
            }
            FieldEncoding::Elements => {
                format!("<Reference><URI>{}</URI>", escape_text(&self.reference_uri))
            }
        };
        let key_value = match encoding {
            FieldEncoding::Attributes => format!(
                "<RSAKeyValue Modulus=\"{}\" Exponent=\"{}\"/>",
                self.modulus, self.exponent
            ),
            FieldEncoding::Elements => format!(
                "<RSAKeyValue><Modulus>{}</Modulus><Exponent>{}</Exponent></RSAKeyValue>",
                self.modulus, self.exponent
            ),
        };

        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <Signature xmlns=\"{XMLDSIG_NAMESPACE}\">\n\
             <SignedInfo>\n{}\n{}\n{}\n{}\n<DigestValue>{}</DigestValue>\n</Reference>\n</SignedInfo>\n\
             <SignatureValue>{}</SignatureValue>\n\
             <KeyInfo><KeyValue>{}</KeyValue></KeyInfo>\n\
             </Signature>\n",
            field("CanonicalizationMethod", "Algorithm", &self.canonicalization_method),
            field("SignatureMethod", "Algorithm", &self.signature_method),
            reference_open,
            field("DigestMethod", "Algorithm", &self.digest_method),
            self.digest_value,
            self.signature_value,
            key_value,
        )
    }
}

/// Parser for detached signature documents
pub struct SignedDocumentParser;

impl SignedDocumentParser {
    /// Parse a signature document; any missing or invalid field fails the whole parse
    pub fn parse(bytes: &[u8]) -> Result<SignatureBlock, ParseError> {
        let root = xml::parse_document(bytes).map_err(|e| ParseError::Xml(e.0))?;

        if root.name != "Signature" || root.namespace.as_deref() != Some(XMLDSIG_NAMESPACE) {
            return Err(ParseError::WrongRoot(format!(
                "{{{}}}{}",
                root.namespace.as_deref().unwrap_or(""),
                root.name
            )));
        }

        let signed_info = required_child(&root, "SignedInfo", "Signature/SignedInfo")?;
        let references: Vec<&XmlElement> =
            signed_info.children_in(XMLDSIG_NAMESPACE, "Reference").collect();
        let reference = match references.as_slice() {
            [] => return Err(ParseError::MissingField("SignedInfo/Reference")),
            [single] => *single,
            _ => {
                return Err(ParseError::InvalidField {
                    field: "SignedInfo/Reference",
                    reason: format!("expected exactly one reference, found {}", references.len()),
                });
            }
        };

        let key_value = root
            .child_in(XMLDSIG_NAMESPACE, "KeyInfo")
            .and_then(|info| info.child_in(XMLDSIG_NAMESPACE, "KeyValue"))
            .and_then(|value| value.child_in(XMLDSIG_NAMESPACE, "RSAKeyValue"))
            .ok_or(ParseError::MissingField("KeyInfo/KeyValue/RSAKeyValue"))?;

        let mut block = SignatureBlock::validate(SignatureBlockParts {
            canonicalization_method: algorithm(
                signed_info,
                "CanonicalizationMethod",
                "SignedInfo/CanonicalizationMethod/@Algorithm",
            )?,
            signature_method: algorithm(
                signed_info,
                "SignatureMethod",
                "SignedInfo/SignatureMethod/@Algorithm",
            )?,
            reference_uri: reference
                .attribute_or_child_text_in(XMLDSIG_NAMESPACE, "URI")
                .ok_or(ParseError::MissingField("SignedInfo/Reference/@URI"))?
                .to_string(),
            digest_method: algorithm(
                reference,
                "DigestMethod",
                "Reference/DigestMethod/@Algorithm",
            )?,
            digest_value: dsig_text(reference, "DigestValue")
                .ok_or(ParseError::MissingField("Reference/DigestValue"))?
                .to_string(),
            signature_value: dsig_text(&root, "SignatureValue")
                .ok_or(ParseError::MissingField("SignatureValue"))?
                .to_string(),
            modulus: key_value
                .attribute_or_child_text_in(XMLDSIG_NAMESPACE, "Modulus")
                .ok_or(ParseError::MissingField("RSAKeyValue/Modulus"))?
                .to_string(),
            exponent: key_value
                .attribute_or_child_text_in(XMLDSIG_NAMESPACE, "Exponent")
                .ok_or(ParseError::MissingField("RSAKeyValue/Exponent"))?
                .to_string(),
        })?;
        block.signed_info = block.canonical_signed_info(bytes)?;
        Ok(block)
    }

    /// Read and parse a signature document from disk
    pub fn parse_file(path: &Path) -> Result<SignatureBlock, ParseError> {
        let bytes = std::fs::read(path).map_err(|e| ParseError::Unreadable {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::parse(&bytes)
    }
}

fn required_child<'a>(
    parent: &'a XmlElement,
    name: &str,
    field: &'static str,
) -> Result<&'a XmlElement, ParseError> {
    parent
        .child_in(XMLDSIG_NAMESPACE, name)
        .ok_or(ParseError::MissingField(field))
}

fn dsig_text<'a>(parent: &'a XmlElement, name: &str) -> Option<&'a str> {
    parent
        .child_in(XMLDSIG_NAMESPACE, name)
        .map(XmlElement::text)
        .filter(|text| !text.is_empty())
}

fn algorithm(parent: &XmlElement, element: &str, field: &'static str) -> Result<String, ParseError> {
    parent
        .child_in(XMLDSIG_NAMESPACE, element)
        .and_then(|method| method.attribute_or_child_text_in(XMLDSIG_NAMESPACE, "Algorithm"))
        .map(str::to_string)
        .ok_or(ParseError::MissingField(field))
}

fn base64_field(value: &str, field: &'static str) -> Result<String, ParseError> {
    let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Err(ParseError::MissingField(field));
    }
    CryptoUtils::decode_base64(&compact).map_err(|e| ParseError::InvalidField {
        field,
        reason: e.to_string(),
    })?;
    Ok(compact)
}
