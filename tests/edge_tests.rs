//! Edge cases for the admission gate and sealed artifacts

mod common;

use std::fs;
use std::path::Path;

use sha2::{Digest, Sha256};
use tally::{
    Error,
    config::IntegrityConfig,
    crypto::{
        AuditTrail, ContentHasher, CryptoUtils, FailureReason, ParseError, SealCheck,
        SignatureVerifier, SignedDocumentParser, TrustAnchorRegistry, VerificationOutcome,
        check_sealed_artifact, signed_document::FieldEncoding,
    },
    types::{SourceDescriptor, SourceKind},
};

use common::{VendorKey, ingestor, write_signed_export, xml_cvr};

fn signed_source(path: &Path) -> SourceDescriptor {
    SourceDescriptor::new(
        "edge",
        path,
        SourceKind::SignedXml {
            contest_id: "7".to_string(),
        },
    )
}

#[test]
fn test_element_encoded_signature_is_accepted() {
    let root = tempfile::tempdir().unwrap();
    let vendor = VendorKey::load();
    let file = root.path().join("cvr_000.xml");
    fs::write(&file, xml_cvr("g-1", "P1", &[("Alice", 1)])).unwrap();
    let signature = vendor.sign_file(&file, FieldEncoding::Elements);

    let xml = fs::read_to_string(&signature).unwrap();
    assert!(xml.contains("<URI>cvr_000.xml</URI>"));

    let records = ingestor(vendor.registry())
        .ingest(&signed_source(&file))
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].record_id, "g-1");
}

#[test]
fn test_vendor_style_prefixed_signature_is_accepted() {
    println!("🔏 Testing a tab-indented ds: signature written by hand...");

    let root = tempfile::tempdir().unwrap();
    let vendor = VendorKey::load();
    let file = root.path().join("cvr_000.xml");
    let payload = xml_cvr("g-1", "P1", &[("Alice", 1), ("Bob", 2)]);
    fs::write(&file, &payload).unwrap();

    let digest = CryptoUtils::encode_base64(&Sha256::digest(payload.replace("\r\n", "\n")));
    let (modulus, exponent) = vendor.key_components();
    let dsig = "http://www.w3.org/2000/09/xmldsig#";
    let c14n = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
    let rsa = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
    let sha = "http://www.w3.org/2001/04/xmlenc#sha256";

    // What the vendor's signer feeds to RSA for this SignedInfo
    let canonical = format!(
        "<ds:SignedInfo xmlns:ds=\"{dsig}\" xmlns:vnd=\"urn:vendor:cvr\">\n\t\t\
         <ds:CanonicalizationMethod Algorithm=\"{c14n}\"></ds:CanonicalizationMethod>\n\t\t\
         <ds:SignatureMethod Algorithm=\"{rsa}\"></ds:SignatureMethod>\n\t\t\
         <ds:Reference URI=\"exports/cvr_000.xml\">\n\t\t\t\
         <ds:DigestMethod Algorithm=\"{sha}\"></ds:DigestMethod>\n\t\t\t\
         <ds:DigestValue>{digest}</ds:DigestValue>\n\t\t\
         </ds:Reference>\n\t\
         </ds:SignedInfo>"
    );
    let document = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <ds:Signature xmlns:ds=\"{dsig}\" xmlns:vnd=\"urn:vendor:cvr\" vnd:Build=\"7.2\">\n\t\
         <ds:SignedInfo>\n\t\t\
         <ds:CanonicalizationMethod Algorithm=\"{c14n}\"/>\n\t\t\
         <ds:SignatureMethod Algorithm=\"{rsa}\"/>\n\t\t\
         <ds:Reference URI=\"exports/cvr_000.xml\">\n\t\t\t\
         <ds:DigestMethod Algorithm=\"{sha}\"/>\n\t\t\t\
         <ds:DigestValue>{digest}</ds:DigestValue>\n\t\t\
         </ds:Reference>\n\t\
         </ds:SignedInfo>\n\t\
         <ds:SignatureValue>{signature}</ds:SignatureValue>\n\t\
         <ds:KeyInfo>\n\t\t<ds:KeyValue>\n\t\t\t<ds:RSAKeyValue>\n\t\t\t\t\
         <ds:Modulus>{modulus}</ds:Modulus>\n\t\t\t\t\
         <ds:Exponent>{exponent}</ds:Exponent>\n\t\t\t\
         </ds:RSAKeyValue>\n\t\t</ds:KeyValue>\n\t</ds:KeyInfo>\n\
         </ds:Signature>\n",
        signature = vendor.sign_bytes(canonical.as_bytes()),
    );
    fs::write(root.path().join("cvr_000.xml.sig.xml"), &document).unwrap();

    let block = SignedDocumentParser::parse(document.as_bytes()).unwrap();
    assert_eq!(block.signed_info(), canonical.as_bytes());

    let ingestor = ingestor(vendor.registry());
    let records = ingestor.ingest(&signed_source(&file)).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].record_id, "g-1");
    assert_eq!(ingestor.trail().statistics().unwrap().sources_verified, 1);
    println!("✅ Hand-written signature verified over its own SignedInfo");
}

#[test]
fn test_both_encodings_parse_to_same_block() {
    let vendor = VendorKey::load();
    let block = vendor.sign(b"<Cvr/>", "cvr_000.xml");

    let from_attributes =
        SignedDocumentParser::parse(block.to_xml(FieldEncoding::Attributes).as_bytes()).unwrap();
    let from_elements =
        SignedDocumentParser::parse(block.to_xml(FieldEncoding::Elements).as_bytes()).unwrap();
    assert_eq!(from_attributes, from_elements);
    assert_eq!(from_attributes, block);
}

#[test]
fn test_signature_for_another_file_is_rejected() {
    let root = tempfile::tempdir().unwrap();
    let vendor = VendorKey::load();
    let files = write_signed_export(
        &vendor,
        root.path(),
        &[("g-1", &[("Alice", 1)]), ("g-2", &[("Alice", 1)])],
    );

    // A valid signature over the first CVR, presented as the second's
    let other = vendor.sign(&fs::read(&files[0]).unwrap(), "cvr_000.xml");
    fs::write(
        root.path().join("cvr_001.xml.sig.xml"),
        other.to_xml(FieldEncoding::Attributes),
    )
    .unwrap();

    let err = ingestor(vendor.registry())
        .ingest(&signed_source(root.path()))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::VerificationRejected {
            reason: FailureReason::ReferenceMismatch,
            ..
        }
    ));
}

#[test]
fn test_missing_signature_file_is_a_parse_failure() {
    let root = tempfile::tempdir().unwrap();
    let vendor = VendorKey::load();
    let files = write_signed_export(&vendor, root.path(), &[("g-1", &[("Alice", 1)])]);
    fs::remove_file(root.path().join("cvr_000.xml.sig.xml")).unwrap();

    let ingestor = ingestor(vendor.registry());
    let err = ingestor.ingest(&signed_source(&files[0])).unwrap_err();
    assert!(matches!(
        err,
        Error::SignatureDocument(ParseError::Unreadable { .. })
    ));
    assert_eq!(ingestor.trail().statistics().unwrap().sources_rejected, 1);
}

#[test]
fn test_document_signed_by_other_key_is_untrusted() {
    let root = tempfile::tempdir().unwrap();
    let vendor = VendorKey::load();
    let files = write_signed_export(&vendor, root.path(), &[("g-1", &[("Alice", 1)])]);

    // The embedded vendor key is not the test key
    let err = ingestor(std::sync::Arc::new(TrustAnchorRegistry::embedded()))
        .ingest(&signed_source(&files[0]))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::VerificationRejected {
            reason: FailureReason::UntrustedKey,
            ..
        }
    ));
}

#[test]
fn test_signature_swap_is_invalid_not_mismatched() {
    let vendor = VendorKey::load();
    let payload = b"<Cvr><CvrGuid>g-1</CvrGuid></Cvr>";
    let good = vendor.sign(payload, "cvr_000.xml");
    let other = vendor.sign(b"<Cvr><CvrGuid>g-2</CvrGuid></Cvr>", "cvr_000.xml");

    // Digest still matches the payload, signature belongs to another SignedInfo
    let forged = SignedDocumentParser::parse(
        good.to_xml(FieldEncoding::Attributes)
            .replace(good.signature_value(), other.signature_value())
            .as_bytes(),
    )
    .unwrap();

    assert_eq!(
        SignatureVerifier::verify(payload, &forged, &vendor.anchor()),
        VerificationOutcome::Failed(FailureReason::SignatureInvalid)
    );
    assert_eq!(
        SignatureVerifier::verify(b"<Cvr><CvrGuid>g-3</CvrGuid></Cvr>", &good, &vendor.anchor()),
        VerificationOutcome::Failed(FailureReason::DigestMismatch)
    );
}

#[test]
fn test_config_cannot_disable_verification() {
    let config = IntegrityConfig {
        verify_signatures: false,
        ..IntegrityConfig::for_testing()
    };
    assert!(matches!(
        TrustAnchorRegistry::from_config(&config),
        Err(Error::UnauthorizedDisable)
    ));
    assert!(TrustAnchorRegistry::from_config(&IntegrityConfig::for_testing()).is_ok());
}

#[test]
fn test_sealed_artifact_tampering_is_detected() {
    let root = tempfile::tempdir().unwrap();
    let output = root.path().join("Results");
    fs::create_dir(&output).unwrap();
    let file = output.join("round_summary.csv");
    fs::write(&file, "round,candidate,votes\n1,Alice,3\n").unwrap();

    let trail = AuditTrail::for_testing();
    let mut artifact = tally::crypto::AuditableArtifact::open(&file)
        .unwrap()
        .with_hasher(ContentHasher::new(1024));
    artifact.finalize(&trail).unwrap();

    let mut permissions = fs::metadata(&file).unwrap().permissions();
    #[allow(clippy::permissions_set_readonly_false)]
    permissions.set_readonly(false);
    fs::set_permissions(&file, permissions).unwrap();
    fs::write(&file, "round,candidate,votes\n1,Alice,4\n").unwrap();

    match check_sealed_artifact(&file).unwrap() {
        SealCheck::Tampered { expected, actual } => {
            assert_eq!(Some(expected.as_str()), artifact.digest_hex());
            assert_ne!(expected, actual);
        }
        other => panic!("expected tampering to be detected, got {other:?}"),
    }
}

#[test]
fn test_large_file_hash_is_buffer_size_independent() {
    let root = tempfile::tempdir().unwrap();
    let file = root.path().join("big.bin");
    let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    fs::write(&file, &data).unwrap();

    let small = ContentHasher::new(1024).hash_file(&file).unwrap();
    let large = ContentHasher::new(1 << 20).hash_file(&file).unwrap();
    assert_eq!(small, large);
    assert_eq!(small, ContentHasher::hash_bytes(&data));
}
