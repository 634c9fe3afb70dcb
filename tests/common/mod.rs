//! Shared fixtures: a vendor signing key and CVR export writers

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rsa::RsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::traits::PublicKeyParts;
use sha2::Sha256;
use tally::config::IntegrityConfig;
use tally::crypto::signed_document::{FieldEncoding, SignatureBlockParts};
use tally::crypto::verifier::{C14N_1_0, DIGEST_SHA256, RSA_SHA256};
use tally::crypto::{
    AuditTrail, CryptoUtils, SignatureBlock, SignatureVerifier, SignedDocumentParser, TrustAnchor,
    TrustAnchorRegistry,
};
use tally::cvr::CvrIngestor;

const TEST_KEY_PEM: &str = include_str!("../fixtures/test_signing_key.pem");

/// Stand-in for the vendor's signing key
pub struct VendorKey {
    key: RsaPrivateKey,
}

impl VendorKey {
    pub fn load() -> Self {
        Self {
            key: RsaPrivateKey::from_pkcs8_pem(TEST_KEY_PEM).expect("fixture key parses"),
        }
    }

    pub fn anchor(&self) -> TrustAnchor {
        TrustAnchor::from_components(&self.key.n().to_bytes_be(), &self.key.e().to_bytes_be())
            .expect("fixture key is a valid anchor")
    }

    pub fn registry(&self) -> Arc<TrustAnchorRegistry> {
        Arc::new(TrustAnchorRegistry::with_anchor(self.anchor()).expect("enabled anchor"))
    }

    /// Signature document over `payload` referencing `reference_uri`, signed
    /// over the `SignedInfo` it carries in `encoding`
    pub fn sign_document(
        &self,
        payload: &[u8],
        reference_uri: &str,
        encoding: FieldEncoding,
    ) -> String {
        let canonical = SignatureVerifier::canonicalize_payload(C14N_1_0, payload).unwrap();
        let digest = SignatureVerifier::digest(DIGEST_SHA256, &canonical).unwrap();
        let unsigned = SignatureBlock::from_parts(SignatureBlockParts {
            canonicalization_method: C14N_1_0.to_string(),
            signature_method: RSA_SHA256.to_string(),
            reference_uri: reference_uri.to_string(),
            digest_method: DIGEST_SHA256.to_string(),
            digest_value: CryptoUtils::encode_base64(&digest),
            signature_value: "AA==".to_string(),
            modulus: CryptoUtils::encode_base64(&self.key.n().to_bytes_be()),
            exponent: CryptoUtils::encode_base64(&self.key.e().to_bytes_be()),
        })
        .unwrap();

        let draft = unsigned.to_xml(encoding);
        let signed_info = SignedDocumentParser::parse(draft.as_bytes())
            .unwrap()
            .signed_info()
            .to_vec();
        draft.replace(
            "<SignatureValue>AA==</SignatureValue>",
            &format!("<SignatureValue>{}</SignatureValue>", self.sign_bytes(&signed_info)),
        )
    }

    /// Base64 RSA signature over exactly `bytes`
    pub fn sign_bytes(&self, bytes: &[u8]) -> String {
        let signature = SigningKey::<Sha256>::new(self.key.clone()).sign(bytes);
        CryptoUtils::encode_base64(&signature.to_vec())
    }

    /// Base64 modulus and exponent of the public key
    pub fn key_components(&self) -> (String, String) {
        (
            CryptoUtils::encode_base64(&self.key.n().to_bytes_be()),
            CryptoUtils::encode_base64(&self.key.e().to_bytes_be()),
        )
    }

    /// Parsed attribute-encoded signature over `payload`
    pub fn sign(&self, payload: &[u8], reference_uri: &str) -> SignatureBlock {
        let document = self.sign_document(payload, reference_uri, FieldEncoding::Attributes);
        SignedDocumentParser::parse(document.as_bytes()).unwrap()
    }

    /// Write `<file>.sig.xml` for the current contents of `file`
    pub fn sign_file(&self, file: &Path, encoding: FieldEncoding) -> PathBuf {
        let payload = fs::read(file).unwrap();
        let name = file.file_name().unwrap().to_str().unwrap();
        let signature_path = tally::cvr::signature_path_for(file, ".sig.xml");
        fs::write(&signature_path, self.sign_document(&payload, name, encoding)).unwrap();
        signature_path
    }
}

pub fn ingestor(registry: Arc<TrustAnchorRegistry>) -> CvrIngestor {
    CvrIngestor::new(
        registry,
        Arc::new(AuditTrail::for_testing()),
        IntegrityConfig::for_testing(),
    )
}

/// One XML CVR for contest `7` with `(candidate, rank)` options
pub fn xml_cvr(guid: &str, precinct: &str, options: &[(&str, u32)]) -> String {
    let options: String = options
        .iter()
        .map(|(name, rank)| format!("<Option><Name>{name}</Name><Value>{rank}</Value></Option>"))
        .collect();
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\r\n\
         <Cvr>\r\n<CvrGuid>{guid}</CvrGuid>\r\n\
         <PrecinctSplit><Name>{precinct}</Name></PrecinctSplit>\r\n\
         <Contests><Contest><Id>7</Id><Options>{options}</Options></Contest></Contests>\r\n\
         </Cvr>\r\n"
    )
}

/// Write and sign one CVR file per entry under `dir`
pub fn write_signed_export(
    vendor: &VendorKey,
    dir: &Path,
    ballots: &[(&str, &[(&str, u32)])],
) -> Vec<PathBuf> {
    fs::create_dir_all(dir).unwrap();
    ballots
        .iter()
        .enumerate()
        .map(|(index, (guid, options))| {
            let file = dir.join(format!("cvr_{index:03}.xml"));
            fs::write(&file, xml_cvr(guid, "Precinct 1", options)).unwrap();
            vendor.sign_file(&file, FieldEncoding::Attributes);
            file
        })
        .collect()
}
