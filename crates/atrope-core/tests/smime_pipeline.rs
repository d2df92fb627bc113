//! Exercises the trust store against a real self-signed certificate and a
//! PKCS#7/SMIME message it actually signed, instead of mocking the crypto.

use std::io::Write;

use openssl::asn1::Asn1Time;
use openssl::hash::MessageDigest;
use openssl::pkcs7::{Pkcs7, Pkcs7Flags};
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::stack::Stack;
use openssl::x509::{X509NameBuilder, X509};

use atrope_core::trust::TrustStore;

fn self_signed_cert(common_name: &str) -> (X509, PKey<Private>) {
    let rsa = Rsa::generate(2048).expect("rsa keygen");
    let pkey = PKey::from_rsa(rsa).expect("pkey wrap");

    let mut name = X509NameBuilder::new().expect("name builder");
    name.append_entry_by_text("O", "Test Grid CA").expect("O");
    name.append_entry_by_text("CN", common_name).expect("CN");
    let name = name.build();

    let mut builder = X509::builder().expect("cert builder");
    builder.set_version(2).expect("version");
    builder.set_subject_name(&name).expect("subject");
    builder.set_issuer_name(&name).expect("issuer");
    builder.set_pubkey(&pkey).expect("pubkey");
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .expect("not_before");
    builder
        .set_not_after(&Asn1Time::days_from_now(30).unwrap())
        .expect("not_after");
    builder.sign(&pkey, MessageDigest::sha256()).expect("self-sign");

    (builder.build(), pkey)
}

fn sign_smime(cert: &X509, pkey: &PKey<Private>, payload: &[u8]) -> Vec<u8> {
    let certs = Stack::new().expect("empty cert stack");
    let pkcs7 =
        Pkcs7::sign(cert, pkey, &certs, payload, Pkcs7Flags::empty()).expect("pkcs7 sign");
    pkcs7
        .to_smime(payload, Pkcs7Flags::empty())
        .expect("smime serialization")
}

fn trust_store_with(cert: &X509) -> TrustStore {
    let dir = tempfile::tempdir().expect("tempdir");
    let pem_path = dir.path().join("endorser.pem");
    std::fs::File::create(&pem_path)
        .unwrap()
        .write_all(&cert.to_pem().expect("cert to pem"))
        .unwrap();
    let store = TrustStore::load(dir.path()).expect("load trust store");
    // Keep the directory alive for the caller by leaking it: tests are
    // short-lived processes and this avoids threading a TempDir guard
    // through every call site in this file.
    std::mem::forget(dir);
    store
}

#[test]
fn verifies_a_message_signed_by_a_trusted_certificate() {
    let (cert, pkey) = self_signed_cert("Test Endorser");
    let payload = b"{\"hv:imagelist\":{}}".to_vec();
    let smime = sign_smime(&cert, &pkey, &payload);

    let store = trust_store_with(&cert);
    let (signer, verified) = store.verify(&smime).expect("verification succeeds");

    assert_eq!(verified, payload);
    assert_eq!(signer.dn, "/O=Test Grid CA/CN=Test Endorser");
    assert_eq!(signer.ca, "/O=Test Grid CA/CN=Test Endorser");
}

#[test]
fn rejects_a_message_signed_by_an_untrusted_certificate() {
    let (cert, pkey) = self_signed_cert("Untrusted Endorser");
    let (other_cert, _) = self_signed_cert("Trusted Endorser");
    let payload = b"{\"hv:imagelist\":{}}".to_vec();
    let smime = sign_smime(&cert, &pkey, &payload);

    let store = trust_store_with(&other_cert);
    assert!(store.verify(&smime).is_err());
}
