// Copyright (c) 2025 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

#![allow(dead_code)]

use attester::{Attestation, ExpectedPcrs, PcrValue, QUOTE_PCRS, VERITY_PCR};
use crypto::{HashAlgorithm, PcrHashValue, TPM_ALG_SHA256};
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::sign::Signer;
use openssl::x509::extension::BasicConstraints;
use openssl::x509::{X509NameBuilder, X509};
use verifier::quote::{DecodedQuote, PcrSelection, QuoteSignature, TPM_ALG_RSASSA};
use verifier::{CertificateVerifier, Reference, Verifier};

pub const ROOT_HASH: &str = "7c4770215babcd808f0b5d440bec40f1d0757fd25ca584a10781a00b7e239a0c";
pub const NONCE: &[u8] = b"\x01\x02\x03\x04\x05\x06\x07\x08";

pub fn verity_log() -> Vec<u8> {
    format!("VERITY_INITRAMFS\nVERITY_HASH: {ROOT_HASH}\nVERITY_SUCCESS\nOVERLAY_SUCCESS\n")
        .into_bytes()
}

pub fn replay_verity_log(log: &[u8]) -> Vec<u8> {
    let events = log.split(|b| *b == b'\n').filter(|line| !line.is_empty());
    PcrHashValue::replay(HashAlgorithm::Sha256, events).into_value()
}

pub fn rsa_key() -> PKey<Private> {
    PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap()
}

pub fn issue_cert(
    cn: &str,
    key: &PKey<Private>,
    issuer: Option<(&X509, &PKey<Private>)>,
) -> X509 {
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, cn).unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(2).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_pubkey(key).unwrap();
    builder
        .set_not_before(&Asn1Time::from_unix(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(365).unwrap())
        .unwrap();

    match issuer {
        Some((issuer, issuer_key)) => {
            builder.set_issuer_name(issuer.subject_name()).unwrap();
            builder.sign(issuer_key, MessageDigest::sha256()).unwrap();
        }
        None => {
            builder
                .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
                .unwrap();
            builder.set_issuer_name(&name).unwrap();
            builder.sign(key, MessageDigest::sha256()).unwrap();
        }
    }
    builder.build()
}

/// PKCS#1 v1.5 signature over `data` with SHA-256.
pub fn sign(key: &PKey<Private>, data: &[u8]) -> Vec<u8> {
    let mut signer = Signer::new(MessageDigest::sha256(), key).unwrap();
    signer.update(data).unwrap();
    signer.sign_to_vec().unwrap()
}

pub fn pcr_digest(pcrs: &[PcrValue]) -> Vec<u8> {
    let mut sorted = pcrs.to_vec();
    attester::types::sort_pcrs(&mut sorted);
    HashAlgorithm::Sha256.digest_all(sorted.iter().map(|pcr| &pcr.value[..]))
}

/// A synthetic vTPM: a test CA, an AK certified by it, and the PCR values
/// a booted image would have.
pub struct Fixture {
    pub ca_key: PKey<Private>,
    pub ca: X509,
    pub ak_key: PKey<Private>,
    pub ak_cert: X509,
    pub verity_log: Vec<u8>,
    pub pcrs: Vec<PcrValue>,
}

impl Fixture {
    pub fn new() -> Self {
        let ca_key = rsa_key();
        let ca = issue_cert("Test Virtual TPM CA", &ca_key, None);
        let ak_key = rsa_key();
        let ak_cert = issue_cert("Test AK", &ak_key, Some((&ca, &ca_key)));

        let verity_log = verity_log();
        let pcrs = QUOTE_PCRS
            .iter()
            .map(|&index| {
                let value = if index == VERITY_PCR {
                    replay_verity_log(&verity_log)
                } else {
                    HashAlgorithm::Sha256.digest(&[index as u8])
                };
                PcrValue::new(index, value)
            })
            .collect();

        Self {
            ca_key,
            ca,
            ak_key,
            ak_cert,
            verity_log,
            pcrs,
        }
    }

    pub fn quote(&self) -> DecodedQuote {
        DecodedQuote {
            qualified_signer: vec![0x00, 0x0b, 0x11, 0x22],
            nonce: NONCE.to_vec(),
            firmware_version: 1,
            pcr_selection: PcrSelection {
                hash_alg: TPM_ALG_SHA256,
                pcrs: QUOTE_PCRS.to_vec(),
            },
            pcr_digest: pcr_digest(&self.pcrs),
            ..Default::default()
        }
    }

    /// Sign `quote` with the AK and wrap it into an RSASSA `TPMT_SIGNATURE`.
    pub fn sign_quote(&self, quote_data: &[u8]) -> Vec<u8> {
        QuoteSignature {
            sig_alg: TPM_ALG_RSASSA,
            hash_alg: TPM_ALG_SHA256,
            signature: sign(&self.ak_key, quote_data),
        }
        .encode()
        .unwrap()
    }

    pub fn attestation_for(&self, quote: &DecodedQuote) -> Attestation {
        let quote_data = quote.encode().unwrap();
        Attestation {
            ak_cert: self.ak_cert.to_der().unwrap(),
            boot_event_log: b"boot event log".to_vec(),
            verity_event_log: self.verity_log.clone(),
            quote_signature: self.sign_quote(&quote_data),
            quote_data,
            pcrs: self.pcrs.clone(),
        }
    }

    pub fn attestation(&self) -> Attestation {
        self.attestation_for(&self.quote())
    }

    pub fn verifier(&self) -> Verifier {
        Verifier::new(CertificateVerifier::new(&[self.ca.clone()]).unwrap())
    }

    pub fn reference(&self) -> Reference {
        Reference {
            verity_root_hash: hex::decode(ROOT_HASH).unwrap(),
            expected_pcrs: ExpectedPcrs {
                pcrs: vec![self.pcrs[0].clone(), self.pcrs[4].clone()],
            },
            nonce: None,
        }
    }
}
