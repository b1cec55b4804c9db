// Copyright (c) 2025 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! The attestation verification pipeline.
//!
//! Each stage takes the output of the previous one and the first failing
//! stage ends verification. Nothing here touches a TPM: the quote, the PCR
//! values and the event logs all come from the attestation document.

use attester::types::sort_pcrs;
use attester::{Attestation, ExpectedPcrs, PcrValue, QUOTE_PCRS, VERITY_PCR};
use crypto::HashAlgorithm;
use log::{debug, info};
use openssl::x509::X509;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use sha2::{Sha256, Sha384, Sha512};

use crate::cert::CertificateVerifier;
use crate::error::{Result, VerifyError};
use crate::eventlog::validate_verity_event_log;
use crate::quote::{decode_quote, decode_signature, DecodedQuote};

/// What a quote has to look like to be considered at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierPolicy {
    /// Exact PCR set the quote must cover
    pub pcr_selection: Vec<u32>,
    /// PCR banks a quote may declare
    pub allowed_pcr_hash_algorithms: Vec<HashAlgorithm>,
    /// PCR the verity event log is replayed into
    pub verity_pcr_index: u32,
}

impl Default for VerifierPolicy {
    fn default() -> Self {
        Self {
            pcr_selection: QUOTE_PCRS.to_vec(),
            allowed_pcr_hash_algorithms: vec![HashAlgorithm::Sha256],
            verity_pcr_index: VERITY_PCR,
        }
    }
}

/// The values an attestation is checked against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reference {
    pub verity_root_hash: Vec<u8>,
    pub expected_pcrs: ExpectedPcrs,
    /// Nonce the quote must carry. `None` accepts any nonce.
    pub nonce: Option<Vec<u8>>,
}

/// Facts established by a successful verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedAttestation {
    pub verity_root_hash: Vec<u8>,
    pub nonce: Vec<u8>,
    /// Quoted PCR values, sorted by index
    pub pcrs: Vec<PcrValue>,
}

/// Decode an attestation document and an expected PCRs document.
pub fn parse_inputs(attestation: &[u8], expected_pcrs: &[u8]) -> Result<(Attestation, ExpectedPcrs)> {
    let attestation =
        Attestation::from_json(attestation).map_err(|e| VerifyError::InputDecode {
            document: "attestation",
            reason: e.to_string(),
        })?;
    let expected_pcrs =
        ExpectedPcrs::from_json(expected_pcrs).map_err(|e| VerifyError::InputDecode {
            document: "expected PCRs",
            reason: e.to_string(),
        })?;

    Ok((attestation, expected_pcrs))
}

pub struct Verifier {
    roots: CertificateVerifier,
    policy: VerifierPolicy,
}

impl Verifier {
    pub fn new(roots: CertificateVerifier) -> Self {
        Self::with_policy(roots, VerifierPolicy::default())
    }

    pub fn with_policy(roots: CertificateVerifier, policy: VerifierPolicy) -> Self {
        Self { roots, policy }
    }

    pub fn verify(
        &self,
        attestation: &Attestation,
        reference: &Reference,
    ) -> Result<VerifiedAttestation> {
        let ak_cert = self.validate_ak_cert(&attestation.ak_cert)?;
        verify_quote_signature(&ak_cert, &attestation.quote_data, &attestation.quote_signature)?;

        let quote = decode_quote(&attestation.quote_data)?;
        check_nonce(&quote, reference.nonce.as_deref())?;

        let hash_algorithm = self.check_pcr_selection(&quote)?;
        let pcrs = check_pcr_digest(&quote, &attestation.pcrs, hash_algorithm)?;

        let verity_pcr = pcrs
            .iter()
            .find(|pcr| pcr.index == self.policy.verity_pcr_index)
            .ok_or(VerifyError::MissingPcr(self.policy.verity_pcr_index))?;
        let verity_root_hash =
            validate_verity_event_log(&attestation.verity_event_log, verity_pcr, hash_algorithm)?;

        if verity_root_hash != reference.verity_root_hash {
            return Err(VerifyError::VerityRootMismatch {
                expected: reference.verity_root_hash.clone(),
                actual: verity_root_hash,
            });
        }
        debug!("Verity hash: {}", hex::encode(&verity_root_hash));

        check_expected_pcrs(&pcrs, &reference.expected_pcrs)?;

        info!("Attestation verified successfully");
        Ok(VerifiedAttestation {
            verity_root_hash,
            nonce: quote.nonce,
            pcrs,
        })
    }

    fn validate_ak_cert(&self, ak_cert: &[u8]) -> Result<X509> {
        let cert = X509::from_der(ak_cert)
            .map_err(|e| VerifyError::UntrustedKey(format!("couldn't parse AK certificate: {e}")))?;
        self.roots
            .verify(&cert)
            .map_err(|e| VerifyError::UntrustedKey(e.to_string()))?;
        debug!("AK certificate is trusted");
        Ok(cert)
    }

    /// The quote must cover exactly the policy's PCRs, in an allowed bank.
    fn check_pcr_selection(&self, quote: &DecodedQuote) -> Result<HashAlgorithm> {
        let mut quoted = quote.pcr_selection.pcrs.clone();
        quoted.sort_unstable();
        let mut expected = self.policy.pcr_selection.clone();
        expected.sort_unstable();

        if quoted != expected {
            return Err(VerifyError::UnexpectedPcrSet {
                origin: "quote",
                expected,
                actual: quoted,
            });
        }

        let hash_alg = quote.pcr_selection.hash_alg;
        let hash_algorithm = HashAlgorithm::from_tpm_alg_id(hash_alg)
            .filter(|alg| self.policy.allowed_pcr_hash_algorithms.contains(alg))
            .ok_or(VerifyError::UnsupportedAlgorithm {
                kind: "PCR bank",
                id: hash_alg,
            })?;

        debug!("Quote covers PCRs {quoted:?} of the {hash_algorithm} bank");
        Ok(hash_algorithm)
    }
}

fn verify_quote_signature(ak_cert: &X509, quote_data: &[u8], quote_signature: &[u8]) -> Result<()> {
    let signature = decode_signature(quote_signature)?;
    let hash_algorithm = HashAlgorithm::from_tpm_alg_id(signature.hash_alg).ok_or(
        VerifyError::UnsupportedAlgorithm {
            kind: "signature hash",
            id: signature.hash_alg,
        },
    )?;

    let public_key = ak_cert
        .public_key()
        .and_then(|key| key.public_key_to_der())
        .map_err(|e| VerifyError::UntrustedKey(format!("couldn't read AK public key: {e}")))?;
    let public_key = RsaPublicKey::from_public_key_der(&public_key)
        .map_err(|e| VerifyError::UntrustedKey(format!("AK is not an RSA key: {e}")))?;

    let scheme = match hash_algorithm {
        HashAlgorithm::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
        HashAlgorithm::Sha384 => Pkcs1v15Sign::new::<Sha384>(),
        HashAlgorithm::Sha512 => Pkcs1v15Sign::new::<Sha512>(),
    };
    let hashed = hash_algorithm.digest(quote_data);
    public_key
        .verify(scheme, &hashed, &signature.signature)
        .map_err(|_| VerifyError::SignatureInvalid)?;

    debug!("Quote signature verified with {hash_algorithm}");
    Ok(())
}

fn check_nonce(quote: &DecodedQuote, expected: Option<&[u8]>) -> Result<()> {
    debug!("Quote nonce: {}", hex::encode(&quote.nonce));

    match expected {
        Some(expected) if expected != quote.nonce => Err(VerifyError::NonceMismatch {
            expected: expected.to_vec(),
            actual: quote.nonce.clone(),
        }),
        _ => Ok(()),
    }
}

/// Check that the disclosed PCR values are the ones the quote signed and
/// return them sorted by index.
fn check_pcr_digest(
    quote: &DecodedQuote,
    pcrs: &[PcrValue],
    hash_algorithm: HashAlgorithm,
) -> Result<Vec<PcrValue>> {
    let mut pcrs = pcrs.to_vec();
    sort_pcrs(&mut pcrs);

    let disclosed: Vec<u32> = pcrs.iter().map(|pcr| pcr.index).collect();
    let mut quoted = quote.pcr_selection.pcrs.clone();
    quoted.sort_unstable();
    if disclosed != quoted {
        return Err(VerifyError::UnexpectedPcrSet {
            origin: "attestation",
            expected: quoted,
            actual: disclosed,
        });
    }

    if let Some(pcr) = pcrs
        .iter()
        .find(|pcr| pcr.value.len() != hash_algorithm.digest_len())
    {
        return Err(VerifyError::InvalidDigestLength {
            index: pcr.index,
            expected: hash_algorithm.digest_len(),
            actual: pcr.value.len(),
        });
    }

    let calculated = hash_algorithm.digest_all(pcrs.iter().map(|pcr| &pcr.value[..]));
    if calculated != quote.pcr_digest {
        return Err(VerifyError::PcrDigestMismatch {
            calculated,
            quoted: quote.pcr_digest.clone(),
        });
    }

    debug!("PCR digest: {}", hex::encode(&calculated));
    Ok(pcrs)
}

/// Report the first expected PCR, in reference order, that the attestation
/// does not match.
fn check_expected_pcrs(pcrs: &[PcrValue], expected_pcrs: &ExpectedPcrs) -> Result<()> {
    for expected in &expected_pcrs.pcrs {
        let actual = pcrs.iter().find(|pcr| pcr.index == expected.index);
        if actual.map(|pcr| &pcr.value) != Some(&expected.value) {
            return Err(VerifyError::PcrExpectationMismatch {
                index: expected.index,
                expected: expected.value.clone(),
                actual: actual.map(|pcr| pcr.value.clone()),
            });
        }
    }

    debug!("{} expected PCRs match", expected_pcrs.pcrs.len());
    Ok(())
}
