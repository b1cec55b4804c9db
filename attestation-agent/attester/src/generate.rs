// Copyright (c) 2025 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use std::path::{Path, PathBuf};

use crypto::HashAlgorithm;
use log::{debug, info};
use openssl::x509::{X509NameRef, X509};
use thiserror::Error;

use crate::transport::TpmTransport;
use crate::types::{sort_pcrs, Attestation, PcrValue};
use crate::{MAX_PCRS_PER_READ, NONCE_SIZE, QUOTE_PCRS};

/// Persistent handle of the Azure vTPM attestation key.
pub const DEFAULT_AK_HANDLE: u32 = 0x8100_0003;
/// NV index holding the Azure vTPM AK certificate.
pub const DEFAULT_AK_CERT_NV_INDEX: u32 = 0x01c1_01d0;
pub const DEFAULT_BOOT_EVENT_LOG_PATH: &str = "/sys/kernel/security/tpm0/binary_bios_measurements";
pub const DEFAULT_VERITY_EVENT_LOG_PATH: &str = "/measurements/eventlog";

#[derive(Error, Debug)]
pub enum GenerateError {
    #[error("TPM failed to {operation}: {source:#}")]
    Transport {
        operation: &'static str,
        source: anyhow::Error,
    },

    #[error("couldn't read {kind} measurements from {}", .path.display())]
    ReadEventLog {
        kind: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("can't parse AK certificate")]
    AkCertificate(#[source] openssl::error::ErrorStack),

    #[error("public key algorithm of the AK certificate is not supported: {0}")]
    UnsupportedAkKey(String),

    #[error("couldn't generate nonce")]
    Nonce(#[source] openssl::error::ErrorStack),

    #[error("PCR {index} missing from TPM response")]
    MissingPcr { index: u32 },

    #[error("PCR {index} is {actual} bytes long, expected {expected}")]
    InvalidPcrValue {
        index: u32,
        expected: usize,
        actual: usize,
    },

    #[error("TPM reported PCR {index} twice with different values")]
    ConflictingPcr { index: u32 },

    #[error("PCR values changed during quote generation")]
    PcrValuesChanged,
}

pub type Result<T> = std::result::Result<T, GenerateError>;

/// Where the quoting side finds its inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorConfig {
    /// Persistent handle of the attestation key
    pub ak_handle: u32,
    /// NV index of the DER encoded AK certificate
    pub ak_cert_nv_index: u32,
    pub boot_event_log: PathBuf,
    pub verity_event_log: PathBuf,
    /// PCR bank to quote
    pub hash_algorithm: HashAlgorithm,
    pub pcrs: Vec<u32>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            ak_handle: DEFAULT_AK_HANDLE,
            ak_cert_nv_index: DEFAULT_AK_CERT_NV_INDEX,
            boot_event_log: PathBuf::from(DEFAULT_BOOT_EVENT_LOG_PATH),
            verity_event_log: PathBuf::from(DEFAULT_VERITY_EVENT_LOG_PATH),
            hash_algorithm: HashAlgorithm::Sha256,
            pcrs: QUOTE_PCRS.to_vec(),
        }
    }
}

/// Produces one [`Attestation`] per call to [`QuoteGenerator::generate`].
pub struct QuoteGenerator<T> {
    transport: T,
    config: GeneratorConfig,
}

impl<T: TpmTransport> QuoteGenerator<T> {
    pub fn new(transport: T, config: GeneratorConfig) -> Self {
        Self { transport, config }
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    pub fn generate(&mut self) -> Result<Attestation> {
        let ak_cert = self.read_ak_cert()?;

        let boot_event_log = read_event_log("boot", &self.config.boot_event_log)?;
        let verity_event_log = read_event_log("verity", &self.config.verity_event_log)?;
        debug!(
            "Event logs: boot {} bytes, verity {} bytes",
            boot_event_log.len(),
            verity_event_log.len()
        );

        let nonce = new_nonce()?;

        let pcrs = self.read_pcrs()?;

        let quote = self
            .transport
            .quote(
                self.config.ak_handle,
                &nonce,
                self.config.hash_algorithm,
                &self.config.pcrs,
            )
            .map_err(|source| GenerateError::Transport {
                operation: "quote",
                source,
            })?;

        // The quote only commits to a digest over the PCRs, the values
        // themselves are disclosed from the reads around it.
        if self.read_pcrs()? != pcrs {
            return Err(GenerateError::PcrValuesChanged);
        }

        debug!("PCR Values:");
        for pcr in &pcrs {
            debug!("\t{}: {}", pcr.index, hex::encode(&pcr.value));
        }
        debug!("Quote Data: {}", hex::encode(&quote.quote_data));
        debug!("Quote Sig: {}", hex::encode(&quote.signature));

        info!(
            "Generated quote over PCRs {:?} with nonce {}",
            self.config.pcrs,
            hex::encode(nonce)
        );

        Ok(Attestation {
            ak_cert,
            boot_event_log,
            verity_event_log,
            quote_data: quote.quote_data,
            quote_signature: quote.signature,
            pcrs,
        })
    }

    fn read_ak_cert(&mut self) -> Result<Vec<u8>> {
        let index = self.config.ak_cert_nv_index;
        let ak_cert = self
            .transport
            .read_nv(index)
            .map_err(|source| GenerateError::Transport {
                operation: "read AK certificate",
                source,
            })?;

        let cert = X509::from_der(&ak_cert).map_err(GenerateError::AkCertificate)?;
        let public_key = cert.public_key().map_err(GenerateError::AkCertificate)?;
        let Ok(rsa) = public_key.rsa() else {
            return Err(GenerateError::UnsupportedAkKey(format!(
                "{:?}",
                public_key.id()
            )));
        };

        debug!("AK cert (NV index {index:#x}):");
        debug!("\tSubject: {}", name_to_string(cert.subject_name()));
        debug!("\tIssuer: {}", name_to_string(cert.issuer_name()));
        debug!("\tModulus: {} bits", rsa.n().num_bits());
        debug!("\tExponent: {}", rsa.e());

        Ok(ak_cert)
    }

    /// Read the configured PCRs in batches the TPM accepts, then sort the
    /// union by index.
    fn read_pcrs(&mut self) -> Result<Vec<PcrValue>> {
        let hash_algorithm = self.config.hash_algorithm;
        let mut pcrs = Vec::with_capacity(self.config.pcrs.len());

        for batch in self.config.pcrs.chunks(MAX_PCRS_PER_READ) {
            let values = self
                .transport
                .read_pcrs(hash_algorithm, batch)
                .map_err(|source| GenerateError::Transport {
                    operation: "read PCRs",
                    source,
                })?;
            pcrs.extend(values.into_iter().filter(|pcr| batch.contains(&pcr.index)));
        }

        sort_pcrs(&mut pcrs);
        if let Some(pair) = pcrs
            .windows(2)
            .find(|pair| pair[0].index == pair[1].index && pair[0].value != pair[1].value)
        {
            return Err(GenerateError::ConflictingPcr {
                index: pair[0].index,
            });
        }
        pcrs.dedup();

        for &index in &self.config.pcrs {
            let Some(pcr) = pcrs.iter().find(|pcr| pcr.index == index) else {
                return Err(GenerateError::MissingPcr { index });
            };

            if pcr.value.len() != hash_algorithm.digest_len() {
                return Err(GenerateError::InvalidPcrValue {
                    index,
                    expected: hash_algorithm.digest_len(),
                    actual: pcr.value.len(),
                });
            }
        }

        Ok(pcrs)
    }
}

fn read_event_log(kind: &'static str, path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|source| GenerateError::ReadEventLog {
        kind,
        path: path.to_path_buf(),
        source,
    })
}

fn new_nonce() -> Result<[u8; NONCE_SIZE]> {
    let mut nonce = [0u8; NONCE_SIZE];
    openssl::rand::rand_bytes(&mut nonce).map_err(GenerateError::Nonce)?;
    Ok(nonce)
}

fn name_to_string(name: &X509NameRef) -> String {
    name.entries()
        .map(|entry| {
            let key = entry.object().nid().short_name().unwrap_or("?");
            let value = entry
                .data()
                .as_utf8()
                .map(|value| value.to_string())
                .unwrap_or_default();
            format!("{key}={value}")
        })
        .collect::<Vec<_>>()
        .join(", ")
}
