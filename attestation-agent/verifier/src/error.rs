// Copyright (c) 2025 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use thiserror::Error;

pub type Result<T> = std::result::Result<T, VerifyError>;

fn hex_or_missing(value: &Option<Vec<u8>>) -> String {
    value
        .as_ref()
        .map_or_else(|| "<missing>".to_string(), hex::encode)
}

/// Every way an attestation can be rejected. Each variant names the check
/// that failed and carries the values it compared.
#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("couldn't decode {document}: {reason}")]
    InputDecode {
        document: &'static str,
        reason: String,
    },

    #[error("AK certificate can't be used: {0}")]
    UntrustedKey(String),

    #[error("quote signature verification failed")]
    SignatureInvalid,

    #[error("malformed quote: {0}")]
    MalformedQuote(String),

    #[error("malformed quote signature: {0}")]
    MalformedSignature(String),

    #[error("unsupported {kind} algorithm {id:#06x}")]
    UnsupportedAlgorithm { kind: &'static str, id: u16 },

    #[error("unexpected PCRs in {origin}, expected {expected:?}, got {actual:?}")]
    UnexpectedPcrSet {
        origin: &'static str,
        expected: Vec<u32>,
        actual: Vec<u32>,
    },

    #[error("PCR {index} has {actual} bytes, expected {expected}")]
    InvalidDigestLength {
        index: u32,
        expected: usize,
        actual: usize,
    },

    #[error(
        "PCR digest mismatch, calculated {}, quoted {}",
        hex::encode(.calculated),
        hex::encode(.quoted)
    )]
    PcrDigestMismatch { calculated: Vec<u8>, quoted: Vec<u8> },

    #[error("nonce mismatch, expected {}, got {}", hex::encode(.expected), hex::encode(.actual))]
    NonceMismatch { expected: Vec<u8>, actual: Vec<u8> },

    #[error("PCR {0} missing from attestation")]
    MissingPcr(u32),

    #[error("verity event log validation failed: {0}")]
    MalformedLog(String),

    #[error(
        "replayed verity event log does not match PCR, expected {}, got {}",
        hex::encode(.expected),
        hex::encode(.actual)
    )]
    PcrMismatch { expected: Vec<u8>, actual: Vec<u8> },

    #[error(
        "verity hash mismatch, expected {}, got {}",
        hex::encode(.expected),
        hex::encode(.actual)
    )]
    VerityRootMismatch { expected: Vec<u8>, actual: Vec<u8> },

    #[error(
        "PCR {index} mismatch, expected {}, got {}",
        hex::encode(.expected),
        hex_or_missing(.actual)
    )]
    PcrExpectationMismatch {
        index: u32,
        expected: Vec<u8>,
        actual: Option<Vec<u8>>,
    },
}
