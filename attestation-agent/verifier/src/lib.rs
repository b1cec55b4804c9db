// Copyright (c) 2025 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! Verifying side of image attestation.
//!
//! Checks an [`attester::Attestation`] document offline: the AK certificate
//! chains to a trusted root, the quote is signed by the AK, the disclosed
//! PCR values are the quoted ones, and the verity event log replays to the
//! quoted PCR 11.

pub mod cert;
pub mod error;
pub mod eventlog;
pub mod quote;
pub mod verify;

pub use cert::{CertificateInvalid, CertificateVerifier};
pub use error::{Result, VerifyError};
pub use eventlog::validate_verity_event_log;
pub use verify::{parse_inputs, Reference, VerifiedAttestation, Verifier, VerifierPolicy};
