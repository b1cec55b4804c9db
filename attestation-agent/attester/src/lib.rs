// Copyright (c) 2025 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! Quoting side of image attestation.
//!
//! Collects a TPM quote over the boot and verity PCRs together with the AK
//! certificate and both event logs, and bundles them into an [`Attestation`]
//! document.

pub mod generate;
pub mod transport;
pub mod types;

#[cfg(feature = "tpm")]
pub mod tpm;

pub use generate::{GenerateError, GeneratorConfig, QuoteGenerator};
pub use transport::{SignedQuote, TpmTransport};
pub use types::{Attestation, ExpectedPcrs, PcrValue};

/// TPM resource manager device.
pub const DEFAULT_TPM_DEVICE_PATH: &str = "/dev/tpmrm0";

/// Size of the freshness nonce put into each quote.
pub const NONCE_SIZE: usize = 8;

/// Upper bound of PCRs returned by a single `TPM2_PCR_Read`.
pub const MAX_PCRS_PER_READ: usize = 8;

/// PCRs covered by an image attestation quote: the firmware and boot chain
/// plus the verity PCR.
pub const QUOTE_PCRS: [u32; 11] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 11];

/// PCR the verity measurements are extended into.
pub const VERITY_PCR: u32 = 11;
