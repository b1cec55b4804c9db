// Copyright (c) 2025 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use anyhow::Result;
use crypto::HashAlgorithm;

use crate::types::PcrValue;

/// A quote as returned by the TPM: the marshalled `TPMS_ATTEST` and the
/// marshalled `TPMT_SIGNATURE` over it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedQuote {
    pub quote_data: Vec<u8>,
    pub signature: Vec<u8>,
}

/// The TPM commands the quoting side relies on.
///
/// Every call blocks until the TPM answers. Implementations must not retry:
/// a quote is tied to one hardware session and a failure ends the run.
pub trait TpmTransport {
    /// Read the full content of the NV index `index`.
    fn read_nv(&mut self, index: u32) -> Result<Vec<u8>>;

    /// Read the selected PCRs of the `hash_algorithm` bank.
    ///
    /// A TPM returns at most 8 PCRs per `TPM2_PCR_Read`, so callers never
    /// pass more than [`crate::MAX_PCRS_PER_READ`] indices. The returned
    /// order is unspecified.
    fn read_pcrs(&mut self, hash_algorithm: HashAlgorithm, pcrs: &[u32]) -> Result<Vec<PcrValue>>;

    /// Sign a quote over the selected PCRs with the key at the persistent
    /// handle `ak_handle`, including `nonce` as qualifying data.
    fn quote(
        &mut self,
        ak_handle: u32,
        nonce: &[u8],
        hash_algorithm: HashAlgorithm,
        pcrs: &[u32],
    ) -> Result<SignedQuote>;
}
