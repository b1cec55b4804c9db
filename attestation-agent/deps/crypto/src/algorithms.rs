// Copyright (c) 2024 Alibaba Cloud
// Copyright (c) 2024 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};
use strum::{AsRefStr, Display, EnumString};

/// `TPM_ALG_ID` values of the supported hash algorithms, as found in
/// `TPMS_PCR_SELECTION.hash` and `TPMT_SIGNATURE` structures.
pub const TPM_ALG_SHA1: u16 = 0x0004;
pub const TPM_ALG_SHA256: u16 = 0x000B;
pub const TPM_ALG_SHA384: u16 = 0x000C;
pub const TPM_ALG_SHA512: u16 = 0x000D;

/// Hash algorithms used for PCR banks, PCR extension and quote signatures.
#[derive(
    EnumString,
    AsRefStr,
    Serialize,
    Deserialize,
    Clone,
    Debug,
    Display,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    #[strum(serialize = "sha256")]
    Sha256,

    #[strum(serialize = "sha384")]
    Sha384,

    #[strum(serialize = "sha512")]
    Sha512,
}

fn hash_material<D: Digest>(material: &[u8]) -> Vec<u8> {
    D::new().chain_update(material).finalize().to_vec()
}

impl HashAlgorithm {
    /// Return the hash value length in bytes
    pub fn digest_len(&self) -> usize {
        match self {
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }

    pub fn digest(&self, material: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha256 => hash_material::<Sha256>(material),
            HashAlgorithm::Sha384 => hash_material::<Sha384>(material),
            HashAlgorithm::Sha512 => hash_material::<Sha512>(material),
        }
    }

    /// Hash the concatenation of all `parts`, in order.
    pub fn digest_all<'a, I>(&self, parts: I) -> Vec<u8>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let material: Vec<u8> = parts.into_iter().flatten().copied().collect();
        self.digest(&material)
    }

    /// The `TPM_ALG_ID` of this algorithm.
    pub fn tpm_alg_id(&self) -> u16 {
        match self {
            HashAlgorithm::Sha256 => TPM_ALG_SHA256,
            HashAlgorithm::Sha384 => TPM_ALG_SHA384,
            HashAlgorithm::Sha512 => TPM_ALG_SHA512,
        }
    }

    /// Map a `TPM_ALG_ID` to a supported hash algorithm. SHA-1 and any
    /// non-hash id yield `None`.
    pub fn from_tpm_alg_id(id: u16) -> Option<Self> {
        match id {
            TPM_ALG_SHA256 => Some(HashAlgorithm::Sha256),
            TPM_ALG_SHA384 => Some(HashAlgorithm::Sha384),
            TPM_ALG_SHA512 => Some(HashAlgorithm::Sha512),
            _ => None,
        }
    }

    /// Return a list of all supported hash algorithms.
    pub fn list_all() -> Vec<Self> {
        vec![
            HashAlgorithm::Sha256,
            HashAlgorithm::Sha384,
            HashAlgorithm::Sha512,
        ]
    }
}
