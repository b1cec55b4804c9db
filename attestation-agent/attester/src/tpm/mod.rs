// Copyright (c) 2025 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//
use crate::tpm::utils::*;
use crate::transport::{SignedQuote, TpmTransport};
use crate::types::PcrValue;
use anyhow::*;
use crypto::HashAlgorithm;
use log::debug;
use tss_esapi::abstraction::{nv, pcr};
use tss_esapi::handles::{KeyHandle, NvIndexTpmHandle, PersistentTpmHandle, TpmHandle};
use tss_esapi::interface_types::resource_handles::NvAuth;
use tss_esapi::structures::{AttestInfo, Data, SignatureScheme};
use tss_esapi::traits::Marshall;
use tss_esapi::Context as TssContext;

mod utils;

/// [`TpmTransport`] backed by a (v)TPM reachable through tpm2-tss.
pub struct TssTransport {
    context: TssContext,
}

impl TssTransport {
    pub fn open(device_path: &str) -> Result<Self> {
        debug!("Opening TPM at {device_path}");
        let context = create_ctx(device_path)?;
        Ok(Self { context })
    }
}

impl TpmTransport for TssTransport {
    fn read_nv(&mut self, index: u32) -> Result<Vec<u8>> {
        let nv_index = NvIndexTpmHandle::new(index).context("Invalid NV index")?;
        let data = self
            .context
            .execute_with_nullauth_session(|ctx| nv::read_full(ctx, NvAuth::Owner, nv_index))
            .with_context(|| format!("Read NV index {index:#x} failed"))?;
        Ok(data)
    }

    fn read_pcrs(&mut self, hash_algorithm: HashAlgorithm, pcrs: &[u32]) -> Result<Vec<PcrValue>> {
        if pcrs.len() > crate::MAX_PCRS_PER_READ {
            bail!("At most {} PCRs per read", crate::MAX_PCRS_PER_READ);
        }

        let selection_list = create_pcr_selection_list(hash_algorithm, pcrs)?;
        let pcr_data =
            pcr::read_all(&mut self.context, selection_list).context("Read PCRs failed")?;
        let pcr_bank = pcr_data
            .pcr_bank(hashing_algorithm(hash_algorithm))
            .ok_or(anyhow!("PCR bank {hash_algorithm} not found"))?;

        let values = pcr_bank
            .into_iter()
            .map(|(slot, digest)| PcrValue::new(pcr_index(*slot), digest.value().to_vec()))
            .collect();
        Ok(values)
    }

    fn quote(
        &mut self,
        ak_handle: u32,
        nonce: &[u8],
        hash_algorithm: HashAlgorithm,
        pcrs: &[u32],
    ) -> Result<SignedQuote> {
        let persistent = PersistentTpmHandle::new(ak_handle).context("Invalid AK handle")?;
        let key_handle = KeyHandle::from(
            self.context
                .tr_from_tpm_public(TpmHandle::Persistent(persistent))
                .context("Load AK failed")?,
        );

        let selection_list = create_pcr_selection_list(hash_algorithm, pcrs)?;
        let qualifying_data = Data::try_from(nonce.to_vec())?;

        let (attest, signature) = self
            .context
            .execute_with_nullauth_session(|ctx| {
                ctx.quote(
                    key_handle,
                    qualifying_data,
                    SignatureScheme::Null,
                    selection_list,
                )
            })
            .context("Call TPM Quote API failed")?;

        let AttestInfo::Quote { .. } = attest.attested() else {
            bail!("TPM returned a non-quote attestation");
        };

        Ok(SignedQuote {
            quote_data: attest.marshall()?,
            signature: signature.marshall()?,
        })
    }
}
