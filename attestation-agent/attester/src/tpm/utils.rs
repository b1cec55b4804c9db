// Copyright (c) 2025 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//
use anyhow::*;
use crypto::HashAlgorithm;
use std::str::FromStr;
use tss_esapi::interface_types::algorithm::HashingAlgorithm;
use tss_esapi::structures::{
    pcr_selection_list::PcrSelectionListBuilder, pcr_slot::PcrSlot, PcrSelectionList,
};
use tss_esapi::tcti_ldr::{DeviceConfig, TctiNameConf};
use tss_esapi::Context as TssContext;

/// Open a TCTI for `device_path`. `TEST_TCTI` overrides it, so the transport
/// can be pointed at a simulator (e.g. `swtpm:port=2321`).
pub fn create_tcti(device_path: &str) -> Result<TctiNameConf> {
    match std::env::var("TEST_TCTI") {
        std::result::Result::Err(_) => Ok(TctiNameConf::Device(DeviceConfig::from_str(
            device_path,
        )?)),
        std::result::Result::Ok(tctistr) => Ok(TctiNameConf::from_str(&tctistr)?),
    }
}

pub fn create_ctx(device_path: &str) -> Result<TssContext> {
    let tcti = create_tcti(device_path)?;
    let ctx = TssContext::new(tcti).context("Open TPM context failed")?;
    Ok(ctx)
}

pub fn hashing_algorithm(hash_algorithm: HashAlgorithm) -> HashingAlgorithm {
    match hash_algorithm {
        HashAlgorithm::Sha256 => HashingAlgorithm::Sha256,
        HashAlgorithm::Sha384 => HashingAlgorithm::Sha384,
        HashAlgorithm::Sha512 => HashingAlgorithm::Sha512,
    }
}

pub fn pcr_slot(index: u32) -> Result<PcrSlot> {
    if index >= 24 {
        bail!("PCR index {index} out of bounds");
    }
    PcrSlot::try_from(1u32 << index).context("Invalid PCR index")
}

/// Inverse of [`pcr_slot`]: slots are encoded as a one-hot bit mask.
pub fn pcr_index(slot: PcrSlot) -> u32 {
    u32::from(slot).trailing_zeros()
}

pub fn create_pcr_selection_list(
    hash_algorithm: HashAlgorithm,
    pcrs: &[u32],
) -> Result<PcrSelectionList> {
    let slots = pcrs
        .iter()
        .map(|&index| pcr_slot(index))
        .collect::<Result<Vec<_>>>()?;

    PcrSelectionListBuilder::new()
        .with_selection(hashing_algorithm(hash_algorithm), &slots)
        .build()
        .context("Build PCR selection list failed")
}
