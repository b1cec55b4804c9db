// Copyright (c) 2025 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use std::path::PathBuf;

use anyhow::{Context, Result};
use attester::DEFAULT_TPM_DEVICE_PATH;
use attester::generate::{
    DEFAULT_AK_CERT_NV_INDEX, DEFAULT_AK_HANDLE, DEFAULT_BOOT_EVENT_LOG_PATH,
    DEFAULT_VERITY_EVENT_LOG_PATH,
};
use crypto::HashAlgorithm;
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/image-attestation/image-attest.toml";
pub const DEFAULT_ATTESTATION_PATH: &str = "attestation.json";
pub const DEFAULT_EXPECTED_PCRS_PATH: &str = "expected-pcrs.json";
pub const DEFAULT_TRUSTED_ROOTS_PATH: &str = "certs/azure-tl-intermediate.pem";

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub quote: QuoteConfig,

    #[serde(default)]
    pub verify: VerifyConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct QuoteConfig {
    #[serde(default = "default_tpm_path")]
    pub tpm_path: String,

    /// Persistent handle of the attestation key
    #[serde(default = "default_ak_handle")]
    pub ak_handle: u32,

    /// NV index of the AK certificate
    #[serde(default = "default_ak_cert_nv_index")]
    pub ak_cert_nv_index: u32,

    #[serde(default = "default_boot_event_log")]
    pub boot_event_log: PathBuf,

    #[serde(default = "default_verity_event_log")]
    pub verity_event_log: PathBuf,

    /// Where the attestation document is written
    #[serde(default = "default_attestation_path")]
    pub output_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct VerifyConfig {
    #[serde(default = "default_attestation_path")]
    pub attestation_path: PathBuf,

    #[serde(default = "default_expected_pcrs_path")]
    pub expected_pcrs_path: PathBuf,

    /// PEM bundle of trust anchors for the AK certificate
    #[serde(default = "default_trusted_roots_path")]
    pub trusted_roots_path: PathBuf,

    /// Hex encoded dm-verity root hash the image must have booted with
    #[serde(default)]
    pub verity_root_hash: Option<String>,

    #[serde(default = "default_allowed_pcr_hash_algorithms")]
    pub allowed_pcr_hash_algorithms: Vec<HashAlgorithm>,

    /// Hex encoded nonce the quote must carry
    #[serde(default)]
    pub nonce: Option<String>,
}

fn default_tpm_path() -> String {
    DEFAULT_TPM_DEVICE_PATH.to_string()
}

fn default_ak_handle() -> u32 {
    DEFAULT_AK_HANDLE
}

fn default_ak_cert_nv_index() -> u32 {
    DEFAULT_AK_CERT_NV_INDEX
}

fn default_boot_event_log() -> PathBuf {
    PathBuf::from(DEFAULT_BOOT_EVENT_LOG_PATH)
}

fn default_verity_event_log() -> PathBuf {
    PathBuf::from(DEFAULT_VERITY_EVENT_LOG_PATH)
}

fn default_attestation_path() -> PathBuf {
    PathBuf::from(DEFAULT_ATTESTATION_PATH)
}

fn default_expected_pcrs_path() -> PathBuf {
    PathBuf::from(DEFAULT_EXPECTED_PCRS_PATH)
}

fn default_trusted_roots_path() -> PathBuf {
    PathBuf::from(DEFAULT_TRUSTED_ROOTS_PATH)
}

fn default_allowed_pcr_hash_algorithms() -> Vec<HashAlgorithm> {
    vec![HashAlgorithm::Sha256]
}

impl Default for QuoteConfig {
    fn default() -> Self {
        Self {
            tpm_path: default_tpm_path(),
            ak_handle: default_ak_handle(),
            ak_cert_nv_index: default_ak_cert_nv_index(),
            boot_event_log: default_boot_event_log(),
            verity_event_log: default_verity_event_log(),
            output_path: default_attestation_path(),
        }
    }
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            attestation_path: default_attestation_path(),
            expected_pcrs_path: default_expected_pcrs_path(),
            trusted_roots_path: default_trusted_roots_path(),
            verity_root_hash: None,
            allowed_pcr_hash_algorithms: default_allowed_pcr_hash_algorithms(),
            nonce: None,
        }
    }
}

/// Load the configuration file at `path`. A missing file yields the
/// defaults.
pub fn load_config(path: &str) -> Result<Config> {
    let settings = ::config::Config::builder()
        .add_source(::config::File::with_name(path).required(false))
        .build()
        .context(format!("failed to load image-attest config: {}", path))?;

    let cfg: Config = settings
        .try_deserialize()
        .context("failed to deserialize image-attest config")?;

    Ok(cfg)
}
