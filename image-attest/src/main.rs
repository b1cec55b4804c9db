// Copyright (c) 2025 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! Generate and verify TPM attestations of dm-verity protected images.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::debug;
use verifier::{CertificateVerifier, Reference, Verifier, VerifierPolicy};

mod config;

use config::{load_config, QuoteConfig, VerifyConfig, DEFAULT_CONFIG_PATH};

#[derive(Parser)]
#[command(name = "image-attest")]
#[command(bin_name = "image-attest")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    operation: Operation,

    /// Config file path
    #[arg(default_value_t = DEFAULT_CONFIG_PATH.to_string(), short, long = "config", global = true)]
    config: String,

    /// Enable debug logs
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Operation {
    /// Quote the boot and verity PCRs and write an attestation document
    Quote(QuoteArgs),

    /// Verify an attestation document and print the verity root hash
    Verify(VerifyArgs),
}

#[derive(Args)]
struct QuoteArgs {
    /// TPM device path
    #[arg(long)]
    tpm_path: Option<String>,

    /// Persistent handle of the attestation key
    #[arg(long, value_parser = parse_handle)]
    ak_handle: Option<u32>,

    /// NV index of the AK certificate
    #[arg(long = "cert-location", value_parser = parse_handle)]
    ak_cert_nv_index: Option<u32>,

    /// File path for boot measurements
    #[arg(long = "boot-measurements")]
    boot_event_log: Option<PathBuf>,

    /// File path for verity measurements
    #[arg(long = "verity-measurements")]
    verity_event_log: Option<PathBuf>,

    /// Output path for the attestation document
    #[arg(long)]
    output_path: Option<PathBuf>,
}

#[derive(Args)]
struct VerifyArgs {
    /// Path to the attestation document
    #[arg(long)]
    attestation_path: Option<PathBuf>,

    /// Path to the expected PCR values
    #[arg(long)]
    expected_pcrs_path: Option<PathBuf>,

    /// PEM file with the CA the AK certificate must chain to
    #[arg(long = "intermediate-ca-path")]
    trusted_roots_path: Option<PathBuf>,

    /// Root hash for the verity device, hex encoded
    #[arg(long)]
    verity_root_hash: Option<String>,

    /// Nonce the quote must carry, hex encoded
    #[arg(long)]
    nonce: Option<String>,
}

/// Accept handles and NV indices in hex (`0x81000003`) or decimal.
fn parse_handle(s: &str) -> Result<u32, std::num::ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

impl QuoteArgs {
    fn apply(self, config: &mut QuoteConfig) {
        if let Some(tpm_path) = self.tpm_path {
            config.tpm_path = tpm_path;
        }
        if let Some(ak_handle) = self.ak_handle {
            config.ak_handle = ak_handle;
        }
        if let Some(ak_cert_nv_index) = self.ak_cert_nv_index {
            config.ak_cert_nv_index = ak_cert_nv_index;
        }
        if let Some(boot_event_log) = self.boot_event_log {
            config.boot_event_log = boot_event_log;
        }
        if let Some(verity_event_log) = self.verity_event_log {
            config.verity_event_log = verity_event_log;
        }
        if let Some(output_path) = self.output_path {
            config.output_path = output_path;
        }
    }
}

impl VerifyArgs {
    fn apply(self, config: &mut VerifyConfig) {
        if let Some(attestation_path) = self.attestation_path {
            config.attestation_path = attestation_path;
        }
        if let Some(expected_pcrs_path) = self.expected_pcrs_path {
            config.expected_pcrs_path = expected_pcrs_path;
        }
        if let Some(trusted_roots_path) = self.trusted_roots_path {
            config.trusted_roots_path = trusted_roots_path;
        }
        if self.verity_root_hash.is_some() {
            config.verity_root_hash = self.verity_root_hash;
        }
        if self.nonce.is_some() {
            config.nonce = self.nonce;
        }
    }
}

#[cfg(feature = "tpm")]
fn quote(config: &QuoteConfig) -> Result<()> {
    use attester::tpm::TssTransport;
    use attester::{GeneratorConfig, QuoteGenerator};
    use log::info;

    let transport = TssTransport::open(&config.tpm_path)
        .with_context(|| format!("couldn't open TPM {}", config.tpm_path))?;
    let generator_config = GeneratorConfig {
        ak_handle: config.ak_handle,
        ak_cert_nv_index: config.ak_cert_nv_index,
        boot_event_log: config.boot_event_log.clone(),
        verity_event_log: config.verity_event_log.clone(),
        ..Default::default()
    };

    let attestation = QuoteGenerator::new(transport, generator_config)
        .generate()
        .context("couldn't generate attestation")?;

    let json = attestation
        .to_json()
        .context("couldn't marshal attestation")?;
    std::fs::write(&config.output_path, json).with_context(|| {
        format!(
            "couldn't write attestation to {}",
            config.output_path.display()
        )
    })?;

    info!("Attestation written to {}", config.output_path.display());
    Ok(())
}

#[cfg(not(feature = "tpm"))]
fn quote(_config: &QuoteConfig) -> Result<()> {
    anyhow::bail!("image-attest was built without TPM support, rebuild with `--features tpm`")
}

fn read(what: &str, path: &std::path::Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("couldn't read {what} {}", path.display()))
}

fn verify(config: &VerifyConfig) -> Result<Vec<u8>> {
    let verity_root_hash = config
        .verity_root_hash
        .as_deref()
        .context("no verity root hash given, set --verity-root-hash or verify.verity_root_hash")?;
    let verity_root_hash =
        hex::decode(verity_root_hash).context("couldn't decode verity root hash")?;
    let nonce = config
        .nonce
        .as_deref()
        .map(hex::decode)
        .transpose()
        .context("couldn't decode nonce")?;

    let roots = read("trusted roots", &config.trusted_roots_path)?;
    let roots = CertificateVerifier::from_pem(&roots).context("couldn't load trusted roots")?;
    debug!(
        "Loaded {} trusted roots from {}",
        roots.roots(),
        config.trusted_roots_path.display()
    );

    let attestation = read("attestation", &config.attestation_path)?;
    let expected_pcrs = read("expected PCRs", &config.expected_pcrs_path)?;
    let (attestation, expected_pcrs) = verifier::parse_inputs(&attestation, &expected_pcrs)?;

    let policy = VerifierPolicy {
        allowed_pcr_hash_algorithms: config.allowed_pcr_hash_algorithms.clone(),
        ..Default::default()
    };
    let reference = Reference {
        verity_root_hash,
        expected_pcrs,
        nonce,
    };

    let verified = Verifier::with_policy(roots, policy)
        .verify(&attestation, &reference)
        .context("attestation verification failed")?;

    Ok(verified.verity_root_hash)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug { "debug" } else { "info" };
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(level));

    let mut config = load_config(&cli.config)?;
    debug!("Using config {}: {config:?}", cli.config);

    match cli.operation {
        Operation::Quote(args) => {
            args.apply(&mut config.quote);
            quote(&config.quote)?;
        }
        Operation::Verify(args) => {
            args.apply(&mut config.verify);
            let verity_root_hash = verify(&config.verify)?;
            println!("{}", hex::encode(verity_root_hash));
        }
    }

    Ok(())
}
