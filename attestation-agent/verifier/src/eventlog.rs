// Copyright (c) 2025 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use std::str::FromStr;

use attester::PcrValue;
use crypto::{HashAlgorithm, PcrHashValue};
use log::debug;

use crate::error::{Result, VerifyError};

const VERITY_INITRAMFS: &str = "VERITY_INITRAMFS";
const VERITY_HASH_PREFIX: &str = "VERITY_HASH: ";
const VERITY_SUCCESS: &str = "VERITY_SUCCESS";
const OVERLAY_SUCCESS: &str = "OVERLAY_SUCCESS";

/// The measurements the initramfs extends into the verity PCR while it
/// mounts the root filesystem.
///
/// The log looks like
/// ```text
/// VERITY_INITRAMFS
/// VERITY_HASH: <hex root hash>
/// VERITY_SUCCESS
/// OVERLAY_SUCCESS
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerityEventLog {
    pub events: Vec<String>,
    pub root_hash: Vec<u8>,
}

impl FromStr for VerityEventLog {
    type Err = VerifyError;

    fn from_str(input: &str) -> Result<Self> {
        let events = input
            .split('\n')
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect::<Vec<String>>();

        if events.len() != 4 {
            return Err(VerifyError::MalformedLog(format!(
                "unexpected number of verity logs: {}",
                events.len()
            )));
        }

        for (position, expected) in [(0, VERITY_INITRAMFS), (2, VERITY_SUCCESS), (3, OVERLAY_SUCCESS)]
        {
            if events[position] != expected {
                return Err(VerifyError::MalformedLog(format!(
                    "unexpected verity log {position}: {}",
                    events[position]
                )));
            }
        }

        let root_hash = events[1]
            .strip_prefix(VERITY_HASH_PREFIX)
            .ok_or_else(|| {
                VerifyError::MalformedLog(format!("unexpected verity log 1: {}", events[1]))
            })?;
        let root_hash = hex::decode(root_hash).map_err(|e| {
            VerifyError::MalformedLog(format!("couldn't decode verity hash: {e}"))
        })?;

        Ok(Self { events, root_hash })
    }
}

impl VerityEventLog {
    /// The PCR value a platform holds after extending every event, in order,
    /// from reset.
    pub fn replay(&self, hash_algorithm: HashAlgorithm) -> PcrHashValue {
        PcrHashValue::replay(hash_algorithm, &self.events)
    }

    /// Check that replaying the log produces `pcr`.
    pub fn integrity_check(&self, pcr: &[u8], hash_algorithm: HashAlgorithm) -> Result<()> {
        let replayed = self.replay(hash_algorithm);
        if replayed.value() != pcr {
            return Err(VerifyError::PcrMismatch {
                expected: pcr.to_vec(),
                actual: replayed.into_value(),
            });
        }

        Ok(())
    }
}

/// Validate a raw verity event log against the PCR value the attestation
/// claims for it, and return the verity root hash the log asserts.
pub fn validate_verity_event_log(
    raw: &[u8],
    claimed: &PcrValue,
    hash_algorithm: HashAlgorithm,
) -> Result<Vec<u8>> {
    let log = std::str::from_utf8(raw)
        .map_err(|e| VerifyError::MalformedLog(format!("not valid UTF-8: {e}")))?;
    let log = VerityEventLog::from_str(log)?;

    log.integrity_check(&claimed.value, hash_algorithm)?;
    debug!(
        "Verity event log replays to PCR {}: {}",
        claimed.index,
        hex::encode(&claimed.value)
    );

    Ok(log.root_hash)
}
