// Copyright (c) 2025 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! Software model of the TPM2_PCR_Extend operation.
//!
//! A PCR is never written directly; it is only ever extended:
//!
//! ```text
//! PCR_new = H(PCR_old || H(data))
//! ```
//!
//! Replaying a list of events from the all-zero reset value therefore
//! reproduces the register value a platform would hold after measuring
//! exactly those events, in that order.

use thiserror::Error;

use crate::HashAlgorithm;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PcrError {
    #[error("invalid PCR value length, expected {expected}, got {actual}")]
    InvalidDigestLength { expected: usize, actual: usize },
}

/// Extend `current` with `data` and return the new register value.
///
/// `current` must be exactly `hash_algorithm.digest_len()` bytes.
pub fn extend(
    hash_algorithm: HashAlgorithm,
    current: &[u8],
    data: &[u8],
) -> Result<Vec<u8>, PcrError> {
    if current.len() != hash_algorithm.digest_len() {
        return Err(PcrError::InvalidDigestLength {
            expected: hash_algorithm.digest_len(),
            actual: current.len(),
        });
    }

    let event_digest = hash_algorithm.digest(data);
    Ok(hash_algorithm.digest_all([current, &event_digest[..]]))
}

/// A PCR value together with the bank it belongs to.
///
/// The value always has the digest length of its bank, so extending it
/// cannot fail. Extension returns a new value and leaves `self` untouched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PcrHashValue {
    hash_algorithm: HashAlgorithm,
    value: Vec<u8>,
}

impl PcrHashValue {
    /// The reset value of a PCR: all zeroes.
    pub fn new(hash_algorithm: HashAlgorithm) -> Self {
        Self {
            hash_algorithm,
            value: vec![0; hash_algorithm.digest_len()],
        }
    }

    #[must_use]
    pub fn extend(&self, data: &[u8]) -> Self {
        let event_digest = self.hash_algorithm.digest(data);
        let value = self
            .hash_algorithm
            .digest_all([&self.value[..], &event_digest[..]]);

        Self {
            hash_algorithm: self.hash_algorithm,
            value,
        }
    }

    /// Extend the reset value with every event of `events`, in order.
    pub fn replay<I, E>(hash_algorithm: HashAlgorithm, events: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: AsRef<[u8]>,
    {
        events
            .into_iter()
            .fold(Self::new(hash_algorithm), |pcr, event| {
                pcr.extend(event.as_ref())
            })
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn into_value(self) -> Vec<u8> {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(HashAlgorithm::Sha256)]
    #[case(HashAlgorithm::Sha384)]
    #[case(HashAlgorithm::Sha512)]
    fn test_extend_matches_definition(#[case] alg: HashAlgorithm) {
        let zero = vec![0u8; alg.digest_len()];
        let extended = extend(alg, &zero, b"VERITY_INITRAMFS").unwrap();

        let mut material = zero.clone();
        material.extend_from_slice(&alg.digest(b"VERITY_INITRAMFS"));
        assert_eq!(extended, alg.digest(&material));
        assert_eq!(
            PcrHashValue::new(alg).extend(b"VERITY_INITRAMFS").value(),
            &extended[..]
        );
    }

    #[test]
    fn test_extend_rejects_wrong_length() {
        let err = extend(HashAlgorithm::Sha256, &[0u8; 20], b"event").unwrap_err();
        assert_eq!(
            err,
            PcrError::InvalidDigestLength {
                expected: 32,
                actual: 20
            }
        );
    }

    #[test]
    fn test_extend_is_not_commutative() {
        let ab = PcrHashValue::replay(HashAlgorithm::Sha256, ["a", "b"]);
        let ba = PcrHashValue::replay(HashAlgorithm::Sha256, ["b", "a"]);
        assert_ne!(ab, ba);
    }

    #[test]
    fn test_extend_does_not_mutate() {
        let start = PcrHashValue::new(HashAlgorithm::Sha256);
        let once = start.extend(b"event");
        let again = start.extend(b"event");
        assert_eq!(start.value(), &[0u8; 32][..]);
        assert_eq!(once, again);
    }

    #[test]
    fn test_replay_known_value() {
        // sha256(zero || sha256("a")), then extended with "b"
        let a = PcrHashValue::new(HashAlgorithm::Sha256).extend(b"a");
        let ab = a.extend(b"b");
        assert_eq!(
            PcrHashValue::replay(HashAlgorithm::Sha256, [b"a", b"b"]).value(),
            ab.value()
        );
        assert_eq!(
            hex::encode(extend(HashAlgorithm::Sha256, a.value(), b"b").unwrap()),
            hex::encode(ab.value())
        );
    }
}
