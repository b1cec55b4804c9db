// Copyright (c) 2025 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! Codec for the TPM 2.0 structures a quote is made of.
//!
//! All integers are big-endian. Decoding is strict: unknown tags, more than
//! one PCR selection and trailing bytes are errors.

use std::io::Write;

use scroll::ctx::TryFromCtx;
use scroll::{Endian, IOwrite, Pread, BE};

use crate::error::{Result, VerifyError};

/// `TPM_GENERATED_VALUE`, the magic of every TPM generated structure.
pub const TPM_GENERATED_VALUE: u32 = 0xff54_4347;
/// `TPM_ST_ATTEST_QUOTE`
pub const TPM_ST_ATTEST_QUOTE: u16 = 0x8018;

pub const TPM_ALG_RSASSA: u16 = 0x0014;
pub const TPM_ALG_RSAPSS: u16 = 0x0016;
pub const TPM_ALG_ECDSA: u16 = 0x0018;
pub const TPM_ALG_NULL: u16 = 0x0010;

/// Size of the PCR bitmap for a 24 PCR bank.
const PCR_SELECT_MIN: u8 = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pread)]
pub struct ClockInfo {
    pub clock: u64,
    pub reset_count: u32,
    pub restart_count: u32,
    pub safe: u8,
}

/// A single `TPMS_PCR_SELECTION`, with the bitmap expanded to ascending PCR
/// indices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PcrSelection {
    pub hash_alg: u16,
    pub pcrs: Vec<u32>,
}

/// A `TPMS_ATTEST` of type quote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedQuote {
    pub qualified_signer: Vec<u8>,
    /// `extraData`, the qualifying data passed to `TPM2_Quote`
    pub nonce: Vec<u8>,
    pub clock_info: ClockInfo,
    pub firmware_version: u64,
    pub pcr_selection: PcrSelection,
    pub pcr_digest: Vec<u8>,
}

/// A `TPMT_SIGNATURE` using RSASSA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteSignature {
    pub sig_alg: u16,
    pub hash_alg: u16,
    pub signature: Vec<u8>,
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn read<N>(&mut self, field: &str) -> std::result::Result<N, String>
    where
        N: TryFromCtx<'a, Endian, Error = scroll::Error>,
    {
        let bytes = self.bytes;
        bytes
            .gread_with(&mut self.offset, BE)
            .map_err(|e| format!("{field}: {e}"))
    }

    fn bytes(&mut self, len: usize, field: &str) -> std::result::Result<&'a [u8], String> {
        let bytes = self.bytes;
        bytes
            .gread_with::<&'a [u8]>(&mut self.offset, len)
            .map_err(|e| format!("{field}: {e}"))
    }

    /// A `TPM2B_*`: u16 size followed by that many bytes.
    fn sized(&mut self, field: &str) -> std::result::Result<Vec<u8>, String> {
        let size: u16 = self.read(field)?;
        Ok(self.bytes(size as usize, field)?.to_vec())
    }

    fn finish(&self) -> std::result::Result<(), String> {
        match self.bytes.len() - self.offset {
            0 => Ok(()),
            trailing => Err(format!("{trailing} trailing bytes")),
        }
    }
}

pub fn decode_quote(bytes: &[u8]) -> Result<DecodedQuote> {
    let mut reader = Reader::new(bytes);

    let magic: u32 = reader.read("magic").map_err(VerifyError::MalformedQuote)?;
    if magic != TPM_GENERATED_VALUE {
        return Err(VerifyError::MalformedQuote(format!(
            "bad magic {magic:#010x}"
        )));
    }

    let attest_type: u16 = reader.read("type").map_err(VerifyError::MalformedQuote)?;
    if attest_type != TPM_ST_ATTEST_QUOTE {
        return Err(VerifyError::MalformedQuote(format!(
            "attestation type {attest_type:#06x} is not a quote"
        )));
    }

    decode_quote_body(&mut reader).map_err(VerifyError::MalformedQuote)
}

fn decode_quote_body(reader: &mut Reader) -> std::result::Result<DecodedQuote, String> {
    let qualified_signer = reader.sized("qualifiedSigner")?;
    let nonce = reader.sized("extraData")?;
    let clock_info = reader.read::<ClockInfo>("clockInfo")?;
    let firmware_version = reader.read::<u64>("firmwareVersion")?;

    let count: u32 = reader.read("pcrSelect.count")?;
    if count != 1 {
        return Err(format!("expected exactly one PCR selection, got {count}"));
    }
    let hash_alg: u16 = reader.read("pcrSelect.hash")?;
    let size_of_select: u8 = reader.read("pcrSelect.sizeofSelect")?;
    let bitmap = reader.bytes(size_of_select as usize, "pcrSelect.pcrSelect")?;

    let pcrs = bitmap
        .iter()
        .enumerate()
        .flat_map(|(byte, bits)| {
            (0..8u32)
                .filter(move |bit| bits & (1u8 << bit) != 0)
                .map(move |bit| byte as u32 * 8 + bit)
        })
        .collect();

    let pcr_digest = reader.sized("pcrDigest")?;
    reader.finish()?;

    Ok(DecodedQuote {
        qualified_signer,
        nonce,
        clock_info,
        firmware_version,
        pcr_selection: PcrSelection { hash_alg, pcrs },
        pcr_digest,
    })
}

/// Decode a `TPMT_SIGNATURE`. Anything but RSASSA is refused before the rest
/// of the structure is looked at.
pub fn decode_signature(bytes: &[u8]) -> Result<QuoteSignature> {
    let mut reader = Reader::new(bytes);

    let sig_alg: u16 = reader
        .read("sigAlg")
        .map_err(VerifyError::MalformedSignature)?;
    if sig_alg != TPM_ALG_RSASSA {
        return Err(VerifyError::UnsupportedAlgorithm {
            kind: "signature",
            id: sig_alg,
        });
    }

    decode_signature_body(&mut reader, sig_alg).map_err(VerifyError::MalformedSignature)
}

fn decode_signature_body(
    reader: &mut Reader,
    sig_alg: u16,
) -> std::result::Result<QuoteSignature, String> {
    let hash_alg: u16 = reader.read("hash")?;
    let signature = reader.sized("sig")?;
    reader.finish()?;

    Ok(QuoteSignature {
        sig_alg,
        hash_alg,
        signature,
    })
}

fn write_sized<W: Write>(w: &mut W, bytes: &[u8]) -> std::io::Result<()> {
    let size = u16::try_from(bytes.len())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "TPM2B too large"))?;
    w.iowrite_with(size, BE)?;
    w.write_all(bytes)
}

impl PcrSelection {
    fn bitmap(&self) -> Vec<u8> {
        let max = self.pcrs.iter().max().map_or(0, |max| max / 8 + 1);
        let mut bitmap = vec![0u8; (max as usize).max(PCR_SELECT_MIN as usize)];
        for pcr in &self.pcrs {
            bitmap[(pcr / 8) as usize] |= 1u8 << (pcr % 8);
        }
        bitmap
    }
}

impl DecodedQuote {
    /// Marshal into a `TPMS_ATTEST` of type quote.
    pub fn encode(&self) -> std::io::Result<Vec<u8>> {
        let mut out = Vec::new();
        out.iowrite_with(TPM_GENERATED_VALUE, BE)?;
        out.iowrite_with(TPM_ST_ATTEST_QUOTE, BE)?;
        write_sized(&mut out, &self.qualified_signer)?;
        write_sized(&mut out, &self.nonce)?;

        out.iowrite_with(self.clock_info.clock, BE)?;
        out.iowrite_with(self.clock_info.reset_count, BE)?;
        out.iowrite_with(self.clock_info.restart_count, BE)?;
        out.iowrite_with(self.clock_info.safe, BE)?;
        out.iowrite_with(self.firmware_version, BE)?;

        let bitmap = self.pcr_selection.bitmap();
        out.iowrite_with(1u32, BE)?;
        out.iowrite_with(self.pcr_selection.hash_alg, BE)?;
        let size_of_select = u8::try_from(bitmap.len()).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "PCR selection too large")
        })?;
        out.iowrite_with(size_of_select, BE)?;
        out.write_all(&bitmap)?;

        write_sized(&mut out, &self.pcr_digest)?;
        Ok(out)
    }
}

impl QuoteSignature {
    pub fn encode(&self) -> std::io::Result<Vec<u8>> {
        let mut out = Vec::new();
        out.iowrite_with(self.sig_alg, BE)?;
        out.iowrite_with(self.hash_alg, BE)?;
        write_sized(&mut out, &self.signature)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn sample_quote() -> DecodedQuote {
        DecodedQuote {
            qualified_signer: vec![0x00, 0x0b, 0xaa, 0xbb],
            nonce: b"12345678".to_vec(),
            clock_info: ClockInfo {
                clock: 0x0102_0304_0506_0708,
                reset_count: 3,
                restart_count: 1,
                safe: 1,
            },
            firmware_version: 0x2020_0000_0000_0001,
            pcr_selection: PcrSelection {
                hash_alg: crypto::TPM_ALG_SHA256,
                pcrs: vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 11],
            },
            pcr_digest: vec![0x5a; 32],
        }
    }

    #[test]
    fn test_quote_layout() {
        let encoded = sample_quote().encode().unwrap();

        assert_eq!(&encoded[..4], &[0xff, 0x54, 0x43, 0x47]);
        assert_eq!(&encoded[4..6], &[0x80, 0x18]);
        // qualifiedSigner
        assert_eq!(&encoded[6..12], &[0x00, 0x04, 0x00, 0x0b, 0xaa, 0xbb]);
        // extraData
        assert_eq!(&encoded[12..14], &[0x00, 0x08]);
        assert_eq!(&encoded[14..22], b"12345678");
        // clockInfo (17 bytes) and firmwareVersion (8 bytes)
        let selection = 22 + 17 + 8;
        assert_eq!(
            &encoded[selection..selection + 10],
            &[0x00, 0x00, 0x00, 0x01, 0x00, 0x0b, 0x03, 0xff, 0x0b, 0x00]
        );
        assert_eq!(&encoded[selection + 10..selection + 12], &[0x00, 0x20]);
        assert_eq!(encoded.len(), selection + 12 + 32);

        assert_eq!(decode_quote(&encoded).unwrap(), sample_quote());
    }

    #[test]
    fn test_decode_rejects_non_quote() {
        let mut encoded = sample_quote().encode().unwrap();
        // TPM_ST_ATTEST_CERTIFY
        encoded[4..6].copy_from_slice(&[0x80, 0x17]);
        assert!(matches!(
            decode_quote(&encoded),
            Err(VerifyError::MalformedQuote(_))
        ));

        let mut encoded = sample_quote().encode().unwrap();
        encoded[0] = 0x00;
        assert!(matches!(
            decode_quote(&encoded),
            Err(VerifyError::MalformedQuote(_))
        ));
    }

    #[rstest]
    #[case::empty(0)]
    #[case::magic_only(4)]
    #[case::truncated_digest(70)]
    fn test_decode_rejects_truncated(#[case] len: usize) {
        let encoded = sample_quote().encode().unwrap();
        assert!(matches!(
            decode_quote(&encoded[..len]),
            Err(VerifyError::MalformedQuote(_))
        ));
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let mut encoded = sample_quote().encode().unwrap();
        encoded.push(0);
        let err = decode_quote(&encoded).unwrap_err();
        assert_eq!(err.to_string(), "malformed quote: 1 trailing bytes");
    }

    #[test]
    fn test_decode_rejects_multiple_selections() {
        let mut encoded = sample_quote().encode().unwrap();
        let count = 22 + 17 + 8;
        encoded[count + 3] = 2;
        assert!(matches!(
            decode_quote(&encoded),
            Err(VerifyError::MalformedQuote(_))
        ));
    }

    #[rstest]
    #[case::largest(2039, true)]
    #[case::too_large(2040, false)]
    fn test_encode_selection_size(#[case] pcr: u32, #[case] accepted: bool) {
        let mut quote = sample_quote();
        quote.pcr_selection.pcrs = vec![0, pcr];

        match quote.encode() {
            Ok(encoded) => {
                assert!(accepted);
                assert_eq!(decode_quote(&encoded).unwrap(), quote);
            }
            Err(err) => {
                assert!(!accepted);
                assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
            }
        }
    }

    #[test]
    fn test_signature() {
        let signature = QuoteSignature {
            sig_alg: TPM_ALG_RSASSA,
            hash_alg: crypto::TPM_ALG_SHA256,
            signature: vec![0x42; 256],
        };
        let encoded = signature.encode().unwrap();
        assert_eq!(&encoded[..6], &[0x00, 0x14, 0x00, 0x0b, 0x01, 0x00]);
        assert_eq!(decode_signature(&encoded).unwrap(), signature);

        assert!(matches!(
            decode_signature(&encoded[..100]),
            Err(VerifyError::MalformedSignature(_))
        ));
        assert!(matches!(
            decode_signature(&[0x00]),
            Err(VerifyError::MalformedSignature(_))
        ));
    }

    #[rstest]
    #[case::rsapss(TPM_ALG_RSAPSS)]
    #[case::ecdsa(TPM_ALG_ECDSA)]
    #[case::null(TPM_ALG_NULL)]
    fn test_signature_rejects_other_schemes(#[case] sig_alg: u16) {
        let encoded = QuoteSignature {
            sig_alg,
            hash_alg: crypto::TPM_ALG_SHA256,
            signature: vec![0x42; 64],
        }
        .encode()
        .unwrap();

        match decode_signature(&encoded) {
            Err(VerifyError::UnsupportedAlgorithm { kind, id }) => {
                assert_eq!(kind, "signature");
                assert_eq!(id, sig_alg);
            }
            other => panic!("unexpected result {other:?}"),
        }
    }
}
