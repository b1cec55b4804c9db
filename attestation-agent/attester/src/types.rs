// Copyright (c) 2025 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};

/// Attestation document.
///
/// Produced once per quoting run and never modified afterwards. It travels
/// over untrusted storage before the verifier reads it, so none of its
/// fields mean anything until verification has accepted them.
#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Attestation {
    // DER encoded AK certificate
    #[serde_as(as = "Base64")]
    pub ak_cert: Vec<u8>,
    // Raw TCG boot event log
    #[serde_as(as = "Base64")]
    pub boot_event_log: Vec<u8>,
    // Raw dm-verity measurement log
    #[serde_as(as = "Base64")]
    pub verity_event_log: Vec<u8>,
    // Marshalled TPMS_ATTEST
    #[serde_as(as = "Base64")]
    pub quote_data: Vec<u8>,
    // Marshalled TPMT_SIGNATURE
    #[serde_as(as = "Base64")]
    pub quote_signature: Vec<u8>,
    pub pcrs: Vec<PcrValue>,
}

impl Attestation {
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// One PCR of a bank.
#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PcrValue {
    pub index: u32,
    #[serde_as(as = "Base64")]
    pub value: Vec<u8>,
}

impl PcrValue {
    pub fn new(index: u32, value: Vec<u8>) -> Self {
        Self { index, value }
    }
}

/// Reference PCR values a deployment expects. May name any subset of the
/// quoted PCRs.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpectedPcrs {
    pub pcrs: Vec<PcrValue>,
}

impl ExpectedPcrs {
    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// Sort a PCR list by index. The composite PCR digest of a quote is computed
/// over values in ascending index order.
pub fn sort_pcrs(pcrs: &mut [PcrValue]) {
    pcrs.sort_by_key(|pcr| pcr.index);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attestation_wire_names() {
        let attestation = Attestation {
            ak_cert: vec![1, 2, 3],
            boot_event_log: vec![],
            verity_event_log: b"VERITY_INITRAMFS\n".to_vec(),
            quote_data: vec![0xff],
            quote_signature: vec![0x00, 0x14],
            pcrs: vec![PcrValue::new(11, vec![0; 32])],
        };

        let json: serde_json::Value =
            serde_json::from_slice(&attestation.to_json().unwrap()).unwrap();
        assert_eq!(json["akCert"], "AQID");
        assert_eq!(json["bootEventLog"], "");
        assert_eq!(json["verityEventLog"], "VkVSSVRZX0lOSVRSQU1GUwo=");
        assert_eq!(json["quoteData"], "/w==");
        assert_eq!(json["quoteSignature"], "ABQ=");
        assert_eq!(json["pcrs"][0]["index"], 11);

        let decoded = Attestation::from_json(json.to_string().as_bytes()).unwrap();
        assert_eq!(decoded, attestation);
    }

    #[test]
    fn test_missing_field_is_rejected() {
        let json = r#"{"akCert":"","bootEventLog":"","verityEventLog":"","quoteData":""}"#;
        assert!(Attestation::from_json(json.as_bytes()).is_err());
    }

    #[test]
    fn test_expected_pcrs() {
        let json = r#"{"pcrs":[{"index":4,"value":"AAAA"},{"index":0,"value":"AQID"}]}"#;
        let expected = ExpectedPcrs::from_json(json.as_bytes()).unwrap();
        assert_eq!(expected.pcrs[0], PcrValue::new(4, vec![0, 0, 0]));
        assert_eq!(expected.pcrs[1], PcrValue::new(0, vec![1, 2, 3]));

        let mut pcrs = expected.pcrs;
        sort_pcrs(&mut pcrs);
        assert_eq!(pcrs[0].index, 0);
        assert_eq!(pcrs[1].index, 4);
    }
}
