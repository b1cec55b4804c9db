// Copyright (c) 2025 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use log::debug;
use openssl::error::ErrorStack;
use openssl::stack::Stack;
use openssl::x509::store::{X509Store, X509StoreBuilder};
use openssl::x509::verify::X509VerifyFlags;
use openssl::x509::{X509StoreContext, X509};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("AK certificate is invalid: {reason}")]
pub struct CertificateInvalid {
    pub reason: String,
}

impl CertificateInvalid {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl From<ErrorStack> for CertificateInvalid {
    fn from(e: ErrorStack) -> Self {
        Self::new(e.to_string())
    }
}

/// Validates AK certificates against a fixed set of trust anchors.
///
/// Anchors do not have to be self-signed: the vTPM intermediate CA is
/// trusted directly. Revocation is not checked.
pub struct CertificateVerifier {
    store: X509Store,
    roots: usize,
}

impl CertificateVerifier {
    pub fn new(roots: &[X509]) -> Result<Self, CertificateInvalid> {
        if roots.is_empty() {
            return Err(CertificateInvalid::new("no trusted root certificates"));
        }

        let mut builder = X509StoreBuilder::new()?;
        for root in roots {
            builder.add_cert(root.clone())?;
        }
        builder.set_flags(X509VerifyFlags::PARTIAL_CHAIN)?;

        Ok(Self {
            store: builder.build(),
            roots: roots.len(),
        })
    }

    /// Load every certificate of a PEM bundle as a trust anchor.
    pub fn from_pem(pem: &[u8]) -> Result<Self, CertificateInvalid> {
        let roots = X509::stack_from_pem(pem)?;
        Self::new(&roots)
    }

    pub fn roots(&self) -> usize {
        self.roots
    }

    pub fn verify(&self, leaf: &X509) -> Result<(), CertificateInvalid> {
        let chain = Stack::new()?;
        let mut context = X509StoreContext::new()?;
        let (verified, result) = context.init(&self.store, leaf, &chain, |c| {
            let verified = c.verify_cert()?;
            Ok((verified, c.error()))
        })?;

        if !verified {
            return Err(CertificateInvalid::new(result.error_string()));
        }

        debug!("AK certificate chains to one of {} trusted roots", self.roots);
        Ok(())
    }
}
