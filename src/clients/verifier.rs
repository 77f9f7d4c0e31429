// Copyright (c) wBAN, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::{BridgeError, BridgeResult};
use ethers::types::Signature;
use ethers::utils::to_checksum;

/// Recovers the EVM address that signed a canonical message.
pub trait SignatureVerifier: Send + Sync {
    /// Returns the checksummed signer address, or `InvalidSignature`
    fn recover(&self, message: &str, signature: &str) -> BridgeResult<String>;
}

/// EIP-191 personal-message recovery
pub struct EvmSignatureVerifier;

impl SignatureVerifier for EvmSignatureVerifier {
    fn recover(&self, message: &str, signature: &str) -> BridgeResult<String> {
        let signature: Signature = signature
            .parse()
            .map_err(|_| BridgeError::InvalidSignature)?;
        let address = signature
            .recover(message)
            .map_err(|_| BridgeError::InvalidSignature)?;
        Ok(to_checksum(&address, None))
    }
}
