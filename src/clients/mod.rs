// Copyright (c) wBAN, Inc.
// SPDX-License-Identifier: Apache-2.0

pub mod ban;
pub mod blacklist;
pub mod verifier;
pub mod wban;

pub use ban::{BanWalletClient, BananoRpcClient};
pub use blacklist::{Blacklist, StaticBlacklist};
pub use verifier::{EvmSignatureVerifier, SignatureVerifier};
pub use wban::{WbanClient, WbanContractClient};
