// Copyright (c) wBAN, Inc.
// SPDX-License-Identifier: Apache-2.0

//! wBAN contract client.
//!
//! Redemption and mint events are read with plain log filters; the mint
//! receipt is an off-chain authorization, a signature over
//! `keccak256(abi.encode(address, amount, uuid))` that the contract
//! verifies when the user mints.

use crate::error::{BridgeError, BridgeResult};
use crate::types::{now_ms, MintReceipt, WbanEvent, BAN_DECIMALS};
use async_trait::async_trait;
use ethers::abi::{self, ParamType, Token};
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Filter, TransactionRequest, ValueOrArray, H256, U256};
use ethers::utils::{format_units, keccak256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

const REDEMPTION_EVENT: &str = "SwapToBan(address,string,uint256,uint256)";
const MINT_EVENT: &str = "Mint(address,uint256)";

#[async_trait]
pub trait WbanClient: Send + Sync {
    /// Current chain head
    async fn head_block(&self) -> BridgeResult<u64>;

    /// Redemption and mint events in `[from_block, to_block]`, ascending
    async fn fetch_events(&self, from_block: u64, to_block: u64) -> BridgeResult<Vec<WbanEvent>>;

    /// Issue a signed mint authorization. No chain transaction happens
    /// here, so the call is free to retry.
    async fn create_mint_receipt(
        &self,
        blockchain_address: &str,
        amount: u128,
    ) -> BridgeResult<MintReceipt>;
}

pub struct WbanContractClient {
    provider: Arc<Provider<Http>>,
    contract: Address,
    signer: LocalWallet,
    redemption_topic: H256,
    mint_topic: H256,
}

fn upstream(e: impl std::fmt::Display) -> BridgeError {
    BridgeError::UpstreamChainFailure(e.to_string())
}

/// Human-readable amount from a uint256, trailing zeros trimmed
fn human_amount(value: U256) -> String {
    let formatted = format_units(value, BAN_DECIMALS).unwrap_or_else(|_| "0".to_string());
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

impl WbanContractClient {
    pub fn new(
        rpc_url: &str,
        contract_address: &str,
        receipt_signer_key: &str,
    ) -> anyhow::Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)?;
        let contract: Address = contract_address.parse()?;
        let signer: LocalWallet = receipt_signer_key.parse()?;
        Ok(Self {
            provider: Arc::new(provider),
            contract,
            signer,
            redemption_topic: H256::from(keccak256(REDEMPTION_EVENT)),
            mint_topic: H256::from(keccak256(MINT_EVENT)),
        })
    }

    async fn block_timestamp(&self, number: u64, cache: &mut HashMap<u64, i64>) -> i64 {
        if let Some(ts) = cache.get(&number) {
            return *ts;
        }
        let ts = match self.provider.get_block(number).await {
            Ok(Some(block)) => block.timestamp.as_u64() as i64,
            _ => {
                warn!("could not fetch header for block {}", number);
                now_ms() / 1000
            }
        };
        cache.insert(number, ts);
        ts
    }

    async fn wban_balance_of(&self, address: Address) -> BridgeResult<U256> {
        let mut data = keccak256("balanceOf(address)")[..4].to_vec();
        data.extend(abi::encode(&[Token::Address(address)]));
        let tx: TypedTransaction = TransactionRequest::new()
            .to(self.contract)
            .data(data)
            .into();
        let raw = self.provider.call(&tx, None).await.map_err(upstream)?;
        if raw.len() > 32 {
            return Err(BridgeError::UpstreamChainFailure(format!(
                "unexpected balanceOf return of {} bytes",
                raw.len()
            )));
        }
        Ok(U256::from_big_endian(&raw))
    }
}

#[async_trait]
impl WbanClient for WbanContractClient {
    async fn head_block(&self) -> BridgeResult<u64> {
        Ok(self
            .provider
            .get_block_number()
            .await
            .map_err(upstream)?
            .as_u64())
    }

    async fn fetch_events(&self, from_block: u64, to_block: u64) -> BridgeResult<Vec<WbanEvent>> {
        let filter = Filter::new()
            .address(self.contract)
            .from_block(from_block)
            .to_block(to_block)
            .topic0(ValueOrArray::Array(vec![
                self.redemption_topic,
                self.mint_topic,
            ]));
        let logs = self.provider.get_logs(&filter).await.map_err(upstream)?;

        let mut timestamps: HashMap<u64, i64> = HashMap::new();
        let mut events = Vec::with_capacity(logs.len());
        for log in logs {
            let Some(topic0) = log.topics.first().copied() else {
                continue;
            };
            if log.topics.len() < 2 {
                warn!("log with missing indexed topic in block {:?}", log.block_number);
                continue;
            }
            let emitter = Address::from_slice(&log.topics[1].as_bytes()[12..]);
            let hash = log
                .transaction_hash
                .map(|h| format!("{:?}", h))
                .unwrap_or_default();

            if topic0 == self.redemption_topic {
                let tokens = abi::decode(
                    &[
                        ParamType::String,
                        ParamType::Uint(256),
                        ParamType::Uint(256),
                    ],
                    &log.data,
                )
                .map_err(|e| {
                    BridgeError::UpstreamChainFailure(format!(
                        "undecodable redemption event in {}: {}",
                        hash, e
                    ))
                })?;
                let native_address = tokens[0].clone().into_string().unwrap_or_default();
                let amount = tokens[1].clone().into_uint().unwrap_or_default();
                let wban_balance = tokens[2].clone().into_uint().unwrap_or_default();
                let block_number = log.block_number.map(|b| b.as_u64()).unwrap_or(from_block);
                let timestamp_seconds = self.block_timestamp(block_number, &mut timestamps).await;

                events.push(WbanEvent::Redemption {
                    blockchain_address: format!("{:?}", emitter),
                    native_address,
                    amount: human_amount(amount),
                    hash,
                    timestamp_seconds,
                    wban_balance: human_amount(wban_balance),
                });
            } else if topic0 == self.mint_topic {
                let tokens = abi::decode(&[ParamType::Uint(256)], &log.data).map_err(|e| {
                    BridgeError::UpstreamChainFailure(format!(
                        "undecodable mint event in {}: {}",
                        hash, e
                    ))
                })?;
                let amount = tokens[0].clone().into_uint().unwrap_or_default();
                events.push(WbanEvent::Mint {
                    blockchain_address: format!("{:?}", emitter),
                    amount: if amount > U256::from(u128::MAX) {
                        u128::MAX
                    } else {
                        amount.as_u128()
                    },
                    hash,
                });
            }
        }
        Ok(events)
    }

    async fn create_mint_receipt(
        &self,
        blockchain_address: &str,
        amount: u128,
    ) -> BridgeResult<MintReceipt> {
        let address: Address = blockchain_address.parse().map_err(|e| {
            BridgeError::Generic(format!(
                "invalid blockchain address {}: {}",
                blockchain_address, e
            ))
        })?;
        let uuid = uuid::Uuid::new_v4().as_u128();
        let digest = keccak256(abi::encode(&[
            Token::Address(address),
            Token::Uint(U256::from(amount)),
            Token::Uint(U256::from(uuid)),
        ]));
        let signature = self
            .signer
            .sign_message(digest)
            .await
            .map_err(|e| BridgeError::Generic(format!("receipt signing failed: {}", e)))?;

        let balance = self.wban_balance_of(address).await?;
        Ok(MintReceipt {
            receipt: format!("0x{}", signature),
            uuid: uuid.to_string(),
            wban_balance: if balance > U256::from(u128::MAX) {
                u128::MAX
            } else {
                balance.as_u128()
            },
        })
    }
}
