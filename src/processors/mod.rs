// Copyright (c) wBAN, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Job handlers for the three operation kinds. The router dispatches a
//! dequeued job to the matching state machine.

pub mod swap_to_ban;
pub mod swap_to_wban;
pub mod withdrawal;

pub use swap_to_ban::SwapToBanProcessor;
pub use swap_to_wban::SwapToWbanProcessor;
pub use withdrawal::WithdrawalProcessor;

use crate::error::BridgeResult;
use crate::queue::JobHandler;
use crate::types::{Job, JobOutcome, Operation};
use async_trait::async_trait;

pub struct OperationRouter {
    withdrawal: WithdrawalProcessor,
    swap_to_wban: SwapToWbanProcessor,
    swap_to_ban: SwapToBanProcessor,
}

impl OperationRouter {
    pub fn new(
        withdrawal: WithdrawalProcessor,
        swap_to_wban: SwapToWbanProcessor,
        swap_to_ban: SwapToBanProcessor,
    ) -> Self {
        Self {
            withdrawal,
            swap_to_wban,
            swap_to_ban,
        }
    }
}

#[async_trait]
impl JobHandler for OperationRouter {
    async fn handle(&self, job: &Job) -> BridgeResult<JobOutcome> {
        match &job.operation {
            Operation::NativeWithdrawal {
                native_address,
                blockchain_address,
                amount,
                timestamp_ms,
                signature,
                attempt,
            } => self
                .withdrawal
                .handle(
                    native_address,
                    blockchain_address,
                    amount,
                    *timestamp_ms,
                    signature,
                    *attempt,
                )
                .await
                .map(JobOutcome::Withdrawal),
            Operation::SwapToWban {
                native_address,
                blockchain_address,
                amount,
                timestamp_ms,
                signature,
                gasless,
            } => self
                .swap_to_wban
                .handle(
                    native_address,
                    blockchain_address,
                    amount,
                    *timestamp_ms,
                    signature,
                    *gasless,
                )
                .await
                .map(JobOutcome::SwapToWban),
            Operation::SwapToBan {
                blockchain_address,
                native_address,
                amount,
                hash,
                event_timestamp_seconds,
                wban_balance: _,
            } => self
                .swap_to_ban
                .handle(
                    blockchain_address,
                    native_address,
                    amount,
                    hash,
                    *event_timestamp_seconds,
                )
                .await
                .map(|_| JobOutcome::SwapToBan),
        }
    }
}
