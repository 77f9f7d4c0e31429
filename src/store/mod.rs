// Copyright (c) wBAN, Inc.
// SPDX-License-Identifier: Apache-2.0

pub mod keys;
pub mod kv;
pub mod ledger;
pub mod memory;
pub mod redis;

pub use kv::{KvStore, WriteBatch};
pub use ledger::LedgerStore;
pub use memory::MemoryKvStore;
pub use self::redis::RedisKvStore;
