//! Impls - 実装（開発用・テスト用）
//!
//! ports の in-process 実装です。外部サービスなしでワーカー全体を動かせます。
//!
//! # 含まれる実装
//! - **InMemoryDatabase**: ConnectionFactory（文の記録・障害注入）
//! - **InMemoryCache**: Cache（TTL、NX/XX、INCR/DECR）
//! - **InMemoryResultStore**: ResultStore
//!
//! ブローカーの in-memory 実装は `queue::memory` にあります。

pub mod memory_cache;
pub mod memory_db;
pub mod memory_results;

pub use self::memory_cache::InMemoryCache;
pub use self::memory_db::{ExecutedStatement, InMemoryDatabase};
pub use self::memory_results::InMemoryResultStore;
