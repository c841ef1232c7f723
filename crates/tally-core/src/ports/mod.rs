//! Ports - 抽象化レイヤー
//!
//! 各 trait は外部システム（ブローカー、DB、キャッシュ、結果バックエンド）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//! 開発・テスト用の実装は `impls` と `queue::memory` にあります。

pub mod broker;
pub mod cache;
pub mod clock;
pub mod database;
pub mod id_generator;
pub mod result_store;

pub use self::broker::{Broker, BrokerError, Delivery, OutboundMessage, QueueCounts};
pub use self::cache::{Cache, CacheError, SetCondition, SetOptions};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::database::{Connection, ConnectionFactory, DbError, QueryResult, Row, SqlValue};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::result_store::{ResultRecord, ResultStore, ResultStoreError, TaskResult};
