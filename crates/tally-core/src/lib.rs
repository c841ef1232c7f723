//! tally-core
//!
//! Task-consumer worker for competition submissions.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task_type, envelope, outcome, decision, state, errors）
//! - **ports**: 抽象化レイヤー（Broker, ConnectionFactory, Cache, ResultStore, Clock, IdGenerator）
//! - **pool**: 有界なコネクションプール
//! - **queue**: トポロジー、QueueRouter、遅延配送、in-memory ブローカー
//! - **retry**: リトライポリシーと試行回数の管理
//! - **typed**: 型付き Task API（Task trait, Handler trait, PayloadCodec）
//! - **app**: アプリケーションロジック（builder, executor, worker_loop, producer）
//! - **impls**: 開発・テスト用の in-memory 実装

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod pool;
pub mod ports;
pub mod queue;
pub mod retry;
pub mod typed;

pub use app::{AppBuilder, RunningApp, TaskProducer};
pub use config::WorkerConfig;
pub use domain::{Priority, TaskEnvelope, TaskError, TaskType};
