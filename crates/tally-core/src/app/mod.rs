//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてワーカーを実装します。
//!
//! # 主要コンポーネント
//! - **AppBuilder**: アプリケーションの構築とワイヤリング
//! - **TaskExecutor**: タスク種別ごとのハンドラ呼び出しと計測
//! - **WorkerGroup**: ディスパッチループ（consume→begin→execute→decide→settle）
//! - **TaskProducer**: タスクの投入（即時 / 遅延）

pub mod builder;
pub mod context;
pub mod executor;
pub mod handlers;
pub mod producer;
pub mod status;
pub mod worker_loop;

// 主要な型を再エクスポート
pub use self::builder::{App, AppBuilder, BuildError, RunningApp, StartupError};
pub use self::context::{TaskContext, WorkerContext};
pub use self::executor::TaskExecutor;
pub use self::handlers::{SubmissionHandler, WinnerTriggerHandler};
pub use self::producer::TaskProducer;
pub use self::status::StatusReport;
pub use self::worker_loop::{Dispatcher, WorkerGroup};
