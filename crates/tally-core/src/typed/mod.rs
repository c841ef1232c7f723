//! Typed - 型付き Task API
//!
//! payload の型と TaskType の対応を型で表し、
//! Handler との対応付けを静的に保証します。
//!
//! # 構成
//! - **Task**: payload 型と、それが担う TaskType
//! - **Handler<T>**: 型付き handler
//! - **PayloadCodec / WireBody**: bytes ⇔ payload、Celery 風 body の解釈

pub mod codec;
pub mod handler;
pub mod task;

pub use self::codec::{PayloadCodec, WireBody};
pub use self::handler::{Handler, Handlers};
pub use self::task::{CompetitionId, Submission, Task, WinnerTrigger};
