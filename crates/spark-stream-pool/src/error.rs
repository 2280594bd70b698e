//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 汇总池化流在误用、容量越界与配置非法时的错误语义，让调用方可以用 `?` 直接传播；
//! - 内存耗尽不在此列：全局分配器失败即进程终止，本模块不尝试表达或恢复。
//!
//! ## 设计要求（What）
//! - 所有错误类型实现 `thiserror::Error`，兼容 `std::error::Error` 与 `std::io::Error`；
//! - 每个变体映射到稳定错误码（见 [`codes`]），遵循 `<领域>.<语义>` 命名约定；
//! - 误用类错误（已释放、负向定位）可恢复，调用方可通过 [`StreamError::is_misuse`] 判定。

use std::{borrow::Cow, io};

use thiserror::Error;

/// 池化流错误码集合。
///
/// 错误码以 `'static` 字符串承载，便于日志检索与指标聚合。
pub mod codes {
    /// 在已释放的流上执行读写或定位。
    pub const STREAM_DISPOSED: &str = "buffer.stream_disposed";
    /// 定位结果为负数。
    pub const STREAM_NEGATIVE_SEEK: &str = "buffer.invalid_argument";
    /// 位置或长度计算溢出 `usize`。
    pub const STREAM_CAPACITY_OVERFLOW: &str = "buffer.capacity_overflow";
    /// 超出配置的单流容量上限。
    pub const STREAM_CAPACITY_EXCEEDED: &str = "buffer.capacity_exceeded";
    /// 池配置不满足约束。
    pub const POOL_INVALID_CONFIG: &str = "buffer.invalid_config";
}

/// 池化流与块池的统一错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：将“误用”与“容量”两类可恢复失败显式化，避免调用方解析字符串推断语义；
/// - **契约 (What)**：
///   - 所有变体均为 `Send + Sync + 'static`，可跨线程传播；
///   - `Disposed` 携带流编号与标签，仅用于排障，不参与行为判定；
///   - 通过 `From<StreamError> for io::Error` 接入 `std::io` 生态；
/// - **设计权衡 (Trade-offs)**：标签以 `Cow<'static, str>` 保存，静态标签零分配，动态标签付出一次克隆。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum StreamError {
    /// 流已释放，后续读写与定位全部拒绝。
    #[error("stream #{id} (`{tag}`) has been disposed")]
    Disposed { id: u64, tag: Cow<'static, str> },

    /// 定位目标落在 0 之前。
    #[error("seek to negative position {target}")]
    NegativeSeek { target: i128 },

    /// 位置加长度超过 `usize` 表示范围。
    #[error("stream position arithmetic overflowed")]
    CapacityOverflow,

    /// 请求的逻辑长度超过 `max_stream_capacity`。
    #[error("requested stream length {requested} exceeds limit {limit}")]
    CapacityExceeded { requested: usize, limit: usize },

    /// 配置校验失败。
    #[error("invalid stream pool configuration: {reason}")]
    InvalidConfig { reason: Cow<'static, str> },
}

impl StreamError {
    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            StreamError::Disposed { .. } => codes::STREAM_DISPOSED,
            StreamError::NegativeSeek { .. } => codes::STREAM_NEGATIVE_SEEK,
            StreamError::CapacityOverflow => codes::STREAM_CAPACITY_OVERFLOW,
            StreamError::CapacityExceeded { .. } => codes::STREAM_CAPACITY_EXCEEDED,
            StreamError::InvalidConfig { .. } => codes::POOL_INVALID_CONFIG,
        }
    }

    /// 是否属于调用方误用（可捕获、不应以同一流重试）。
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            StreamError::Disposed { .. } | StreamError::NegativeSeek { .. }
        )
    }

    pub(crate) fn invalid_config(reason: impl Into<Cow<'static, str>>) -> Self {
        StreamError::InvalidConfig {
            reason: reason.into(),
        }
    }
}

impl From<StreamError> for io::Error {
    fn from(err: StreamError) -> Self {
        let kind = match err {
            StreamError::NegativeSeek { .. } | StreamError::InvalidConfig { .. } => {
                io::ErrorKind::InvalidInput
            }
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

/// 池化流操作的结果别名。
pub type Result<T, E = StreamError> = core::result::Result<T, E>;
