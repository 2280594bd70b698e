//! 池化流的调优参数。
//!
//! # 模块定位（Why）
//! - 宿主进程（例如内存受限的函数计算实例）需要在构造 [`StreamManager`](crate::StreamManager)
//!   时一次性确定块大小、分级上限与池容量，之后所有流共享同一份参数；
//! - 参数既可以通过 [`StreamPoolConfig::builder`] 以代码方式给出，
//!   也可以借助 `serde` 从 TOML/JSON 等配置文件反序列化。
//!
//! # 契约说明（What）
//! - 缺省值：小块 4 KiB、大块 1 MiB、最多 16 倍大块分级、池容量不设上限；
//! - [`StreamPoolConfig::validate`] 在管理器构造时强制执行，非法配置返回
//!   [`StreamError::InvalidConfig`]。

use serde::Deserialize;

use crate::error::{Result, StreamError};

/// 小块分级的默认尺寸。
pub const DEFAULT_SMALL_BLOCK_SIZE: usize = 4 * 1024;
/// 大块分级的基准尺寸。
pub const DEFAULT_LARGE_BLOCK_SIZE: usize = 1024 * 1024;
/// 大块分级的默认最大倍数。
pub const DEFAULT_MAX_LARGE_MULTIPLE: usize = 16;

/// 池管理器构造参数。
///
/// # 字段语义
/// - `small_block_size`：小块分级的固定尺寸，也是每条流的首块尺寸；
/// - `large_block_size`：大块分级的基准尺寸，流超过小块后按该尺寸逐块增长；
/// - `max_large_multiple`：大块分级的最大倍数，超过 `max_large_multiple × large_block_size`
///   的请求走一次性分配，归还时直接丢弃；
/// - `small_threshold`：小块与大块的分界，`<= small_threshold` 的请求命中小块分级；
/// - `max_pooled_bytes`：自由链表合计可驻留的最大字节数，超出部分归还时丢弃；
/// - `max_stream_capacity`：单条流的逻辑长度上限；
/// - `zero_on_return`：归还前是否清零块内容。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamPoolConfig {
    pub small_block_size: usize,
    pub large_block_size: usize,
    pub max_large_multiple: usize,
    pub small_threshold: usize,
    pub max_pooled_bytes: usize,
    pub max_stream_capacity: usize,
    pub zero_on_return: bool,
}

impl Default for StreamPoolConfig {
    fn default() -> Self {
        Self {
            small_block_size: DEFAULT_SMALL_BLOCK_SIZE,
            large_block_size: DEFAULT_LARGE_BLOCK_SIZE,
            max_large_multiple: DEFAULT_MAX_LARGE_MULTIPLE,
            small_threshold: DEFAULT_SMALL_BLOCK_SIZE,
            max_pooled_bytes: usize::MAX,
            max_stream_capacity: usize::MAX,
            zero_on_return: false,
        }
    }
}

impl StreamPoolConfig {
    /// 以默认值为起点构造配置。
    pub fn builder() -> StreamPoolConfigBuilder {
        StreamPoolConfigBuilder {
            config: Self::default(),
            threshold_overridden: false,
        }
    }

    /// 最大分级尺寸，超过该值的请求走一次性分配。
    pub fn largest_tier_size(&self) -> usize {
        self.large_block_size.saturating_mul(self.max_large_multiple)
    }

    /// 校验参数之间的约束。
    ///
    /// # 契约说明（What）
    /// - 所有尺寸必须大于 0，`max_large_multiple >= 1`；
    /// - `small_threshold <= small_block_size`，保证命中小块分级的请求总能被小块容纳；
    /// - `small_block_size <= large_block_size`，保证分级尺寸单调递增。
    pub fn validate(&self) -> Result<()> {
        if self.small_block_size == 0 || self.large_block_size == 0 {
            return Err(StreamError::invalid_config("block sizes must be non-zero"));
        }
        if self.max_large_multiple == 0 {
            return Err(StreamError::invalid_config(
                "max_large_multiple must be at least 1",
            ));
        }
        if self.small_threshold > self.small_block_size {
            return Err(StreamError::invalid_config(format!(
                "small_threshold {} exceeds small_block_size {}",
                self.small_threshold, self.small_block_size
            )));
        }
        if self.small_block_size > self.large_block_size {
            return Err(StreamError::invalid_config(format!(
                "small_block_size {} exceeds large_block_size {}",
                self.small_block_size, self.large_block_size
            )));
        }
        Ok(())
    }
}

/// [`StreamPoolConfig`] 的链式构造器。
///
/// 未显式设置 `small_threshold` 时，它跟随 `small_block_size`。
#[derive(Clone, Debug)]
pub struct StreamPoolConfigBuilder {
    config: StreamPoolConfig,
    threshold_overridden: bool,
}

impl StreamPoolConfigBuilder {
    #[must_use]
    pub fn small_block_size(mut self, size: usize) -> Self {
        self.config.small_block_size = size;
        if !self.threshold_overridden {
            self.config.small_threshold = size;
        }
        self
    }

    #[must_use]
    pub fn large_block_size(mut self, size: usize) -> Self {
        self.config.large_block_size = size;
        self
    }

    #[must_use]
    pub fn max_large_multiple(mut self, multiple: usize) -> Self {
        self.config.max_large_multiple = multiple;
        self
    }

    #[must_use]
    pub fn small_threshold(mut self, threshold: usize) -> Self {
        self.config.small_threshold = threshold;
        self.threshold_overridden = true;
        self
    }

    #[must_use]
    pub fn max_pooled_bytes(mut self, bytes: usize) -> Self {
        self.config.max_pooled_bytes = bytes;
        self
    }

    #[must_use]
    pub fn max_stream_capacity(mut self, bytes: usize) -> Self {
        self.config.max_stream_capacity = bytes;
        self
    }

    #[must_use]
    pub fn zero_on_return(mut self, enabled: bool) -> Self {
        self.config.zero_on_return = enabled;
        self
    }

    /// 校验并产出配置。
    pub fn build(self) -> Result<StreamPoolConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
