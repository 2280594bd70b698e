use std::{
    borrow::Cow,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use tracing::{debug, trace};

use crate::{
    config::StreamPoolConfig,
    error::Result,
    pool::{PoolStats, TieredBlockPool},
    stream::PooledStream,
};

/// `StreamManager` 是池化流的唯一工厂，持有调优参数与共享的 [`TieredBlockPool`]。
///
/// # 设计动机（Why）
/// - 进程内“构造一次、处处复用”：宿主在启动时创建管理器，再把句柄注入到需要序列化的组件；
/// - 以显式传递的句柄替代全局单例，测试可以各自持有互不干扰的池。
///
/// # 契约说明（What）
/// - 句柄 `Clone` 成本为一次 `Arc` 计数递增，满足 `Send + Sync`，可被多线程并发调用；
/// - `tag` 仅作为诊断标签写入日志字段，不影响任何行为；
/// - 流编号单调递增，从 1 开始。
#[derive(Clone)]
pub struct StreamManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: StreamPoolConfig,
    pool: TieredBlockPool,
    next_id: AtomicU64,
    counters: Arc<StreamCounters>,
}

impl StreamManager {
    /// 校验配置并创建管理器。
    pub fn new(config: StreamPoolConfig) -> Result<Self> {
        if let Err(err) = config.validate() {
            debug!(error = %err, "rejecting stream pool configuration");
            return Err(err);
        }
        Ok(Self::from_validated(config))
    }

    fn from_validated(config: StreamPoolConfig) -> Self {
        let pool = TieredBlockPool::new(&config);
        Self {
            inner: Arc::new(ManagerInner {
                config,
                pool,
                next_id: AtomicU64::new(1),
                counters: Arc::new(StreamCounters::default()),
            }),
        }
    }

    pub fn config(&self) -> &StreamPoolConfig {
        &self.inner.config
    }

    pub fn pool(&self) -> &TieredBlockPool {
        &self.inner.pool
    }

    /// 创建空流；首次写入时才租借块。
    pub fn get_stream(&self, tag: impl Into<Cow<'static, str>>) -> PooledStream {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let tag = tag.into();
        trace!(stream_id = id, tag = %tag, "creating pooled stream");
        self.inner.counters.created.fetch_add(1, Ordering::Relaxed);
        PooledStream::new(
            id,
            tag,
            self.inner.pool.clone(),
            self.inner.config.max_stream_capacity,
            Arc::clone(&self.inner.counters),
        )
    }

    /// 创建容量至少为 `capacity` 的流。
    pub fn get_stream_with_capacity(
        &self,
        tag: impl Into<Cow<'static, str>>,
        capacity: usize,
    ) -> Result<PooledStream> {
        let mut stream = self.get_stream(tag);
        stream.reserve(capacity)?;
        Ok(stream)
    }

    /// 创建内容为 `bytes` 副本的流，位置位于起点。
    pub fn get_stream_from(
        &self,
        tag: impl Into<Cow<'static, str>>,
        bytes: &[u8],
    ) -> Result<PooledStream> {
        let mut stream = self.get_stream_with_capacity(tag, bytes.len())?;
        stream.write(bytes)?;
        stream.rewind()?;
        Ok(stream)
    }

    /// 清空池内全部自由链表，返回释放的字节数。
    pub fn trim(&self) -> usize {
        self.inner.pool.trim()
    }

    pub fn stats(&self) -> ManagerStats {
        let counters = &self.inner.counters;
        ManagerStats {
            streams_created: counters.created.load(Ordering::Relaxed),
            streams_disposed: counters.disposed.load(Ordering::Relaxed),
            streams_double_disposed: counters.double_disposed.load(Ordering::Relaxed),
            pool: self.inner.pool.stats(),
        }
    }
}

impl fmt::Debug for StreamManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamManager")
            .field("config", &self.inner.config)
            .field("pooled_bytes", &self.inner.pool.pooled_bytes())
            .finish_non_exhaustive()
    }
}

impl Default for StreamManager {
    fn default() -> Self {
        Self::from_validated(StreamPoolConfig::default())
    }
}

/// 流生命周期计数，由管理器与其创建的流共享。
#[derive(Default)]
pub(crate) struct StreamCounters {
    created: AtomicU64,
    disposed: AtomicU64,
    double_disposed: AtomicU64,
}

impl StreamCounters {
    pub(crate) fn record_dispose(&self) {
        self.disposed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_double_dispose(&self) {
        self.double_disposed.fetch_add(1, Ordering::Relaxed);
    }
}

/// 管理器统计快照。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ManagerStats {
    pub streams_created: u64,
    pub streams_disposed: u64,
    pub streams_double_disposed: u64,
    pub pool: PoolStats,
}

impl ManagerStats {
    /// 尚未释放的流数量。
    pub fn streams_active(&self) -> u64 {
        self.streams_created.saturating_sub(self.streams_disposed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StreamError;

    #[test]
    fn ids_increase_and_tags_are_kept() {
        let manager = StreamManager::default();
        let first = manager.get_stream("first");
        let second = manager.get_stream(String::from("second"));
        assert_eq!(first.id(), 1);
        assert_eq!(second.id(), 2);
        assert_eq!(second.tag(), "second");
        assert_eq!(manager.stats().streams_active(), 2);
        drop(first);
        drop(second);
        assert_eq!(manager.stats().streams_active(), 0);
    }

    #[test]
    fn get_stream_from_starts_at_origin() {
        let manager = StreamManager::default();
        let mut stream = manager.get_stream_from("seeded", b"payload").expect("预填充");
        assert_eq!(stream.position().expect("位置"), 0);
        let mut out = [0u8; 7];
        assert_eq!(stream.read(&mut out).expect("读取"), 7);
        assert_eq!(&out, b"payload");
    }

    #[test]
    fn capacity_limit_is_enforced() {
        let config = StreamPoolConfig::builder()
            .small_block_size(16)
            .large_block_size(64)
            .max_stream_capacity(100)
            .build()
            .expect("合法配置");
        let manager = StreamManager::new(config).expect("构造管理器");
        let err = manager
            .get_stream_with_capacity("too_big", 101)
            .expect_err("超过单流上限");
        assert_eq!(
            err,
            StreamError::CapacityExceeded {
                requested: 101,
                limit: 100
            }
        );

        let mut stream = manager.get_stream("bounded");
        stream.write(&[0u8; 100]).expect("恰好到达上限");
        assert!(stream.write(&[0u8; 1]).is_err());
        assert_eq!(stream.len().expect("长度"), 100, "失败的写入不改变长度");
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = StreamPoolConfig {
            max_large_multiple: 0,
            ..StreamPoolConfig::default()
        };
        assert!(StreamManager::new(config).is_err());
    }
}
