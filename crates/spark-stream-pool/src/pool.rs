use std::sync::Arc;

use tracing::debug;

use crate::{
    block::Block,
    config::StreamPoolConfig,
    sync::{AtomicU64, AtomicUsize, Mutex, Ordering},
    tier::{Tier, TierLayout},
};

/// `TieredBlockPool` 为每个块分级维护一条自由链表（Free List），
/// 专注在**高并发、低延迟**场景下复用固定尺寸的 [`Block`]，避免每次序列化都走大对象分配路径。
///
/// # 模块角色（Why）
/// - 作为 [`PooledStream`](crate::PooledStream) 的唯一块来源：流增长时 `checkout`，释放时 `give_back`；
/// - 按分级拆分自由链表，使同一链表内的块尺寸一致，租借与归还都是 O(1) 的栈操作；
/// - 通过驻留字节上限约束池的内存峰值，超出部分直接交还分配器。
///
/// # 核心机制（How）
/// - 小块分级与每个大块倍数各持有一把 `parking_lot::Mutex<Vec<Block>>`，不同分级之间互不阻塞；
/// - `pooled_bytes` 以原子整数记账：块入链前先用 CAS **预留**字节，预留失败即丢弃，
///   出链后再扣减，因此任意时刻驻留字节都不会超过 `max_pooled_bytes`；
/// - `PoolMetrics` 以原子计数跟踪命中、未命中、归还、丢弃等指标，支撑 [`PoolStats`] 快照。
///
/// # 契约说明（What）
/// - **线程安全**：所有共享状态均由分级锁与原子计数保护，满足 `Send + Sync + 'static`；
/// - **不变量**：静止时 `Σ(各分级块数 × 分级尺寸) == pooled_bytes() <= max_pooled_bytes()`；
/// - **失败语义**：`checkout` 不返回错误，内存耗尽由全局分配器终止进程。
///
/// # 设计权衡（Trade-offs）
/// - 预留与入链之间存在短暂窗口，此时 `pooled_bytes` 略高于链表实际驻留量；
///   这一偏差只会让上限更保守，不会被突破；
/// - 不做自动收缩或 LRU 淘汰，驻留内存仅能通过 [`trim`](Self::trim) 显式释放。
#[derive(Clone)]
pub struct TieredBlockPool {
    inner: Arc<PoolInner>,
}

impl TieredBlockPool {
    /// 按配置创建空池。调用方需先完成 [`StreamPoolConfig::validate`]。
    pub fn new(config: &StreamPoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner::new(config)),
        }
    }

    pub fn layout(&self) -> &TierLayout {
        &self.inner.layout
    }

    /// 请求尺寸对应的分级。
    pub fn select_tier(&self, requested: usize) -> Tier {
        self.inner.layout.select(requested)
    }

    /// 租借一个能容纳 `requested` 字节的块。
    pub fn checkout(&self, requested: usize) -> Block {
        self.checkout_tier(self.select_tier(requested))
    }

    /// 租借指定分级的块：优先弹出自由链表，未命中时新建。
    ///
    /// 仅供流的增长算法使用；分级必须来自 [`TierLayout`]。
    pub(crate) fn checkout_tier(&self, tier: Tier) -> Block {
        self.inner.checkout(tier)
    }

    /// 归还块；池已满或块不可入池时直接丢弃。
    pub fn give_back(&self, block: Block) -> ReturnOutcome {
        self.inner.give_back(block)
    }

    /// 清空所有自由链表，返回释放的字节数。
    pub fn trim(&self) -> usize {
        self.inner.trim()
    }

    /// 当前驻留在自由链表中的字节数。
    pub fn pooled_bytes(&self) -> usize {
        self.inner.pooled_bytes.load(Ordering::Acquire)
    }

    pub fn max_pooled_bytes(&self) -> usize {
        self.inner.max_pooled_bytes
    }

    /// 指定分级自由链表中的块数；一次性分级恒为 0。
    pub fn free_blocks(&self, tier: Tier) -> usize {
        self.inner
            .free_list(tier)
            .map(|list| list.lock().len())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.snapshot()
    }
}

/// `give_back` 的处理结果，仅用于诊断。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReturnOutcome {
    /// 块已进入自由链表。
    Pooled,
    /// 池已达驻留上限，块被丢弃。
    Dropped,
    /// 一次性块或不属于本池分级的块，直接释放。
    Discarded,
}

struct PoolInner {
    layout: TierLayout,
    small: Mutex<Vec<Block>>,
    /// 下标 `k - 1` 对应 `Tier::Large(k)`。
    large: Box<[Mutex<Vec<Block>>]>,
    pooled_bytes: AtomicUsize,
    max_pooled_bytes: usize,
    zero_on_return: bool,
    metrics: PoolMetrics,
}

impl PoolInner {
    fn new(config: &StreamPoolConfig) -> Self {
        let layout = TierLayout::from_config(config);
        let large = (0..layout.large_tier_count())
            .map(|_| Mutex::new(Vec::new()))
            .collect();
        Self {
            layout,
            small: Mutex::new(Vec::new()),
            large,
            pooled_bytes: AtomicUsize::new(0),
            max_pooled_bytes: config.max_pooled_bytes,
            zero_on_return: config.zero_on_return,
            metrics: PoolMetrics::default(),
        }
    }

    fn free_list(&self, tier: Tier) -> Option<&Mutex<Vec<Block>>> {
        match tier {
            Tier::Small => Some(&self.small),
            Tier::Large(multiple) => multiple
                .checked_sub(1)
                .and_then(|index| self.large.get(index)),
            Tier::OneOff(_) => None,
        }
    }

    fn checkout(&self, tier: Tier) -> Block {
        let size = self.layout.size_of(tier);
        let Some(list) = self.free_list(tier) else {
            self.metrics.one_off_allocations.fetch_add(1, Ordering::Relaxed);
            return Block::allocate(tier, size);
        };

        let reused = list.lock().pop();
        match reused {
            Some(block) => {
                self.pooled_bytes.fetch_sub(block.capacity(), Ordering::AcqRel);
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                block
            }
            None => {
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                Block::allocate(tier, size)
            }
        }
    }

    fn give_back(&self, mut block: Block) -> ReturnOutcome {
        let tier = block.tier();
        let size = block.capacity();
        let list = match self.free_list(tier) {
            Some(list) if self.layout.size_of(tier) == size => list,
            _ => {
                debug!(?tier, size, "releasing unpooled block");
                self.metrics.discarded.fetch_add(1, Ordering::Relaxed);
                return ReturnOutcome::Discarded;
            }
        };

        if !self.reserve(size) {
            debug!(
                ?tier,
                size,
                max_pooled_bytes = self.max_pooled_bytes,
                "pool at capacity, dropping returned block"
            );
            self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
            return ReturnOutcome::Dropped;
        }

        if self.zero_on_return {
            block.zero();
        }
        list.lock().push(block);
        self.metrics.returned.fetch_add(1, Ordering::Relaxed);
        ReturnOutcome::Pooled
    }

    /// 以 CAS 预留 `size` 字节的驻留额度。
    fn reserve(&self, size: usize) -> bool {
        self.pooled_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current
                    .checked_add(size)
                    .filter(|next| *next <= self.max_pooled_bytes)
            })
            .is_ok()
    }

    fn trim(&self) -> usize {
        let lists = core::iter::once(&self.small).chain(self.large.iter());
        let mut reclaimed = 0usize;
        for list in lists {
            let drained: Vec<Block> = list.lock().drain(..).collect();
            let bytes: usize = drained.iter().map(Block::capacity).sum();
            self.pooled_bytes.fetch_sub(bytes, Ordering::AcqRel);
            reclaimed += bytes;
        }
        self.metrics
            .trimmed_bytes
            .fetch_add(reclaimed as u64, Ordering::Relaxed);
        debug!(reclaimed, "trimmed block pool");
        reclaimed
    }

    fn snapshot(&self) -> PoolStats {
        let free_blocks = core::iter::once(&self.small)
            .chain(self.large.iter())
            .map(|list| list.lock().len())
            .sum();
        PoolStats {
            pooled_bytes: self.pooled_bytes.load(Ordering::Acquire),
            free_blocks,
            hits: self.metrics.hits.load(Ordering::Relaxed),
            misses: self.metrics.misses.load(Ordering::Relaxed),
            returned: self.metrics.returned.load(Ordering::Relaxed),
            dropped: self.metrics.dropped.load(Ordering::Relaxed),
            discarded: self.metrics.discarded.load(Ordering::Relaxed),
            one_off_allocations: self.metrics.one_off_allocations.load(Ordering::Relaxed),
            trimmed_bytes: self.metrics.trimmed_bytes.load(Ordering::Relaxed),
        }
    }
}

#[derive(Default)]
struct PoolMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    returned: AtomicU64,
    dropped: AtomicU64,
    discarded: AtomicU64,
    one_off_allocations: AtomicU64,
    trimmed_bytes: AtomicU64,
}

/// 池统计快照，供监控或测试断言使用。
///
/// 各计数器独立读取，并发修改期间的快照不保证彼此一致。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// 自由链表当前驻留字节数。
    pub pooled_bytes: usize,
    /// 自由链表当前驻留块数（所有分级合计）。
    pub free_blocks: usize,
    /// 命中自由链表的租借次数。
    pub hits: u64,
    /// 未命中、新建块的租借次数（不含一次性块）。
    pub misses: u64,
    /// 成功入池的归还次数。
    pub returned: u64,
    /// 因驻留上限被丢弃的归还次数。
    pub dropped: u64,
    /// 一次性块或异源块的归还次数。
    pub discarded: u64,
    /// 一次性块的分配次数。
    pub one_off_allocations: u64,
    /// `trim` 累计释放的字节数。
    pub trimmed_bytes: u64,
}

impl PoolStats {
    /// 命中率（0.0 ~ 1.0），尚无租借时为 0。
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
