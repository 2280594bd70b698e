use crate::config::StreamPoolConfig;

/// 块所属的分级。
///
/// - `Small`：小块分级，尺寸为 `small_block_size`；
/// - `Large(k)`：第 `k` 个大块分级，尺寸为 `k × large_block_size`，`k >= 1`；
/// - `OneOff(n)`：超过最大分级的一次性块，尺寸恰为 `n`，永不入池。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Tier {
    Small,
    Large(usize),
    OneOff(usize),
}

impl Tier {
    /// 是否可以进入自由链表。
    pub fn is_pooled(self) -> bool {
        !matches!(self, Tier::OneOff(_))
    }
}

/// 分级策略：把请求尺寸映射到分级，并给出每个分级的块尺寸。
///
/// # 契约说明（What）
/// - 请求 `S <= small_threshold` 命中 `Small`；
/// - 否则命中 `Large(ceil(S / large_block_size))`，前提是倍数不超过 `max_large_multiple`；
/// - 仍放不下时返回 `OneOff(S)`；
/// - 配置保证 `small_threshold <= small_block_size <= large_block_size`，所选分级必能容纳 `S`；
///   当 `small_threshold == small_block_size`（缺省）时，所选即不小于 `S` 的最小已配置分级。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TierLayout {
    small_block_size: usize,
    small_threshold: usize,
    large_block_size: usize,
    max_large_multiple: usize,
}

impl TierLayout {
    pub fn from_config(config: &StreamPoolConfig) -> Self {
        Self {
            small_block_size: config.small_block_size,
            small_threshold: config.small_threshold,
            large_block_size: config.large_block_size,
            max_large_multiple: config.max_large_multiple,
        }
    }

    pub fn small_block_size(&self) -> usize {
        self.small_block_size
    }

    pub fn large_block_size(&self) -> usize {
        self.large_block_size
    }

    /// 可入池的大块分级数量。
    pub fn large_tier_count(&self) -> usize {
        self.max_large_multiple
    }

    pub fn largest_tier_size(&self) -> usize {
        self.large_block_size.saturating_mul(self.max_large_multiple)
    }

    /// 为请求尺寸挑选分级。
    pub fn select(&self, requested: usize) -> Tier {
        if requested <= self.small_threshold {
            return Tier::Small;
        }
        let multiple = requested.div_ceil(self.large_block_size);
        if multiple <= self.max_large_multiple {
            Tier::Large(multiple)
        } else {
            Tier::OneOff(requested)
        }
    }

    /// 分级对应的块尺寸；越界的倍数饱和到 `usize::MAX`，不会溢出。
    pub fn size_of(&self, tier: Tier) -> usize {
        match tier {
            Tier::Small => self.small_block_size,
            Tier::Large(multiple) => self.large_block_size.saturating_mul(multiple),
            Tier::OneOff(size) => size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> TierLayout {
        let config = StreamPoolConfig::builder()
            .small_block_size(256)
            .large_block_size(1024)
            .max_large_multiple(4)
            .build()
            .expect("合法配置");
        TierLayout::from_config(&config)
    }

    #[test]
    fn selects_smallest_tier_that_fits() {
        let layout = layout();
        assert_eq!(layout.select(0), Tier::Small);
        assert_eq!(layout.select(256), Tier::Small);
        assert_eq!(layout.select(257), Tier::Large(1));
        assert_eq!(layout.select(1024), Tier::Large(1));
        assert_eq!(layout.select(1025), Tier::Large(2));
        assert_eq!(layout.select(4096), Tier::Large(4));
        assert_eq!(layout.select(4097), Tier::OneOff(4097));
    }

    #[test]
    fn sizes_are_monotonic() {
        let layout = layout();
        assert_eq!(layout.size_of(Tier::Small), 256);
        assert_eq!(layout.size_of(Tier::Large(3)), 3072);
        assert_eq!(layout.size_of(Tier::OneOff(9000)), 9000);
        assert!(!Tier::OneOff(1).is_pooled());
    }

    #[test]
    fn oversized_multiple_saturates() {
        let layout = layout();
        assert_eq!(layout.size_of(Tier::Large(usize::MAX)), usize::MAX);
        assert_eq!(layout.size_of(Tier::Large(0)), 0);
    }
}
