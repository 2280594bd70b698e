use bytes::BytesMut;
use tracing::trace;

use crate::tier::Tier;

/// `Block` 是池化的最小单位：一段容量固定、连续的字节区域。
///
/// # 设计动机（Why）
/// - 块在池与流之间以**移动语义**转交：类型既不实现 `Clone` 也不暴露底层存储的共享句柄，
///   因而“同一块同时被两个持有者引用”在编译期即无法表达；
/// - 存储选用 `BytesMut`，与框架其余缓冲实现保持一致，并在归还时保留原分配以供复用。
///
/// # 契约说明（What）
/// - **前置条件**：`capacity` 必须等于所属分级的块尺寸（一次性块除外）；
/// - **后置条件**：`capacity()` 在整个生命周期内不变；内容初始化为 0；
/// - 丢弃 `Block` 即释放其内存，池外无任何跟踪。
#[derive(Debug)]
pub struct Block {
    tier: Tier,
    storage: BytesMut,
}

impl Block {
    /// 直接向全局分配器申请一块新存储，不经过池。
    ///
    /// 分配失败由全局分配器处理（进程终止），此处不返回错误。
    pub fn allocate(tier: Tier, capacity: usize) -> Self {
        trace!(?tier, capacity, "allocating block");
        Self {
            tier,
            storage: BytesMut::zeroed(capacity),
        }
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.storage
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.storage
    }

    /// 将内容全部清零。
    pub fn zero(&mut self) {
        self.storage.fill(0);
    }

    /// 把 `src` 拷贝到 `offset` 起始处，返回实际写入的字节数（受剩余容量限制）。
    pub(crate) fn write_at(&mut self, offset: usize, src: &[u8]) -> usize {
        let dst = &mut self.storage[offset..];
        let len = dst.len().min(src.len());
        dst[..len].copy_from_slice(&src[..len]);
        len
    }

    /// 从 `offset` 起拷贝到 `dst`，返回实际读取的字节数（受剩余容量限制）。
    pub(crate) fn read_at(&self, offset: usize, dst: &mut [u8]) -> usize {
        let src = &self.storage[offset..];
        let len = src.len().min(dst.len());
        dst[..len].copy_from_slice(&src[..len]);
        len
    }

    /// 将 `[offset, offset + len)` 区间清零。
    pub(crate) fn zero_range(&mut self, offset: usize, len: usize) {
        self.storage[offset..offset + len].fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_is_fixed_and_zeroed() {
        let block = Block::allocate(Tier::Small, 64);
        assert_eq!(block.capacity(), 64);
        assert_eq!(block.tier(), Tier::Small);
        assert!(block.as_slice().iter().all(|byte| *byte == 0));
    }

    #[test]
    fn partial_copies_respect_capacity() {
        let mut block = Block::allocate(Tier::Large(1), 8);
        assert_eq!(block.write_at(6, b"abcd"), 2);
        let mut out = [0u8; 4];
        assert_eq!(block.read_at(5, &mut out), 3);
        assert_eq!(&out[..3], b"\0ab");

        block.zero_range(6, 2);
        block.write_at(0, b"xy");
        block.zero();
        assert_eq!(block.capacity(), 8);
        assert!(block.as_slice().iter().all(|byte| *byte == 0));
    }
}
