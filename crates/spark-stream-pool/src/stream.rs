use std::{
    borrow::Cow,
    fmt,
    io::{self, SeekFrom},
    mem,
    sync::Arc,
};

use bytes::Buf;
use tracing::{debug, trace};

use crate::{
    block::Block,
    error::{Result, StreamError},
    manager::StreamCounters,
    pool::TieredBlockPool,
    tier::Tier,
};

/// 流持有块的两种布局。
///
/// - `Chunked`：首块为小块分级，其后均为 `Large(1)` 分级，逻辑拼接而物理分散；
/// - `Contiguous`：单块承载全部内容，由 [`PooledStream::make_contiguous`] 产生。
enum Layout {
    Chunked(Vec<Block>),
    Contiguous(Block),
}

impl Layout {
    fn block(&self, index: usize) -> &Block {
        match self {
            Layout::Chunked(blocks) => &blocks[index],
            Layout::Contiguous(block) => block,
        }
    }

    fn block_mut(&mut self, index: usize) -> &mut Block {
        match self {
            Layout::Chunked(blocks) => &mut blocks[index],
            Layout::Contiguous(block) => block,
        }
    }

    fn block_count(&self) -> usize {
        match self {
            Layout::Chunked(blocks) => blocks.len(),
            Layout::Contiguous(_) => 1,
        }
    }

    fn into_blocks(self) -> Vec<Block> {
        match self {
            Layout::Chunked(blocks) => blocks,
            Layout::Contiguous(block) => vec![block],
        }
    }
}

/// `PooledStream` 是由池化块拼接而成的可增长字节流。
///
/// # 设计动机（Why）
/// - 序列化器需要一个“写入即增长”的字节汇，哈希函数需要一个“回绕后顺序读取”的字节源；
///   若每次都分配一段连续大缓冲，将在高吞吐流水线中反复触发大对象分配；
/// - 流改为按块增长：块从 [`TieredBlockPool`] 租借，释放时全部归还，下一位调用方直接复用。
///
/// # 架构关系（How）
/// - 首块使用小块分级，逻辑长度超过小块后按固定的大块尺寸逐块追加；
///   偏移到 `(块下标, 块内偏移)` 的映射为 O(1)；
/// - 跨块读写在受影响的块上做有界循环，逐段拷贝；
/// - 位置越过逻辑长度后写入时，空洞先被清零，再写入新数据；
/// - 实现 `std::io::{Read, Write, Seek}` 与 `bytes::Buf`，可直接交给 `serde_json::to_writer`
///   或按块喂给哈希器。
///
/// # 契约说明（What）
/// - **单一持有者**：所有变更操作要求 `&mut self`，同一实例不应跨线程并发使用；
/// - **释放**：[`dispose`](Self::dispose) 归还全部块并进入已释放状态，可重复调用；
///   `Drop` 同样执行释放，保证提前返回、`?` 传播与 panic 展开路径上块都会回到池中；
/// - **已释放后**：读写、定位与长度查询均返回 [`StreamError::Disposed`]。
///
/// # 风险与取舍（Trade-offs）
/// - 截断（`set_len` 缩短）不归还块，容量保留到释放为止；
/// - 连续布局下继续增长需要换用更大的分级并整体拷贝，适合“写完再取连续视图”的用法。
pub struct PooledStream {
    id: u64,
    tag: Cow<'static, str>,
    pool: TieredBlockPool,
    counters: Arc<StreamCounters>,
    layout: Layout,
    small_block_size: usize,
    large_block_size: usize,
    capacity: usize,
    length: usize,
    position: usize,
    max_capacity: usize,
    disposed: bool,
}

impl PooledStream {
    pub(crate) fn new(
        id: u64,
        tag: Cow<'static, str>,
        pool: TieredBlockPool,
        max_capacity: usize,
        counters: Arc<StreamCounters>,
    ) -> Self {
        let small_block_size = pool.layout().small_block_size();
        let large_block_size = pool.layout().large_block_size();
        Self {
            id,
            tag,
            pool,
            counters,
            layout: Layout::Chunked(Vec::new()),
            small_block_size,
            large_block_size,
            capacity: 0,
            length: 0,
            position: 0,
            max_capacity,
            disposed: false,
        }
    }

    /// 管理器分配的流编号，仅用于诊断。
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 创建时传入的诊断标签。
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// 逻辑长度（写入的最高水位）。
    pub fn len(&self) -> Result<usize> {
        self.ensure_live()?;
        Ok(self.length)
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.len().map(|len| len == 0)
    }

    /// 当前读写位置。
    pub fn position(&self) -> Result<usize> {
        self.ensure_live()?;
        Ok(self.position)
    }

    /// 直接设置读写位置，允许越过逻辑长度。
    pub fn set_position(&mut self, position: usize) -> Result<()> {
        self.ensure_live()?;
        self.position = position;
        Ok(())
    }

    /// 已持有块的容量合计。
    pub fn capacity(&self) -> Result<usize> {
        self.ensure_live()?;
        Ok(self.capacity)
    }

    /// 从当前位置到逻辑末尾的可读字节数。
    pub fn remaining(&self) -> Result<usize> {
        self.ensure_live()?;
        Ok(self.readable())
    }

    /// 预先租借块，使容量至少为 `capacity`。
    pub fn reserve(&mut self, capacity: usize) -> Result<()> {
        self.ensure_live()?;
        self.check_limit(capacity)?;
        self.ensure_capacity(capacity);
        Ok(())
    }

    /// 在当前位置写入 `src`，必要时先增长。
    ///
    /// # 执行步骤（How）
    /// 1. 计算写入终点并校验溢出与单流上限；
    /// 2. 按增长算法补足块；
    /// 3. 若位置越过逻辑长度，把空洞清零；
    /// 4. 跨块逐段拷贝，推进位置与逻辑长度。
    pub fn write(&mut self, src: &[u8]) -> Result<()> {
        self.ensure_live()?;
        if src.is_empty() {
            return Ok(());
        }
        let end = self
            .position
            .checked_add(src.len())
            .ok_or(StreamError::CapacityOverflow)?;
        self.check_limit(end)?;
        self.ensure_capacity(end);
        if self.position > self.length {
            self.zero_range(self.length, self.position);
        }
        self.copy_in(self.position, src);
        self.position = end;
        self.length = self.length.max(end);
        Ok(())
    }

    /// 从当前位置读取至多 `dst.len()` 字节，返回实际读取数；到达末尾返回 0。
    pub fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        self.ensure_live()?;
        let count = dst.len().min(self.readable());
        if count == 0 {
            return Ok(0);
        }
        self.copy_out(self.position, &mut dst[..count]);
        self.position += count;
        Ok(count)
    }

    /// 重新定位；结果为负时返回 [`StreamError::NegativeSeek`]，越过末尾是允许的。
    pub fn seek(&mut self, target: SeekFrom) -> Result<u64> {
        self.ensure_live()?;
        let target = match target {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::Current(delta) => self.position as i128 + i128::from(delta),
            SeekFrom::End(delta) => self.length as i128 + i128::from(delta),
        };
        if target < 0 {
            return Err(StreamError::NegativeSeek { target });
        }
        let position = usize::try_from(target).map_err(|_| StreamError::CapacityOverflow)?;
        self.position = position;
        Ok(position as u64)
    }

    /// 回绕到起点，等价于 `seek(SeekFrom::Start(0))`。
    pub fn rewind(&mut self) -> Result<()> {
        self.set_position(0)
    }

    /// 调整逻辑长度：缩短时截断（位置随之收紧），加长时以 0 填充。
    pub fn set_len(&mut self, len: usize) -> Result<()> {
        self.ensure_live()?;
        if len > self.length {
            self.check_limit(len)?;
            self.ensure_capacity(len);
            self.zero_range(self.length, len);
        }
        self.length = len;
        self.position = self.position.min(len);
        Ok(())
    }

    /// 复制全部逻辑内容，不改变位置。
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        self.ensure_live()?;
        let mut out = vec![0u8; self.length];
        self.copy_out(0, &mut out);
        Ok(out)
    }

    /// 把全部逻辑内容写入 `sink`，不改变位置。
    pub fn write_to<W: io::Write + ?Sized>(&self, sink: &mut W) -> io::Result<()> {
        self.ensure_live()?;
        for chunk in self.segments(0, self.length) {
            sink.write_all(chunk)?;
        }
        Ok(())
    }

    /// 以块为单位迭代从当前位置到末尾的内容，不拷贝也不推进位置。
    pub fn chunks(&self) -> Result<Chunks<'_>> {
        self.ensure_live()?;
        Ok(self.segments(self.position, self.length))
    }

    /// 把内容收拢到单个块并返回其连续视图。
    ///
    /// # 契约说明（What）
    /// - 目标块取能容纳逻辑长度的最小分级，超过最大分级时为一次性块；
    /// - 原有块全部归还；位置与逻辑长度不变；
    /// - 之后的增长会换用更大的分级并整体拷贝。
    pub fn make_contiguous(&mut self) -> Result<&[u8]> {
        self.ensure_live()?;
        if self.layout.block_count() > 1 {
            let mut target = self.pool.checkout(self.length);
            let mut offset = 0;
            for chunk in self.segments(0, self.length) {
                offset += target.write_at(offset, chunk);
            }
            let previous = mem::replace(&mut self.layout, Layout::Contiguous(target));
            for block in previous.into_blocks() {
                self.pool.give_back(block);
            }
            self.capacity = self.layout.block(0).capacity();
        } else if let Layout::Chunked(blocks) = &mut self.layout {
            if let Some(block) = blocks.pop() {
                self.layout = Layout::Contiguous(block);
            }
        }

        match &self.layout {
            Layout::Contiguous(block) => Ok(&block.as_slice()[..self.length]),
            Layout::Chunked(_) => Ok(&[]),
        }
    }

    /// 归还全部块并进入已释放状态；重复调用仅记录一次诊断日志。
    pub fn dispose(&mut self) {
        if self.disposed {
            debug!(stream_id = self.id, tag = %self.tag, "stream disposed more than once");
            self.counters.record_double_dispose();
            return;
        }
        self.release();
    }

    fn release(&mut self) {
        let layout = mem::replace(&mut self.layout, Layout::Chunked(Vec::new()));
        let blocks = layout.into_blocks();
        trace!(
            stream_id = self.id,
            tag = %self.tag,
            length = self.length,
            blocks = blocks.len(),
            "disposing stream"
        );
        for block in blocks {
            self.pool.give_back(block);
        }
        self.capacity = 0;
        self.length = 0;
        self.position = 0;
        self.disposed = true;
        self.counters.record_dispose();
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed {
            Err(StreamError::Disposed {
                id: self.id,
                tag: self.tag.clone(),
            })
        } else {
            Ok(())
        }
    }

    fn check_limit(&self, requested: usize) -> Result<()> {
        if requested > self.max_capacity {
            Err(StreamError::CapacityExceeded {
                requested,
                limit: self.max_capacity,
            })
        } else {
            Ok(())
        }
    }

    fn readable(&self) -> usize {
        self.length.saturating_sub(self.position)
    }

    /// 按增长算法补足容量。
    fn ensure_capacity(&mut self, required: usize) {
        if required <= self.capacity {
            return;
        }
        match &mut self.layout {
            Layout::Chunked(blocks) => {
                while self.capacity < required {
                    let tier = if blocks.is_empty() {
                        Tier::Small
                    } else {
                        Tier::Large(1)
                    };
                    let block = self.pool.checkout_tier(tier);
                    self.capacity += block.capacity();
                    blocks.push(block);
                }
            }
            Layout::Contiguous(current) => {
                let target = contiguous_growth_target(
                    required,
                    current.capacity(),
                    self.pool.layout().largest_tier_size(),
                    self.large_block_size,
                );
                let mut grown = self.pool.checkout(target);
                grown.write_at(0, &current.as_slice()[..self.length]);
                let previous = mem::replace(current, grown);
                self.capacity = current.capacity();
                self.pool.give_back(previous);
            }
        }
    }

    /// 逻辑偏移到 `(块下标, 块内偏移)`；调用方保证 `offset < capacity`。
    fn locate(&self, offset: usize) -> (usize, usize) {
        match self.layout {
            Layout::Contiguous(_) => (0, offset),
            Layout::Chunked(_) if offset < self.small_block_size => (0, offset),
            Layout::Chunked(_) => {
                let rest = offset - self.small_block_size;
                (
                    1 + rest / self.large_block_size,
                    rest % self.large_block_size,
                )
            }
        }
    }

    fn copy_in(&mut self, start: usize, src: &[u8]) {
        let mut written = 0;
        while written < src.len() {
            let (index, offset) = self.locate(start + written);
            written += self
                .layout
                .block_mut(index)
                .write_at(offset, &src[written..]);
        }
    }

    fn copy_out(&self, start: usize, dst: &mut [u8]) {
        let mut read = 0;
        while read < dst.len() {
            let (index, offset) = self.locate(start + read);
            read += self.layout.block(index).read_at(offset, &mut dst[read..]);
        }
    }

    fn zero_range(&mut self, start: usize, end: usize) {
        let mut cursor = start;
        while cursor < end {
            let (index, offset) = self.locate(cursor);
            let block = self.layout.block_mut(index);
            let len = (block.capacity() - offset).min(end - cursor);
            block.zero_range(offset, len);
            cursor += len;
        }
    }

    fn segments(&self, start: usize, end: usize) -> Chunks<'_> {
        Chunks {
            stream: self,
            cursor: start,
            end,
        }
    }

    /// 当前位置所在块的可读切片（以逻辑末尾为界）。
    fn current_chunk(&self) -> &[u8] {
        if self.disposed || self.readable() == 0 {
            return &[];
        }
        let (index, offset) = self.locate(self.position);
        let block = self.layout.block(index).as_slice();
        let len = (block.len() - offset).min(self.readable());
        &block[offset..offset + len]
    }
}

/// 连续布局的增长目标。
///
/// 分级范围内直接取所需尺寸，由分级向上取整；越过最大分级后按当前容量倍增，
/// 并取整到大块尺寸的倍数，使逐字节追加的一次性分配次数为对数级。
fn contiguous_growth_target(
    required: usize,
    current: usize,
    largest_tier_size: usize,
    large_block_size: usize,
) -> usize {
    if required <= largest_tier_size {
        return required;
    }
    let doubled = required.max(current.saturating_mul(2));
    doubled
        .div_ceil(large_block_size)
        .checked_mul(large_block_size)
        .unwrap_or(doubled)
}

impl Drop for PooledStream {
    fn drop(&mut self) {
        if !self.disposed {
            self.release();
        }
    }
}

impl fmt::Debug for PooledStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledStream")
            .field("id", &self.id)
            .field("tag", &self.tag)
            .field("length", &self.length)
            .field("position", &self.position)
            .field("capacity", &self.capacity)
            .field("blocks", &self.layout.block_count())
            .field("disposed", &self.disposed)
            .finish()
    }
}

/// [`PooledStream::chunks`] 返回的分块迭代器。
pub struct Chunks<'a> {
    stream: &'a PooledStream,
    cursor: usize,
    end: usize,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.end {
            return None;
        }
        let (index, offset) = self.stream.locate(self.cursor);
        let block = self.stream.layout.block(index).as_slice();
        let len = (block.len() - offset).min(self.end - self.cursor);
        self.cursor += len;
        Some(&block[offset..offset + len])
    }
}

impl io::Write for PooledStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        PooledStream::write(self, buf)?;
        Ok(buf.len())
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        PooledStream::write(self, buf).map_err(Into::into)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.ensure_live().map_err(Into::into)
    }
}

impl io::Read for PooledStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        PooledStream::read(self, buf).map_err(Into::into)
    }
}

impl io::Seek for PooledStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        PooledStream::seek(self, pos).map_err(Into::into)
    }
}

/// 以 `bytes::Buf` 视角消费可读区间；已释放的流表现为空缓冲。
impl Buf for PooledStream {
    fn remaining(&self) -> usize {
        if self.disposed { 0 } else { self.readable() }
    }

    fn chunk(&self) -> &[u8] {
        self.current_chunk()
    }

    fn advance(&mut self, cnt: usize) {
        assert!(
            cnt <= Buf::remaining(self),
            "advance 超出可读字节：请求 {cnt}，剩余 {}",
            Buf::remaining(self)
        );
        self.position += cnt;
    }
}
