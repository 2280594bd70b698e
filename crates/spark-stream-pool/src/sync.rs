//! 块池使用的同步原语。
//!
//! 常规构建使用 `parking_lot::Mutex` 与标准原子类型；启用 `--cfg loom`（或 `spark_loom`）时
//! 切换到 Loom 的实现，让模型检查直接穷举 [`TieredBlockPool`](crate::TieredBlockPool)
//! 的真实调度交错。`Arc` 保持标准实现，Loom 只需要追踪锁与原子操作。

#[cfg(not(any(loom, spark_loom)))]
pub(crate) use parking_lot::Mutex;
#[cfg(not(any(loom, spark_loom)))]
pub(crate) use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

#[cfg(any(loom, spark_loom))]
pub(crate) use loom::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Loom 互斥锁的薄封装，对外呈现与 `parking_lot::Mutex` 相同的无毒化 `lock()`。
#[cfg(any(loom, spark_loom))]
pub(crate) struct Mutex<T>(loom::sync::Mutex<T>);

#[cfg(any(loom, spark_loom))]
impl<T> Mutex<T> {
    pub(crate) fn new(value: T) -> Self {
        Self(loom::sync::Mutex::new(value))
    }

    pub(crate) fn lock(&self) -> loom::sync::MutexGuard<'_, T> {
        self.0.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
