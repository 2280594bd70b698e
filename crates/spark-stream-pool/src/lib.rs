#![deny(unsafe_code)]

//! `spark-stream-pool` 提供基于分级自由链表的可复用内存块池，以及构建其上的可增长字节流。
//!
//! # 模块定位（Why）
//! - 高吞吐的“序列化为字节 → 对字节求哈希”流水线若每次都分配一段连续大缓冲，
//!   会持续触发大对象分配路径；
//! - 本 crate 将缓冲拆为固定尺寸的块，按分级放入自由链表复用，
//!   对调用方仍呈现一段连续、可读写、可定位的字节流。
//!
//! # 设计概要（How）
//! - [`block`]：`Block` 为移动语义的定长字节块，编译期杜绝双重持有；
//! - [`tier`]：分级策略，把请求尺寸映射到小块、大块倍数或一次性块；
//! - [`pool`]：`TieredBlockPool`，每个分级一把锁，驻留字节以 CAS 记账并受上限约束；
//! - [`stream`]：`PooledStream`，首块为小块、其后按大块增长，实现 `std::io` 与 `bytes::Buf`；
//! - [`manager`]：`StreamManager`，持有配置与池，是流的唯一工厂；
//! - [`config`] 与 [`error`]：调优参数与稳定错误码。
//!
//! # 使用示例
//! ```rust
//! use std::io::Write;
//! use spark_stream_pool::{StreamManager, StreamPoolConfig};
//!
//! let manager = StreamManager::new(StreamPoolConfig::default()).expect("默认配置合法");
//! let mut stream = manager.get_stream("example");
//! stream.write_all(br#"{"hello":"world"}"#).expect("写入");
//! stream.rewind().expect("回绕");
//! assert_eq!(stream.to_vec().expect("读取"), br#"{"hello":"world"}"#);
//! ```

pub mod block;
pub mod config;
pub mod error;
pub mod manager;
pub mod pool;
pub mod stream;
mod sync;
pub mod tier;

pub use block::Block;
pub use config::{StreamPoolConfig, StreamPoolConfigBuilder};
pub use error::{Result, StreamError, codes};
pub use manager::{ManagerStats, StreamManager};
pub use pool::{PoolStats, ReturnOutcome, TieredBlockPool};
pub use stream::{Chunks, PooledStream};
pub use tier::{Tier, TierLayout};
