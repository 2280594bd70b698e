//! 池化流性质验证
//!
//! # 教案级注释概览
//!
//! - **核心目标 (Why)**：以随机生成的操作序列验证两条不变量：
//!   1. 任意字节序列写入新流后从起点读回，内容与写入一致；
//!   2. 任意租借 / 归还交错下，自由链表驻留字节始终不超过上限，且静止时等于各分级块数乘尺寸之和。
//! - **设计手法 (How)**：使用 Proptest 生成写入分段与池操作脚本；
//!   性质 1 以 `Vec<u8>` 作为影子模型对照，性质 2 在每一步之后断言上限。
//! - **合同与边界 (What)**：块尺寸刻意取小（16 / 64），让少量字节即可跨越多个块边界。

use std::io::SeekFrom;

use proptest::prelude::*;
use spark_stream_pool::{
    Block, StreamManager, StreamPoolConfig, Tier, TieredBlockPool,
};

fn tiny_config(max_pooled_bytes: usize) -> StreamPoolConfig {
    StreamPoolConfig::builder()
        .small_block_size(16)
        .large_block_size(64)
        .max_large_multiple(3)
        .max_pooled_bytes(max_pooled_bytes)
        .build()
        .expect("合法配置")
}

/// 流上的一次写入：可选地先定位到某个偏移。
#[derive(Clone, Debug)]
struct WriteStep {
    seek_to: Option<usize>,
    bytes: Vec<u8>,
}

fn write_step() -> impl Strategy<Value = WriteStep> {
    (
        proptest::option::weighted(0.2, 0usize..400),
        proptest::collection::vec(any::<u8>(), 0..150),
    )
        .prop_map(|(seek_to, bytes)| WriteStep { seek_to, bytes })
}

/// 池上的一次操作：租借指定尺寸，或归还第 `n` 个持有块。
#[derive(Clone, Debug)]
enum PoolOp {
    Checkout(usize),
    GiveBack(usize),
    Trim,
}

fn pool_op() -> impl Strategy<Value = PoolOp> {
    prop_oneof![
        4 => (0usize..250).prop_map(PoolOp::Checkout),
        4 => any::<usize>().prop_map(PoolOp::GiveBack),
        1 => Just(PoolOp::Trim),
    ]
}

fn model_write(model: &mut Vec<u8>, position: usize, bytes: &[u8]) {
    let end = position + bytes.len();
    if model.len() < end {
        model.resize(end, 0);
    }
    model[position..end].copy_from_slice(bytes);
}

proptest! {
    #[test]
    fn prop_single_write_round_trips(payload in proptest::collection::vec(any::<u8>(), 0..2_000)) {
        let manager = StreamManager::new(tiny_config(usize::MAX)).expect("构造管理器");
        let mut stream = manager.get_stream("prop_round_trip");
        stream.write(&payload).expect("写入");
        stream.rewind().expect("回绕");
        let mut out = vec![0u8; payload.len() + 1];
        let read = stream.read(&mut out).expect("读取");
        prop_assert_eq!(read, payload.len());
        prop_assert_eq!(&out[..read], payload.as_slice());
    }

    #[test]
    fn prop_seek_and_write_matches_vec_model(steps in proptest::collection::vec(write_step(), 1..20)) {
        let manager = StreamManager::new(tiny_config(usize::MAX)).expect("构造管理器");
        let mut stream = manager.get_stream("prop_model");
        let mut model = Vec::new();
        let mut position = 0usize;

        for step in &steps {
            if let Some(target) = step.seek_to {
                stream.seek(SeekFrom::Start(target as u64)).expect("定位");
                position = target;
            }
            stream.write(&step.bytes).expect("写入");
            if !step.bytes.is_empty() {
                model_write(&mut model, position, &step.bytes);
                position += step.bytes.len();
            }
        }

        prop_assert_eq!(stream.len().expect("长度"), model.len());
        prop_assert_eq!(stream.to_vec().expect("复制"), model);
    }

    #[test]
    fn prop_pooled_bytes_never_exceed_limit(
        max_pooled_bytes in 0usize..600,
        ops in proptest::collection::vec(pool_op(), 1..80),
    ) {
        let pool = TieredBlockPool::new(&tiny_config(max_pooled_bytes));
        let mut held: Vec<Block> = Vec::new();

        for op in ops {
            match op {
                PoolOp::Checkout(size) => held.push(pool.checkout(size)),
                PoolOp::GiveBack(index) if !held.is_empty() => {
                    let block = held.swap_remove(index % held.len());
                    pool.give_back(block);
                }
                PoolOp::GiveBack(_) => {}
                PoolOp::Trim => {
                    pool.trim();
                }
            }
            prop_assert!(pool.pooled_bytes() <= max_pooled_bytes);

            let tiers = [Tier::Small, Tier::Large(1), Tier::Large(2), Tier::Large(3)];
            let accounted: usize = tiers
                .iter()
                .map(|tier| pool.free_blocks(*tier) * pool.layout().size_of(*tier))
                .sum();
            prop_assert_eq!(accounted, pool.pooled_bytes());
        }
    }
}
