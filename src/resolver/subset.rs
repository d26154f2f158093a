//! 确定性子集划分
//!
//! 实例数超过 `size` 时，按 ID 排序后用 `select_key` 的哈希作为种子洗牌，
//! 取一个长度为 `size` 的窗口。同一个 key 对同一组实例总是得到相同的子集，
//! 不同客户端（不同 key）的子集分布在整个实例集合上。

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// 从 `items` 中确定性地选出至多 `size` 个元素
pub fn subset<T, F>(select_key: &str, mut items: Vec<T>, size: usize, id: F) -> Vec<T>
where
    F: Fn(&T) -> &str,
{
    if size == 0 || items.len() <= size {
        return items;
    }

    items.sort_by(|a, b| id(a).cmp(id(b)));

    let mut hasher = DefaultHasher::new();
    select_key.hash(&mut hasher);
    let seed = hasher.finish();

    let count = items.len();
    let round = (seed as usize) % count.div_ceil(size);

    let mut rng = StdRng::seed_from_u64(seed);
    items.shuffle(&mut rng);

    let start = (round * size) % count;
    items.rotate_left(start);
    items.truncate(size);
    items
}
