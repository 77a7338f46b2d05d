//! Bucket 表
//!
//! 缓存块按块号散列到固定数量的 bucket 中，每个 bucket 一把自旋锁，
//! 保护自己的成员序列，以及成员缓存块的身份字段和引用计数。
//!
//! 每个缓存块在任何时刻都恰好属于一个 bucket。成员关系只在缓存块被
//! 回收给散列到其他 bucket 的块号时改变。

use crate::error::{Error, ErrorKind};
use crate::sync::fatal;
use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use spin::{Mutex, MutexGuard};

/// 一个 bucket 的成员序列（缓存块下标，表头在前）
#[derive(Debug, Default)]
pub(crate) struct BucketList {
    members: VecDeque<usize>,
}

impl BucketList {
    /// 插入到表头
    pub(crate) fn insert(&mut self, slot: usize) {
        self.members.push_front(slot);
    }

    /// 按身份移除
    ///
    /// 调用者已经确认 `slot` 是本 bucket 的成员；找不到说明成员关系被破坏，
    /// 直接终止。
    pub(crate) fn unlink(&mut self, slot: usize) {
        match self.members.iter().position(|&s| s == slot) {
            Some(pos) => {
                self.members.remove(pos);
            }
            None => fatal(
                "unlink",
                &Error::new(ErrorKind::InvalidState, "slot is not a member of its bucket"),
            ),
        }
    }

    /// 按表头到表尾的顺序遍历
    pub(crate) fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.members.iter().copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.members.len()
    }
}

pub(crate) type BucketGuard<'a> = MutexGuard<'a, BucketList>;

/// Bucket 表
pub(crate) struct BucketTable {
    buckets: Box<[Mutex<BucketList>]>,
}

impl BucketTable {
    pub(crate) fn new(nbucket: usize) -> Self {
        let buckets: Vec<Mutex<BucketList>> =
            (0..nbucket).map(|_| Mutex::new(BucketList::default())).collect();
        Self {
            buckets: buckets.into_boxed_slice(),
        }
    }

    /// bucket 数量
    pub(crate) fn len(&self) -> usize {
        self.buckets.len()
    }

    /// 块号 -> bucket 下标
    ///
    /// 只取决于块号，不同设备上块号相同的块落在同一个 bucket。
    pub(crate) fn hash(&self, blockno: u32) -> usize {
        blockno as usize % self.buckets.len()
    }

    pub(crate) fn lock(&self, index: usize) -> BucketGuard<'_> {
        self.buckets[index].lock()
    }

    /// 同时锁住两个不同的 bucket，返回 `(home, probe)` 的守卫
    ///
    /// 总是先锁下标较小的 bucket，所有同时持有两把 bucket 锁的路径都经过
    /// 这里，所以不会出现循环等待。
    pub(crate) fn lock_pair(&self, home: usize, probe: usize) -> (BucketGuard<'_>, BucketGuard<'_>) {
        debug_assert_ne!(home, probe);
        if home < probe {
            let h = self.lock(home);
            let p = self.lock(probe);
            (h, p)
        } else {
            let p = self.lock(probe);
            let h = self.lock(home);
            (h, p)
        }
    }
}
