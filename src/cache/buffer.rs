//! 缓存块结构
//!
//! 对应 xv6 的 `struct buf`

use crate::consts::NO_DEV;
use crate::sync::SleepLock;
use alloc::boxed::Box;
use bitflags::bitflags;
use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

bitflags! {
    /// 缓存块标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BufFlags: u8 {
        /// 内容与设备上的数据一致（有效）
        const VALID = 0x01;
        /// 内容被修改过，尚未写回
        const DIRTY = 0x02;
    }
}

/// 缓存块
///
/// 在 xv6 的 C 实现中，`buf` 通过嵌入的 `next` 指针挂在 bucket 链表上。
/// 这里缓存块只保存自身状态，bucket 成员关系由 bucket 中的下标序列表示。
///
/// # 字段说明
///
/// - `dev` / `blockno`: 缓存的块的身份，只在 `refcnt > 0` 或仍挂在
///   bucket 中（作为过期缓存项）时有意义
/// - `refcnt`: 当前持有者数量（包括 pin）
/// - `flags`: `VALID` / `DIRTY`
/// - `content`: 块数据，由内容锁保护
///
/// 身份字段和引用计数只在持有所在 bucket 的锁时修改；原子类型只是为了
/// 不用 `unsafe` 就能共享，真正的顺序由 bucket 锁保证，因此统一使用
/// `Relaxed`。`VALID` 在持有内容锁时置位，在 `refcnt == 0` 时（持有
/// bucket 锁）清除。
pub(crate) struct Slot {
    dev: AtomicU32,
    blockno: AtomicU32,
    refcnt: AtomicU32,
    flags: AtomicU8,
    pub(crate) content: SleepLock<Box<[u8]>>,
}

impl Slot {
    /// 创建未绑定的缓存块
    pub(crate) fn new(block_size: usize) -> Self {
        Self {
            dev: AtomicU32::new(NO_DEV),
            blockno: AtomicU32::new(0),
            refcnt: AtomicU32::new(0),
            flags: AtomicU8::new(BufFlags::empty().bits()),
            content: SleepLock::new("buffer", alloc::vec![0u8; block_size].into_boxed_slice()),
        }
    }

    pub(crate) fn dev(&self) -> u32 {
        self.dev.load(Ordering::Relaxed)
    }

    pub(crate) fn blockno(&self) -> u32 {
        self.blockno.load(Ordering::Relaxed)
    }

    /// 是否缓存着 (dev, blockno)
    pub(crate) fn matches(&self, dev: u32, blockno: u32) -> bool {
        self.dev() == dev && self.blockno() == blockno
    }

    /// 重新绑定身份，清空标志，引用计数置为 1
    ///
    /// 调用者必须持有缓存块所在 bucket 的锁，且 `refcnt == 0`。
    pub(crate) fn rebind(&self, dev: u32, blockno: u32) {
        debug_assert_eq!(self.refcnt(), 0);
        self.dev.store(dev, Ordering::Relaxed);
        self.blockno.store(blockno, Ordering::Relaxed);
        self.flags.store(BufFlags::empty().bits(), Ordering::Relaxed);
        self.refcnt.store(1, Ordering::Relaxed);
    }

    pub(crate) fn refcnt(&self) -> u32 {
        self.refcnt.load(Ordering::Relaxed)
    }

    pub(crate) fn is_free(&self) -> bool {
        self.refcnt() == 0
    }

    /// 增加引用计数（持有 bucket 锁）
    pub(crate) fn get(&self) {
        self.refcnt.fetch_add(1, Ordering::Relaxed);
    }

    /// 减少引用计数（持有 bucket 锁），返回减少后的值
    ///
    /// 计数已经为 0 时返回 `None`，不做修改。
    pub(crate) fn put(&self) -> Option<u32> {
        let old = self.refcnt();
        if old == 0 {
            return None;
        }
        self.refcnt.store(old - 1, Ordering::Relaxed);
        Some(old - 1)
    }

    pub(crate) fn flags(&self) -> BufFlags {
        BufFlags::from_bits_truncate(self.flags.load(Ordering::Relaxed))
    }

    pub(crate) fn insert_flags(&self, flags: BufFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::Relaxed);
    }

    pub(crate) fn remove_flags(&self, flags: BufFlags) {
        self.flags.fetch_and(!flags.bits(), Ordering::Relaxed);
    }
}

impl core::fmt::Debug for Slot {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Slot")
            .field("dev", &self.dev())
            .field("blockno", &self.blockno())
            .field("refcnt", &self.refcnt())
            .field("flags", &self.flags())
            .field("locked", &self.content.is_locked())
            .finish()
    }
}
