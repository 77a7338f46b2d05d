//! 缓存块句柄 - RAII 风格的块访问
//!
//! 对应 xv6 `bread` 返回的已加锁 `buf`，以及 `bpin` 产生的引用。

use super::block_cache::BufferCache;
use super::buffer::{BufFlags, Slot};
use crate::block::BlockDevice;
use crate::error::Result;
use crate::sync::SleepLockGuard;
use alloc::boxed::Box;

/// 已持有的缓存块
///
/// 由 [`BufferCache::read`] / [`BufferCache::try_read`] 返回，持有期间
/// 独占该缓存块的内容锁，引用计数中也记着这一份。
///
/// - 获取时块已经绑定到 (device, blockno)，内容有效
/// - 通过 `data_mut()` 修改时标记为脏
/// - 丢弃时先释放内容锁，再在 bucket 锁下减少引用计数，保证只释放一次
///
/// # 示例
///
/// ```rust,ignore
/// let mut buf = cache.read(1, 42);
/// buf.data_mut()[0] = 0x42;
/// cache.write(&buf);
/// cache.release(buf);
/// ```
pub struct BufGuard<'a, D: BlockDevice> {
    cache: &'a BufferCache<D>,
    index: usize,
    /// 内容锁守卫；只在 drop 时取走
    content: Option<SleepLockGuard<'a, Box<[u8]>>>,
}

impl<'a, D: BlockDevice> BufGuard<'a, D> {
    pub(super) fn new(
        cache: &'a BufferCache<D>,
        index: usize,
        content: SleepLockGuard<'a, Box<[u8]>>,
    ) -> Self {
        Self {
            cache,
            index,
            content: Some(content),
        }
    }

    fn slot(&self) -> &'a Slot {
        self.cache.slot(self.index)
    }

    pub(super) fn cache(&self) -> &'a BufferCache<D> {
        self.cache
    }

    pub(super) fn index(&self) -> usize {
        self.index
    }

    /// 本次持有内容锁的 ticket
    ///
    /// 守卫在 drop 之前一直存在，所以活着的 `BufGuard` 总是持有内容锁；
    /// 这里只在调试断言和测试中用来确认这一点。
    pub(super) fn ticket(&self) -> usize {
        self.content.as_ref().map_or(0, |c| c.ticket())
    }

    /// 设备号
    pub fn device(&self) -> u32 {
        self.slot().dev()
    }

    /// 块号
    pub fn blockno(&self) -> u32 {
        self.slot().blockno()
    }

    /// 内容是否与设备一致
    pub fn is_valid(&self) -> bool {
        self.slot().flags().contains(BufFlags::VALID)
    }

    /// 内容是否被修改且尚未写回
    pub fn is_dirty(&self) -> bool {
        self.slot().flags().contains(BufFlags::DIRTY)
    }

    /// 当前引用计数
    pub fn refcount(&self) -> u32 {
        self.cache.slot_refcount(self.index)
    }

    /// 只读访问块数据
    pub fn data(&self) -> &[u8] {
        self.content.as_deref().map_or(Default::default(), |c| &c[..])
    }

    /// 可写访问块数据，标记为脏
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.slot().insert_flags(BufFlags::DIRTY);
        self.content_mut()
    }

    /// 不改变标志的可写访问（设备读取填充内容时使用）
    pub(super) fn content_mut(&mut self) -> &mut [u8] {
        self.content.as_deref_mut().map_or(Default::default(), |c| &mut c[..])
    }

    /// 写回设备
    ///
    /// 等价于 `cache.write(&self)`。
    pub fn write(&self) {
        self.cache.write(self)
    }

    /// 写回设备，出错时返回错误
    pub fn try_write(&self) -> Result<()> {
        self.cache.try_write(self)
    }

    /// 增加一个不持有内容锁的引用，防止块被回收
    pub fn pin(&self) -> PinnedBuf<'a, D> {
        self.cache.pin(self)
    }

    /// 释放（消费 self）
    ///
    /// 等价于 `cache.release(self)`，也可以直接 drop。
    pub fn release(self) {
        let cache = self.cache;
        cache.release(self)
    }
}

impl<D: BlockDevice> Drop for BufGuard<'_, D> {
    fn drop(&mut self) {
        if let Some(content) = self.content.take() {
            drop(content);
            self.cache.put(self.index, "brelse");
        }
    }
}

impl<D: BlockDevice> core::fmt::Debug for BufGuard<'_, D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BufGuard")
            .field("index", &self.index)
            .field("slot", self.slot())
            .field("ticket", &self.ticket())
            .finish()
    }
}

/// 被 pin 住的缓存块
///
/// 只占一份引用计数，不持有内容锁。只要它还活着，缓存块就不会被回收，
/// 再次 `read` 同一块一定命中。丢弃时自动 unpin。
pub struct PinnedBuf<'a, D: BlockDevice> {
    cache: &'a BufferCache<D>,
    index: usize,
    active: bool,
}

impl<'a, D: BlockDevice> PinnedBuf<'a, D> {
    pub(super) fn new(cache: &'a BufferCache<D>, index: usize) -> Self {
        Self {
            cache,
            index,
            active: true,
        }
    }

    pub(super) fn cache(&self) -> &'a BufferCache<D> {
        self.cache
    }

    /// 设备号
    pub fn device(&self) -> u32 {
        self.cache.slot(self.index).dev()
    }

    /// 块号
    pub fn blockno(&self) -> u32 {
        self.cache.slot(self.index).blockno()
    }

    /// 当前引用计数
    pub fn refcount(&self) -> u32 {
        self.cache.slot_refcount(self.index)
    }

    /// 重新获取内容锁
    ///
    /// pin 住的块不会被回收，所以一定命中同一个缓存块。
    pub fn lock(&self) -> BufGuard<'a, D> {
        self.cache.read(self.device(), self.blockno())
    }

    /// 释放 pin（消费 self）
    pub fn unpin(self) {
        let cache = self.cache;
        cache.unpin(self)
    }
}

impl<D: BlockDevice> Drop for PinnedBuf<'_, D> {
    fn drop(&mut self) {
        if core::mem::replace(&mut self.active, false) {
            self.cache.put(self.index, "bunpin");
        }
    }
}

impl<D: BlockDevice> core::fmt::Debug for PinnedBuf<'_, D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PinnedBuf")
            .field("index", &self.index)
            .field("slot", self.cache.slot(self.index))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MockDevice;
    use crate::cache::CacheConfig;

    fn cache() -> BufferCache<MockDevice> {
        BufferCache::new(
            CacheConfig::new(4, 2, 1024),
            alloc::vec![MockDevice::with_pattern(16, 1024)],
        )
        .unwrap()
    }

    #[test]
    fn test_data_mut_marks_dirty() {
        let cache = cache();
        let mut buf = cache.read(0, 3);
        assert!(!buf.is_dirty());

        // 只读访问不改变标志
        assert_eq!(buf.data()[0], 3);
        assert!(!buf.is_dirty());

        buf.data_mut()[0] = 0xFF;
        assert!(buf.is_dirty());
        assert_eq!(buf.data()[0], 0xFF);

        buf.write();
        assert!(!buf.is_dirty());
    }

    #[test]
    fn test_guard_holds_content_lock_until_drop() {
        let cache = cache();
        let buf = cache.read(0, 4);
        let (index, ticket) = (buf.index(), buf.ticket());
        assert!(cache.slot(index).content.holding(ticket));

        drop(buf);
        assert!(!cache.slot(index).content.holding(ticket));
        assert!(!cache.slot(index).content.is_locked());

        // 再次持有得到新的 ticket
        let buf = cache.read(0, 4);
        assert_eq!(buf.index(), index);
        assert_ne!(buf.ticket(), ticket);
        assert!(cache.slot(index).content.holding(buf.ticket()));
    }

    #[test]
    fn test_release_returns_reference_once() {
        let cache = cache();
        let buf = cache.read(0, 5);
        assert_eq!(buf.refcount(), 1);
        buf.release();
        assert_eq!(cache.refcount(0, 5), Some(0));

        let buf = cache.read(0, 5);
        drop(buf);
        assert_eq!(cache.refcount(0, 5), Some(0));
    }

    #[test]
    fn test_pinned_lock_reacquires_same_block() {
        let cache = cache();
        let buf = cache.read(0, 8);
        let pinned = buf.pin();
        drop(buf);

        let again = pinned.lock();
        assert_eq!((again.device(), again.blockno()), (0, 8));
        assert_eq!(again.refcount(), 2);
        drop(again);

        pinned.unpin();
        assert_eq!(cache.refcount(0, 8), Some(0));
        assert_eq!(cache.stats().device_reads, 1);
    }

    #[test]
    fn test_debug_output() {
        let cache = cache();
        let buf = cache.read(0, 1);
        let text = alloc::format!("{:?}", buf);
        assert!(text.contains("BufGuard"));
        assert!(text.contains("blockno: 1"));

        let pinned = buf.pin();
        assert!(alloc::format!("{:?}", pinned).contains("PinnedBuf"));
    }
}
