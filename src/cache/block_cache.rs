//! 块缓存实现
//!
//! 对应 xv6 `bio.c` 的分桶版本
//!
//! # 架构
//!
//! ```text
//! struct BufferCache {
//!     slots: [Slot; N],               // 固定的缓存块池
//!     table: [Mutex<BucketList>; M],  // 块号散列到 bucket，每个 bucket 一把锁
//!     devices: [Mutex<BlockDev<D>>],  // 设备号 = 下标
//! }
//! ```
//!
//! 没有保护整个缓存的全局锁。查找和分配（`bget`）分三个阶段：
//!
//! 1. **命中**：在目标 bucket 中找 (dev, blockno)，找到则引用计数加一
//! 2. **本桶复用**：目标 bucket 中有 `refcnt == 0` 的缓存块，直接重新绑定
//! 3. **跨桶窃取**：按 `(b + i) % M` 依次探测其他 bucket，找到空闲缓存块后
//!    从原 bucket 摘下，重新绑定，插入目标 bucket 表头
//!
//! 三个阶段都找不到空闲缓存块时返回 `NoSpace`；`read` 把它当作致命错误。
//!
//! # 回收顺序
//!
//! 回收的是探测顺序上第一个空闲的缓存块，不是最久未使用的块。`release`
//! 不移动缓存块的位置，"可以被回收"只意味着引用计数降到 0。
//!
//! # 锁顺序
//!
//! - bucket 锁只在查找/分配/计数修改期间持有，不跨越内容锁获取和设备 I/O
//! - 同时持有两把 bucket 锁时，总是先锁下标较小的那把（见 `BucketTable::lock_pair`）
//! - 第 3 阶段先放开目标 bucket 的锁，再和被探测的 bucket 按顺序一起加锁；
//!   重新加锁后会再次检查命中和本桶空闲块，所以同一个块不会被绑定两次
//! - 内容锁 -> 设备锁，从不反过来
//! - 设备锁只在一次传输期间持有；查找路径（包括越界检查）不获取设备锁

use super::bucket::{BucketList, BucketTable};
use super::buffer::{BufFlags, Slot};
use super::config::CacheConfig;
use super::handle::{BufGuard, PinnedBuf};
use crate::block::{BlockDev, BlockDevice};
use crate::error::{Error, ErrorKind, Result};
use crate::sync::fatal;
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

/// 缓存统计信息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// 总访问次数
    pub total_accesses: u64,
    /// 缓存命中次数
    pub hits: u64,
    /// 缓存未命中次数（重新绑定了一个缓存块）
    pub misses: u64,
    /// 没有空闲缓存块而失败的次数
    ///
    /// `total_accesses == hits + misses + exhausted`
    pub exhausted: u64,
    /// 跨 bucket 窃取次数（包含在 misses 中）
    pub steals: u64,
    /// 设备读取次数
    pub device_reads: u64,
    /// 设备写入次数
    pub device_writes: u64,
}

impl CacheStats {
    /// 计算命中率
    pub fn hit_rate(&self) -> f64 {
        if self.total_accesses == 0 {
            0.0
        } else {
            self.hits as f64 / self.total_accesses as f64
        }
    }
}

#[derive(Default)]
struct StatCounters {
    total_accesses: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    exhausted: AtomicU64,
    steals: AtomicU64,
    device_reads: AtomicU64,
    device_writes: AtomicU64,
}

impl StatCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            total_accesses: self.total_accesses.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            steals: self.steals.load(Ordering::Relaxed),
            device_reads: self.device_reads.load(Ordering::Relaxed),
            device_writes: self.device_writes.load(Ordering::Relaxed),
        }
    }
}

/// bucket 中一个成员的快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotInfo {
    /// 设备号
    pub device: u32,
    /// 块号
    pub blockno: u32,
    /// 引用计数
    pub refcount: u32,
    /// 内容是否有效
    pub valid: bool,
}

/// 分桶块缓存
///
/// 固定容量，可以被多个线程同时访问（`&self` 接口）。对同一个
/// (device, blockno)，任何时刻最多只有一个引用计数大于 0 的缓存块。
///
/// # 使用约定
///
/// - 每次成功的 `read` 对应恰好一次 `release`（或 drop）
/// - 只在仍然持有缓存块时调用 `write`
/// - `release` 之后不再访问内容
///
/// # 示例
///
/// ```rust,ignore
/// use bcache_core::{BufferCache, CacheConfig};
///
/// let cache = BufferCache::new(CacheConfig::default(), vec![disk])?;
///
/// let mut buf = cache.read(0, 7);
/// buf.data_mut()[0] = 1;
/// cache.write(&buf);
/// cache.release(buf);
/// ```
pub struct BufferCache<D: BlockDevice> {
    config: CacheConfig,
    slots: Box<[Slot]>,
    table: BucketTable,
    devices: Box<[Mutex<BlockDev<D>>]>,
    /// 每个设备的总块数，构造时记录，越界检查不需要设备锁
    device_blocks: Box<[u64]>,
    stats: StatCounters,
}

impl<D: BlockDevice> BufferCache<D> {
    /// 创建块缓存
    ///
    /// 设备号就是设备在 `devices` 中的下标。配置和每个设备的块大小在这里
    /// 一次性校验，之后缓存块数量和 bucket 数量不再改变。
    ///
    /// 所有缓存块初始为未绑定状态，全部挂在 0 号 bucket 上。
    pub fn new(config: CacheConfig, devices: Vec<D>) -> Result<Self> {
        config.validate()?;

        let mut attached = Vec::with_capacity(devices.len());
        let mut device_blocks = Vec::with_capacity(devices.len());
        for device in devices {
            let bd = BlockDev::new(device)?;
            if bd.block_size() as usize != config.block_size {
                return Err(Error::new(
                    ErrorKind::InvalidInput,
                    "Device block size does not match cache block size",
                ));
            }
            device_blocks.push(bd.total_blocks());
            attached.push(Mutex::new(bd));
        }

        let slots: Vec<Slot> = (0..config.nbuf).map(|_| Slot::new(config.block_size)).collect();
        let table = BucketTable::new(config.nbucket);
        {
            let mut first = table.lock(0);
            for index in 0..slots.len() {
                first.insert(index);
            }
        }

        log::debug!(
            "[BCACHE] init nbuf={} nbucket={} block_size={} devices={}",
            config.nbuf,
            config.nbucket,
            config.block_size,
            attached.len()
        );

        Ok(Self {
            config,
            slots: slots.into_boxed_slice(),
            table,
            devices: attached.into_boxed_slice(),
            device_blocks: device_blocks.into_boxed_slice(),
            stats: StatCounters::default(),
        })
    }

    pub(super) fn slot(&self, index: usize) -> &Slot {
        &self.slots[index]
    }

    /// 在缓存块所在 bucket 的锁下读取引用计数
    pub(super) fn slot_refcount(&self, index: usize) -> u32 {
        let slot = &self.slots[index];
        let _bucket = self.table.lock(self.table.hash(slot.blockno()));
        slot.refcnt()
    }

    fn find_cached(&self, list: &BucketList, dev: u32, blockno: u32) -> Option<usize> {
        list.iter().find(|&i| self.slots[i].matches(dev, blockno))
    }

    fn find_free(&self, list: &BucketList) -> Option<usize> {
        list.iter().find(|&i| self.slots[i].is_free())
    }

    /// 把空闲缓存块重新绑定到 (dev, blockno)，调用者持有它所在 bucket 的锁
    fn recycle(&self, index: usize, dev: u32, blockno: u32) {
        let slot = &self.slots[index];
        if slot.flags().contains(BufFlags::DIRTY) {
            log::warn!(
                "[BCACHE] recycling modified buffer dev={} blockno={} without write-back",
                slot.dev(),
                slot.blockno()
            );
        }
        slot.rebind(dev, blockno);
        StatCounters::bump(&self.stats.misses);
    }

    fn hit(&self, index: usize, dev: u32, blockno: u32) -> usize {
        self.slots[index].get();
        StatCounters::bump(&self.stats.hits);
        log::trace!(
            "[BCACHE] hit dev={} blockno={} refcnt={}",
            dev,
            blockno,
            self.slots[index].refcnt()
        );
        index
    }

    /// 查找或分配缓存块，返回下标；引用计数已经加一，内容锁尚未获取
    fn claim(&self, dev: u32, blockno: u32) -> Result<usize> {
        StatCounters::bump(&self.stats.total_accesses);
        let home = self.table.hash(blockno);

        {
            let list = self.table.lock(home);

            if let Some(index) = self.find_cached(&list, dev, blockno) {
                return Ok(self.hit(index, dev, blockno));
            }

            if let Some(index) = self.find_free(&list) {
                self.recycle(index, dev, blockno);
                log::debug!(
                    "[BCACHE] miss dev={} blockno={} reuse slot {} in bucket {}",
                    dev,
                    blockno,
                    index,
                    home
                );
                return Ok(index);
            }
        }

        let nbucket = self.table.len();
        for step in 1..nbucket {
            let probe = (home + step) % nbucket;
            let (mut home_list, mut probe_list) = self.table.lock_pair(home, probe);

            // 目标 bucket 的锁刚刚放开过，其他线程可能已经绑定了同一块或释放了缓存块
            if let Some(index) = self.find_cached(&home_list, dev, blockno) {
                return Ok(self.hit(index, dev, blockno));
            }
            if let Some(index) = self.find_free(&home_list) {
                self.recycle(index, dev, blockno);
                return Ok(index);
            }

            if let Some(index) = self.find_free(&probe_list) {
                debug_assert_eq!(self.table.hash(self.slots[index].blockno()), probe);
                probe_list.unlink(index);
                self.recycle(index, dev, blockno);
                home_list.insert(index);
                StatCounters::bump(&self.stats.steals);
                log::debug!(
                    "[BCACHE] miss dev={} blockno={} steal slot {} from bucket {} into bucket {}",
                    dev,
                    blockno,
                    index,
                    probe,
                    home
                );
                return Ok(index);
            }
        }

        StatCounters::bump(&self.stats.exhausted);
        log::debug!(
            "[BCACHE] no free buffer for dev={} blockno={}: all {} buffers referenced",
            dev,
            blockno,
            self.slots.len()
        );
        Err(Error::new(ErrorKind::NoSpace, "no free buffers"))
    }

    /// 查找或分配缓存块并获取内容锁
    ///
    /// 返回时缓存块独占地绑定到 (dev, blockno)，引用计数已加一，内容锁
    /// 由调用者持有。bucket 锁在等待内容锁之前已经释放。内容不保证有效，
    /// 需要数据时用 [`read`](Self::read)。
    pub fn bget(&self, dev: u32, blockno: u32) -> Result<BufGuard<'_, D>> {
        self.check_block(dev, blockno)?;
        let index = self.claim(dev, blockno)?;
        let content = self.slots[index].content.lock();
        Ok(BufGuard::new(self, index, content))
    }

    /// 设备号和块号的越界检查，不获取设备锁
    fn check_block(&self, dev: u32, blockno: u32) -> Result<()> {
        let total = self
            .device_blocks
            .get(dev as usize)
            .ok_or(Error::new(ErrorKind::InvalidInput, "Invalid device number"))?;
        if blockno as u64 >= *total {
            return Err(Error::new(ErrorKind::InvalidInput, "Block number out of range"));
        }
        Ok(())
    }

    /// 返回持有的、内容有效的缓存块
    ///
    /// 缓存未命中（内容无效）时同步地从设备读取。
    pub fn try_read(&self, dev: u32, blockno: u32) -> Result<BufGuard<'_, D>> {
        let mut buf = self.bget(dev, blockno)?;
        if !buf.is_valid() {
            // 出错时 buf 被 drop，引用自动归还
            self.devices[dev as usize]
                .lock()
                .read_block(blockno, buf.content_mut())?;
            StatCounters::bump(&self.stats.device_reads);
            self.slots[buf.index()].insert_flags(BufFlags::VALID);
        }
        Ok(buf)
    }

    /// 返回持有的、内容有效的缓存块
    ///
    /// 对应 xv6 的 `bread`。没有空闲缓存块或设备出错时终止。
    pub fn read(&self, dev: u32, blockno: u32) -> BufGuard<'_, D> {
        self.try_read(dev, blockno)
            .unwrap_or_else(|err| fatal("bread", &err))
    }

    fn check_held(&self, buf: &BufGuard<'_, D>) -> Result<()> {
        if !core::ptr::eq(buf.cache(), self) {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "buffer belongs to another cache",
            ));
        }
        // BufGuard 在 drop 之前一直拥有内容锁守卫，所以只要它还活着，
        // 持有内容锁这个前提就由所有权保证
        debug_assert!(self.slots[buf.index()].content.holding(buf.ticket()));
        Ok(())
    }

    /// 把持有的缓存块写回设备，出错时返回错误
    ///
    /// 不改变 `valid` 和引用计数；成功后清除脏标志。
    pub fn try_write(&self, buf: &BufGuard<'_, D>) -> Result<()> {
        self.check_held(buf)?;

        let (dev, blockno) = (buf.device(), buf.blockno());
        self.devices[dev as usize]
            .lock()
            .write_block(blockno, buf.data())?;
        StatCounters::bump(&self.stats.device_writes);
        self.slots[buf.index()].remove_flags(BufFlags::DIRTY);
        Ok(())
    }

    /// 把持有的缓存块写回设备
    ///
    /// 对应 xv6 的 `bwrite`。缓存块属于其他缓存或设备出错时终止。
    pub fn write(&self, buf: &BufGuard<'_, D>) {
        self.try_write(buf)
            .unwrap_or_else(|err| fatal("bwrite", &err))
    }

    /// 释放持有的缓存块
    ///
    /// 对应 xv6 的 `brelse`。先释放内容锁，再在 bucket 锁下减少引用计数。
    /// 缓存块留在原来的 bucket 中。
    pub fn release(&self, buf: BufGuard<'_, D>) {
        if let Err(err) = self.check_held(&buf) {
            fatal("brelse", &err);
        }
        drop(buf);
    }

    /// 引用计数减一（释放和 unpin 共用）
    pub(super) fn put(&self, index: usize, op: &str) {
        let slot = &self.slots[index];
        let bucket = self.table.lock(self.table.hash(slot.blockno()));
        match slot.put() {
            Some(refcnt) => log::trace!(
                "[BCACHE] {} dev={} blockno={} refcnt={}",
                op,
                slot.dev(),
                slot.blockno(),
                refcnt
            ),
            None => {
                drop(bucket);
                fatal(op, &Error::new(ErrorKind::InvalidState, "refcount underflow"));
            }
        }
    }

    /// 增加一个不持有内容锁的引用
    ///
    /// 对应 xv6 的 `bpin`。被 pin 住的块在 unpin 之前不会被回收。
    pub fn pin<'a>(&'a self, buf: &BufGuard<'a, D>) -> PinnedBuf<'a, D> {
        if !core::ptr::eq(buf.cache(), self) {
            fatal(
                "bpin",
                &Error::new(ErrorKind::InvalidInput, "buffer belongs to another cache"),
            );
        }
        let slot = &self.slots[buf.index()];
        let _bucket = self.table.lock(self.table.hash(slot.blockno()));
        slot.get();
        log::trace!(
            "[BCACHE] bpin dev={} blockno={} refcnt={}",
            slot.dev(),
            slot.blockno(),
            slot.refcnt()
        );
        PinnedBuf::new(self, buf.index())
    }

    /// 释放 pin
    ///
    /// 对应 xv6 的 `bunpin`。
    pub fn unpin(&self, pinned: PinnedBuf<'_, D>) {
        if !core::ptr::eq(pinned.cache(), self) {
            fatal(
                "bunpin",
                &Error::new(ErrorKind::InvalidInput, "buffer belongs to another cache"),
            );
        }
        drop(pinned);
    }

    /// 查看已缓存块的引用计数
    ///
    /// 块不在缓存中时返回 `None`。
    pub fn refcount(&self, dev: u32, blockno: u32) -> Option<u32> {
        let list = self.table.lock(self.table.hash(blockno));
        self.find_cached(&list, dev, blockno)
            .map(|i| self.slots[i].refcnt())
    }

    /// 按表头到表尾的顺序列出一个 bucket 的成员
    ///
    /// 调试用，同时以 trace 级别输出。
    pub fn bucket_snapshot(&self, bucket: usize) -> Vec<SlotInfo> {
        let list = self.table.lock(bucket);
        let members: Vec<SlotInfo> = list
            .iter()
            .map(|i| {
                let slot = &self.slots[i];
                SlotInfo {
                    device: slot.dev(),
                    blockno: slot.blockno(),
                    refcount: slot.refcnt(),
                    valid: slot.flags().contains(BufFlags::VALID),
                }
            })
            .collect();
        drop(list);

        for info in &members {
            log::trace!(
                "[BCACHE] bucket {} dev={} blockno={} refcnt={}",
                bucket,
                info.device,
                info.blockno,
                info.refcount
            );
        }
        log::trace!("[BCACHE] bucket {} cnt={}", bucket, members.len());
        members
    }

    /// 获取缓存统计信息
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    /// 配置
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// 缓存块数量
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// bucket 数量
    pub fn bucket_count(&self) -> usize {
        self.table.len()
    }

    /// 块大小
    pub fn block_size(&self) -> usize {
        self.config.block_size
    }

    /// 挂载的设备数量
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// 对设备执行操作（在设备锁下）
    ///
    /// 用于刷新设备、读取物理读写计数等。
    pub fn with_device<R>(&self, dev: u32, f: impl FnOnce(&mut BlockDev<D>) -> R) -> Result<R> {
        let device = self
            .devices
            .get(dev as usize)
            .ok_or(Error::new(ErrorKind::InvalidInput, "Invalid device number"))?;
        Ok(f(&mut device.lock()))
    }
}

impl<D: BlockDevice> core::fmt::Debug for BufferCache<D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BufferCache")
            .field("config", &self.config)
            .field("devices", &self.devices.len())
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}
