//! 块缓存模块
//!
//! 固定容量、可并发访问的块缓存，位于块设备和上层文件系统之间，对应
//! xv6 `bio.c` 的分桶（bucket）版本。
//!
//! # 主要组件
//!
//! - [`BufferCache`] - 缓存本体：查找/分配（`bget`）、`read`、`write`、
//!   `release`、`pin`/`unpin`
//! - [`BufGuard`] - 已持有的缓存块（持有内容锁），drop 时释放
//! - [`PinnedBuf`] - 只占引用计数、不持有内容锁的缓存块
//! - [`CacheConfig`] - 缓存块数量、bucket 数量、块大小
//! - [`BufFlags`] - 缓存块状态标志
//! - [`CacheStats`] - 缓存统计信息
//!
//! # 设计原理
//!
//! 1. **两级锁**：bucket 锁（`spin::Mutex`）保护成员关系和元数据，只在短
//!    临界区内持有；每个缓存块的内容锁（[`SleepLock`](crate::sync::SleepLock)）
//!    在使用数据期间持有，可以跨越设备 I/O
//! 2. **成员序列**：bucket 中保存缓存块下标，而不是嵌入式 next 指针
//! 3. **RAII 句柄**：`BufGuard` 的 drop 路径保证内容锁只释放一次
//! 4. **锁顺序**：同时持有两把 bucket 锁时按下标从小到大获取
//!
//! # 与 xv6 的对应关系
//!
//! | xv6 C                       | bcache_core                          |
//! |-----------------------------|--------------------------------------|
//! | `struct buf`                | `Slot`（内部） + [`BufGuard`]         |
//! | `bcache.locks[NBUCKET]`     | `BucketTable`（内部）                 |
//! | `put()` / `remove()`        | `BucketList::insert` / `unlink`      |
//! | `binit()`                   | [`BufferCache::new()`]               |
//! | `bget()`                    | [`BufferCache::bget()`]              |
//! | `bread()`                   | [`BufferCache::read()`]              |
//! | `bwrite()`                  | [`BufferCache::write()`]             |
//! | `brelse()`                  | [`BufferCache::release()`]           |
//! | `bpin()` / `bunpin()`       | [`BufferCache::pin()`] / [`BufferCache::unpin()`] |
//! | `debug_bucket()`            | [`BufferCache::bucket_snapshot()`]   |
//!
//! # 使用示例
//!
//! ```rust,ignore
//! use bcache_core::{BufferCache, CacheConfig};
//!
//! let cache = BufferCache::new(CacheConfig::default(), vec![disk])?;
//!
//! // 读取块（未命中时从设备读取）
//! let mut buf = cache.read(0, 100);
//!
//! // 修改并写回
//! buf.data_mut()[0] = 42;
//! cache.write(&buf);
//!
//! // 日志层：保持块常驻，但不占用内容锁
//! let pinned = cache.pin(&buf);
//! cache.release(buf);
//! // ...
//! cache.unpin(pinned);
//! ```

mod block_cache;
mod bucket;
mod buffer;
mod config;
mod handle;

pub use block_cache::{BufferCache, CacheStats, SlotInfo};
pub use buffer::BufFlags;
pub use config::CacheConfig;
pub use handle::{BufGuard, PinnedBuf};
