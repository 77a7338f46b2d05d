//! bcache_core: 分桶并发块缓存
//!
//! 这是一个固定容量、可并发访问的块缓存库，旨在提供：
//! - **每个 (设备, 块号) 最多一份内存副本**
//! - **按块串行化的内容访问**（每个缓存块一把内容锁）
//! - **分桶锁**，避免整个缓存共用一把锁
//! - **零 unsafe 代码**
//!
//! # 示例
//!
//! ```rust,ignore
//! use bcache_core::{BlockDevice, BufferCache, CacheConfig, Result};
//!
//! // 实现 BlockDevice trait
//! struct MyDisk {
//!     // ...
//! }
//!
//! impl BlockDevice for MyDisk {
//!     // 实现必要的方法
//!     // ...
//! }
//!
//! fn main() -> Result<()> {
//!     let cache = BufferCache::new(CacheConfig::default(), vec![MyDisk::new()])?;
//!
//!     let buf = cache.read(0, 1);
//!     let magic = buf.data()[0];
//!     cache.release(buf);
//!
//!     Ok(())
//! }
//! ```
//!
//! # 模块结构
//!
//! - [`error`] - 错误类型定义
//! - [`consts`] - 常量定义
//! - [`block`] - 块设备抽象
//! - [`sync`] - 内容锁与终止原语
//! - [`cache`] - 块缓存

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(unsafe_code)]
#![warn(missing_docs)]

extern crate alloc;

/// 错误处理
pub mod error;

/// 常量定义
pub mod consts;

/// 块设备抽象
pub mod block;

/// 同步原语
pub mod sync;

/// 块缓存
pub mod cache;

// ===== 公共导出 =====

// 错误处理
pub use error::{Error, ErrorKind, Result};

// 块设备
pub use block::{BlockDev, BlockDevice};

// 同步
pub use sync::{fatal, SleepLock, SleepLockGuard};

// Cache
pub use cache::{BufFlags, BufGuard, BufferCache, CacheConfig, CacheStats, PinnedBuf, SlotInfo};
pub use consts::{BSIZE, NBUCKET, NBUF, NO_DEV};
