//! 缓存配置

use crate::consts::{BSIZE, NBUCKET, NBUF};
use crate::error::{Error, ErrorKind, Result};

/// 块缓存配置
///
/// 缓存块数量和 bucket 数量在构造时固定，之后不会再改变。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// 缓存块数量（N）
    pub nbuf: usize,
    /// bucket 数量（M，要求 1 <= M < N）
    pub nbucket: usize,
    /// 块大小（字节）
    pub block_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            nbuf: NBUF,
            nbucket: NBUCKET,
            block_size: BSIZE,
        }
    }
}

impl CacheConfig {
    /// 创建配置
    pub const fn new(nbuf: usize, nbucket: usize, block_size: usize) -> Self {
        Self {
            nbuf,
            nbucket,
            block_size,
        }
    }

    /// 设置缓存块数量
    pub const fn with_nbuf(mut self, nbuf: usize) -> Self {
        self.nbuf = nbuf;
        self
    }

    /// 设置 bucket 数量
    pub const fn with_nbucket(mut self, nbucket: usize) -> Self {
        self.nbucket = nbucket;
        self
    }

    /// 设置块大小
    pub const fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// 校验配置
    ///
    /// 探测序列按 bucket 下标 `(b + i) % M` 前进，只要 M >= 1 就不会
    /// 回到自己的 bucket，所以这里只需要检查数量关系。
    pub fn validate(&self) -> Result<()> {
        if self.nbuf == 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "nbuf must be at least 1"));
        }
        if self.nbucket == 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "nbucket must be at least 1"));
        }
        if self.nbucket >= self.nbuf {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "nbucket must be smaller than nbuf",
            ));
        }
        if self.block_size == 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "block_size must be non-zero"));
        }
        Ok(())
    }
}
