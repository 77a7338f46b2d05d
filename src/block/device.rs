//! 块设备核心类型

use crate::error::{Error, ErrorKind, Result};

/// 块设备接口
///
/// 实现此 trait 以提供底层块设备访问。缓存只在持有缓存块内容锁时调用它，
/// 调用是同步的：返回时数据传输已经完成。
///
/// # 示例
///
/// ```rust,ignore
/// use bcache_core::{BlockDevice, Result};
///
/// struct MyDisk {
///     // ...
/// }
///
/// impl BlockDevice for MyDisk {
///     fn block_size(&self) -> u32 {
///         1024
///     }
///
///     fn sector_size(&self) -> u32 {
///         512
///     }
///
///     fn total_blocks(&self) -> u64 {
///         2000
///     }
///
///     fn read_blocks(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<usize> {
///         // 实现扇区读取
///         Ok(count as usize * self.sector_size() as usize)
///     }
///
///     fn write_blocks(&mut self, lba: u64, count: u32, buf: &[u8]) -> Result<usize> {
///         // 实现扇区写入
///         Ok(count as usize * self.sector_size() as usize)
///     }
/// }
/// ```
pub trait BlockDevice: Send {
    /// 逻辑块大小（必须与缓存块大小一致）
    fn block_size(&self) -> u32;

    /// 物理扇区大小（通常 512）
    fn sector_size(&self) -> u32;

    /// 总块数
    fn total_blocks(&self) -> u64;

    /// 读取扇区
    ///
    /// # 参数
    ///
    /// * `lba` - 起始扇区地址
    /// * `count` - 要读取的扇区数
    /// * `buf` - 目标缓冲区（大小至少为 count * sector_size）
    ///
    /// # 返回
    ///
    /// 成功返回实际读取的字节数
    fn read_blocks(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<usize>;

    /// 写入扇区
    ///
    /// # 参数
    ///
    /// * `lba` - 起始扇区地址
    /// * `count` - 要写入的扇区数
    /// * `buf` - 源缓冲区（大小至少为 count * sector_size）
    ///
    /// # 返回
    ///
    /// 成功返回实际写入的字节数
    fn write_blocks(&mut self, lba: u64, count: u32, buf: &[u8]) -> Result<usize>;

    /// 刷新设备缓存
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// 是否只读
    fn is_read_only(&self) -> bool {
        false
    }
}

/// 块设备包装器
///
/// 把缓存使用的块号转换为设备扇区地址，并统计物理读写次数。
/// 缓存为每个设备号持有一个 `BlockDev`，放在各自的短锁后面。
pub struct BlockDev<D> {
    /// 底层设备
    device: D,
    /// 物理读取次数
    physical_read_count: u64,
    /// 物理写入次数
    physical_write_count: u64,
}

impl<D: BlockDevice> BlockDev<D> {
    /// 创建新的块设备包装器
    ///
    /// 块大小必须是扇区大小的非零整数倍。
    pub fn new(device: D) -> Result<Self> {
        let block_size = device.block_size();
        let sector_size = device.sector_size();

        if sector_size == 0 || block_size == 0 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Block size and sector size must be non-zero",
            ));
        }

        if block_size % sector_size != 0 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Block size must be a multiple of sector size",
            ));
        }

        Ok(Self {
            device,
            physical_read_count: 0,
            physical_write_count: 0,
        })
    }

    /// 获取底层设备的引用
    pub fn device(&self) -> &D {
        &self.device
    }

    /// 获取底层设备的可变引用
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// 获取逻辑块大小
    pub fn block_size(&self) -> u32 {
        self.device.block_size()
    }

    /// 获取物理扇区大小
    pub fn sector_size(&self) -> u32 {
        self.device.sector_size()
    }

    /// 获取总块数
    pub fn total_blocks(&self) -> u64 {
        self.device.total_blocks()
    }

    /// 获取物理读取次数
    pub fn physical_read_count(&self) -> u64 {
        self.physical_read_count
    }

    /// 获取物理写入次数
    pub fn physical_write_count(&self) -> u64 {
        self.physical_write_count
    }

    /// 将块号转换为物理扇区地址
    fn logical_to_physical(&self, blockno: u32) -> u64 {
        let block_size = self.device.block_size() as u64;
        let sector_size = self.device.sector_size() as u64;
        blockno as u64 * block_size / sector_size
    }

    /// 每个逻辑块包含的物理扇区数
    fn sectors_per_block(&self) -> u32 {
        self.device.block_size() / self.device.sector_size()
    }

    fn check_request(&self, blockno: u32, len: usize) -> Result<()> {
        if blockno as u64 >= self.device.total_blocks() {
            return Err(Error::new(ErrorKind::InvalidInput, "Block number out of range"));
        }
        if len != self.device.block_size() as usize {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Buffer length does not match block size",
            ));
        }
        Ok(())
    }

    /// 读取一个完整的块
    ///
    /// # 参数
    ///
    /// * `blockno` - 块号
    /// * `buf` - 目标缓冲区（大小必须等于 block_size）
    pub fn read_block(&mut self, blockno: u32, buf: &mut [u8]) -> Result<()> {
        self.check_request(blockno, buf.len())?;

        let pba = self.logical_to_physical(blockno);
        let count = self.sectors_per_block();

        self.physical_read_count += 1;
        let n = self.device.read_blocks(pba, count, buf)?;
        if n != buf.len() {
            log::error!("[BLOCKDEV] short read: block={} got={} want={}", blockno, n, buf.len());
            return Err(Error::new(ErrorKind::Io, "Short read from block device"));
        }

        log::debug!("[BLOCKDEV] read block={} pba={:#x}", blockno, pba);
        Ok(())
    }

    /// 写入一个完整的块
    ///
    /// # 参数
    ///
    /// * `blockno` - 块号
    /// * `buf` - 源数据缓冲区（大小必须等于 block_size）
    pub fn write_block(&mut self, blockno: u32, buf: &[u8]) -> Result<()> {
        if self.device.is_read_only() {
            return Err(Error::new(ErrorKind::Unsupported, "Device is read-only"));
        }
        self.check_request(blockno, buf.len())?;

        let pba = self.logical_to_physical(blockno);
        let count = self.sectors_per_block();

        self.physical_write_count += 1;
        let n = self.device.write_blocks(pba, count, buf)?;
        if n != buf.len() {
            log::error!("[BLOCKDEV] short write: block={} put={} want={}", blockno, n, buf.len());
            return Err(Error::new(ErrorKind::Io, "Short write to block device"));
        }

        log::debug!("[BLOCKDEV] write block={} pba={:#x}", blockno, pba);
        Ok(())
    }

    /// 刷新底层设备
    pub fn flush(&mut self) -> Result<()> {
        self.device.flush()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use alloc::sync::Arc;
    use alloc::vec::Vec;
    use core::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// 内存模拟设备
    pub(crate) struct MockDevice {
        pub block_size: u32,
        pub sector_size: u32,
        pub total_blocks: u64,
        pub read_only: bool,
        pub fail_io: bool,
        /// 每次读取前等待的时间，模拟慢设备
        pub read_delay: Option<Duration>,
        /// 读取进行中时为 true
        pub busy: Arc<AtomicBool>,
        pub storage: Vec<u8>,
    }

    impl MockDevice {
        pub(crate) fn new(total_blocks: u64, block_size: u32) -> Self {
            let storage = alloc::vec![0u8; (total_blocks * block_size as u64) as usize];
            Self {
                block_size,
                sector_size: 512,
                total_blocks,
                read_only: false,
                fail_io: false,
                read_delay: None,
                busy: Arc::new(AtomicBool::new(false)),
                storage,
            }
        }

        /// 每个块的第一个字节写成块号的低 8 位，方便校验读到的内容
        pub(crate) fn with_pattern(total_blocks: u64, block_size: u32) -> Self {
            let mut dev = Self::new(total_blocks, block_size);
            for b in 0..total_blocks as usize {
                dev.storage[b * block_size as usize] = b as u8;
            }
            dev
        }
    }

    impl BlockDevice for MockDevice {
        fn block_size(&self) -> u32 {
            self.block_size
        }

        fn sector_size(&self) -> u32 {
            self.sector_size
        }

        fn total_blocks(&self) -> u64 {
            self.total_blocks
        }

        fn read_blocks(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<usize> {
            if self.fail_io {
                return Err(Error::new(ErrorKind::Io, "mock read failure"));
            }
            if let Some(delay) = self.read_delay {
                self.busy.store(true, Ordering::SeqCst);
                std::thread::sleep(delay);
            }
            let start = (lba * self.sector_size as u64) as usize;
            let len = (count * self.sector_size) as usize;
            buf[..len].copy_from_slice(&self.storage[start..start + len]);
            self.busy.store(false, Ordering::SeqCst);
            Ok(len)
        }

        fn write_blocks(&mut self, lba: u64, count: u32, buf: &[u8]) -> Result<usize> {
            if self.fail_io {
                return Err(Error::new(ErrorKind::Io, "mock write failure"));
            }
            let start = (lba * self.sector_size as u64) as usize;
            let len = (count * self.sector_size) as usize;
            self.storage[start..start + len].copy_from_slice(&buf[..len]);
            Ok(len)
        }

        fn is_read_only(&self) -> bool {
            self.read_only
        }
    }

    #[test]
    fn test_rejects_misaligned_block_size() {
        let mut dev = MockDevice::new(4, 1024);
        dev.sector_size = 700;
        let err = BlockDev::new(dev).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_read_write_block() {
        let mut bd = BlockDev::new(MockDevice::with_pattern(8, 1024)).unwrap();

        let mut buf = alloc::vec![0u8; 1024];
        bd.read_block(5, &mut buf).unwrap();
        assert_eq!(buf[0], 5);

        buf[1] = 0xAB;
        bd.write_block(5, &buf).unwrap();
        assert_eq!(bd.device().storage[5 * 1024 + 1], 0xAB);

        assert_eq!(bd.physical_read_count(), 1);
        assert_eq!(bd.physical_write_count(), 1);
    }

    #[test]
    fn test_out_of_range() {
        let mut bd = BlockDev::new(MockDevice::new(8, 1024)).unwrap();
        let mut buf = alloc::vec![0u8; 1024];
        let err = bd.read_block(8, &mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(bd.physical_read_count(), 0);
    }

    #[test]
    fn test_wrong_buffer_length() {
        let mut bd = BlockDev::new(MockDevice::new(8, 1024)).unwrap();
        let mut buf = alloc::vec![0u8; 512];
        let err = bd.read_block(0, &mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_read_only_device() {
        let mut dev = MockDevice::new(8, 1024);
        dev.read_only = true;
        let mut bd = BlockDev::new(dev).unwrap();
        let buf = alloc::vec![0u8; 1024];
        let err = bd.write_block(0, &buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert_eq!(bd.physical_write_count(), 0);
    }
}
