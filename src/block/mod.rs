//! 块设备抽象
//!
//! 缓存与持久化介质之间的边界。block/device.rs 定义设备接口 `BlockDevice`，
//! 以及把缓存块号转换为扇区地址、统计物理读写次数的 `BlockDev` 包装器。

mod device;

pub use device::{BlockDev, BlockDevice};

#[cfg(test)]
pub(crate) use device::tests::MockDevice;
