//! 块缓存常量定义

/// 默认缓存块数量
pub const NBUF: usize = 30;

/// 默认 bucket 数量
///
/// 取素数，使连续块号均匀分布到各个 bucket。
pub const NBUCKET: usize = 13;

/// 默认块大小（字节）
pub const BSIZE: usize = 1024;

/// 未绑定缓存块的设备号
///
/// 初始化后尚未被使用过的缓存块带有此设备号，不会与任何真实设备匹配。
pub const NO_DEV: u32 = u32::MAX;
