//! 错误类型定义
//!
//! 提供块缓存操作的错误类型。

use core::fmt;

/// 块缓存操作错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    message: &'static str,
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// I/O 错误
    Io,
    /// 无效参数（配置错误、越界设备号或块号）
    InvalidInput,
    /// 没有空闲缓存块
    NoSpace,
    /// 不支持的操作（例如写只读设备）
    Unsupported,
    /// 无效状态（锁使用错误）
    InvalidState,
}

impl Error {
    /// 创建新错误
    pub const fn new(kind: ErrorKind, message: &'static str) -> Self {
        Self { kind, message }
    }

    /// 获取错误类型
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// 获取错误消息
    pub const fn message(&self) -> &'static str {
        self.message
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

#[cfg(any(test, feature = "std"))]
impl std::error::Error for Error {}

/// Result 类型别名
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_display() {
        let err = Error::new(ErrorKind::NoSpace, "no free buffers");
        assert_eq!(err.to_string(), "NoSpace: no free buffers");
        assert_eq!(err.kind(), ErrorKind::NoSpace);
        assert_eq!(err.message(), "no free buffers");
    }
}
