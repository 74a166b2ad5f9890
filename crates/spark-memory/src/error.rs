//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 汇总缓冲引擎在越界、扩容、释放后访问等场景下的全部失败语义；
//! - 所有错误都是“编程错误”信号：就地同步返回，不做重试，也不存在可恢复分支。
//!
//! ## 设计要求（What）
//! - 错误枚举派生 [`thiserror::Error`]，与 `std::error::Error` 生态兼容；
//! - 每个变体映射到 [`codes`] 中的稳定错误码，便于日志检索与告警聚合。

use std::borrow::Cow;

use thiserror::Error;

/// 带默认错误类型的结果别名。
pub type Result<T, E = MemoryError> = core::result::Result<T, E>;

/// 稳定错误码，遵循 `<领域>.<语义>` 命名约定。
pub mod codes {
    /// 索引、长度或游标违反不变量。
    pub const OUT_OF_RANGE: &str = "memory.out_of_range";
    /// 参数非法，例如容量为 0 或分配器已关闭。
    pub const ILLEGAL_ARGUMENT: &str = "memory.illegal_argument";
    /// 扩容需求超过 `max_capacity`。
    pub const CAPACITY_EXCEEDED: &str = "memory.capacity_exceeded";
    /// 访问已释放的底层内存。
    pub const USE_AFTER_FREE: &str = "memory.use_after_free";
    /// 当前平台不具备所需的内存后端。
    pub const UNSUPPORTED_BACKEND: &str = "memory.unsupported_backend";
}

/// 缓冲引擎错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：把缓冲层的所有违规访问收敛为五类，调用方可以按类别决定是中止当前调用
///   还是直接上报缺陷；
/// - **契约 (What)**：
///   - 所有变体均为 `Send + Sync + 'static`，可以跨线程传播；
///   - 变体携带的上下文字符串只用于排障，不承诺格式稳定，稳定标识请使用 [`MemoryError::code`]；
/// - **设计权衡 (Trade-offs)**：上下文使用 `Cow<'static, str>`，静态描述零分配，
///   带数值的描述才会触发一次格式化。
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum MemoryError {
    /// 索引、长度或游标越过 `[0, capacity)` 或读写游标不变量。
    #[error("index out of range: {detail}")]
    OutOfRange { detail: Cow<'static, str> },

    /// 参数本身非法，与缓冲状态无关。
    #[error("illegal argument: {detail}")]
    IllegalArgument { detail: Cow<'static, str> },

    /// 扩容后的最小容量超过 `max_capacity`。
    #[error("required capacity {required} exceeds max capacity {max_capacity}")]
    CapacityExceeded { required: u64, max_capacity: u32 },

    /// 开启可访问性检查时，操作命中已释放的内存。
    #[error("memory already freed: {detail}")]
    UseAfterFree { detail: Cow<'static, str> },

    /// 原生内存访问不可用，且该操作没有托管回退路径。
    #[error("unsupported memory backend for `{operation}`")]
    UnsupportedBackend { operation: &'static str },
}

impl MemoryError {
    /// 构造越界错误。
    pub fn out_of_range(detail: impl Into<Cow<'static, str>>) -> Self {
        Self::OutOfRange {
            detail: detail.into(),
        }
    }

    /// 构造非法参数错误。
    pub fn illegal_argument(detail: impl Into<Cow<'static, str>>) -> Self {
        Self::IllegalArgument {
            detail: detail.into(),
        }
    }

    /// 构造释放后访问错误。
    pub fn use_after_free(detail: impl Into<Cow<'static, str>>) -> Self {
        Self::UseAfterFree {
            detail: detail.into(),
        }
    }

    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            MemoryError::OutOfRange { .. } => codes::OUT_OF_RANGE,
            MemoryError::IllegalArgument { .. } => codes::ILLEGAL_ARGUMENT,
            MemoryError::CapacityExceeded { .. } => codes::CAPACITY_EXCEEDED,
            MemoryError::UseAfterFree { .. } => codes::USE_AFTER_FREE,
            MemoryError::UnsupportedBackend { .. } => codes::UNSUPPORTED_BACKEND,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_maps_to_a_stable_code() {
        let cases = [
            (MemoryError::out_of_range("index: 9"), codes::OUT_OF_RANGE),
            (
                MemoryError::illegal_argument("capacity: 0"),
                codes::ILLEGAL_ARGUMENT,
            ),
            (
                MemoryError::CapacityExceeded {
                    required: 17,
                    max_capacity: 16,
                },
                codes::CAPACITY_EXCEEDED,
            ),
            (MemoryError::use_after_free("arena"), codes::USE_AFTER_FREE),
            (
                MemoryError::UnsupportedBackend { operation: "wrap" },
                codes::UNSUPPORTED_BACKEND,
            ),
        ];
        for (error, code) in cases {
            assert_eq!(error.code(), code);
        }
    }

    #[test]
    fn display_carries_context() {
        let error = MemoryError::CapacityExceeded {
            required: 17,
            max_capacity: 16,
        };
        assert_eq!(
            error.to_string(),
            "required capacity 17 exceeds max capacity 16"
        );
    }
}
