//! 缓冲引擎的显式配置。
//!
//! # 模块定位（Why）
//! - 边界检查与可访问性检查是吞吐与安全之间的取舍，这里把它们建模为传入分配器的值，
//!   而不是进程级可变开关；
//! - 池化参数与全局开关分开建模：前者只属于池化分配器，后者影响所有缓冲。
//!
//! # 使用方式（How）
//! - 代码内构造：`MemoryConfig::new().with_check_bounds(true)`；
//! - 宿主配置文件：两个结构均实现 `serde::Deserialize`，缺省字段回落到默认值；
//! - 环境变量：[`MemoryConfig::from_env`] 读取 `SPARK_MEMORY_*` 系列变量。

use std::env;

use serde::Deserialize;

use crate::error::{MemoryError, Result};

/// 强制所有缓冲执行边界检查。
pub const ENV_CHECK_BOUNDS: &str = "SPARK_MEMORY_CHECK_BOUNDS";
/// 开启释放后访问检测。
pub const ENV_CHECK_ACCESSIBLE: &str = "SPARK_MEMORY_CHECK_ACCESSIBLE";
/// 跳过原生内存访问，始终使用托管后端。
pub const ENV_FORCE_MANAGED: &str = "SPARK_MEMORY_FORCE_MANAGED";

/// 作用于单个分配器及其产出缓冲的全局开关。
///
/// ### 契约说明（What）
/// - `check_bounds`：为 `true` 时，即便调用方申请了不检查边界的缓冲，也按检查模式构造；
/// - `check_accessible`：为 `true` 时，带检查的缓冲在底层内存被标记释放后返回
///   [`MemoryError::UseAfterFree`]；
/// - `force_managed`：为 `true` 时跳过平台探测，直接使用托管字节数组作为后端；
/// - 三者默认均为 `false`，即最大吞吐模式。
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct MemoryConfig {
    check_bounds: bool,
    check_accessible: bool,
    force_managed: bool,
}

impl MemoryConfig {
    /// 创建默认配置。
    pub const fn new() -> Self {
        Self {
            check_bounds: false,
            check_accessible: false,
            force_managed: false,
        }
    }

    /// 设置是否强制边界检查。
    pub const fn with_check_bounds(mut self, enabled: bool) -> Self {
        self.check_bounds = enabled;
        self
    }

    /// 设置是否检测释放后访问。
    pub const fn with_check_accessible(mut self, enabled: bool) -> Self {
        self.check_accessible = enabled;
        self
    }

    /// 设置是否强制使用托管后端。
    pub const fn with_force_managed(mut self, enabled: bool) -> Self {
        self.force_managed = enabled;
        self
    }

    pub const fn check_bounds(&self) -> bool {
        self.check_bounds
    }

    pub const fn check_accessible(&self) -> bool {
        self.check_accessible
    }

    pub const fn force_managed(&self) -> bool {
        self.force_managed
    }

    /// 从进程环境变量读取配置，未设置的变量保持默认值。
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// 使用自定义查找函数解析配置，便于测试或接入其它配置源。
    ///
    /// 接受 `true/false/1/0/yes/no/on/off`（大小写不敏感），其它取值返回
    /// [`MemoryError::IllegalArgument`]。
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new();
        if let Some(raw) = lookup(ENV_CHECK_BOUNDS) {
            config.check_bounds = parse_flag(ENV_CHECK_BOUNDS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_CHECK_ACCESSIBLE) {
            config.check_accessible = parse_flag(ENV_CHECK_ACCESSIBLE, &raw)?;
        }
        if let Some(raw) = lookup(ENV_FORCE_MANAGED) {
            config.force_managed = parse_flag(ENV_FORCE_MANAGED, &raw)?;
        }
        Ok(config)
    }
}

fn parse_flag(key: &'static str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(MemoryError::illegal_argument(format!(
            "{key}: `{other}` (expected: true/false/1/0/yes/no/on/off)"
        ))),
    }
}

/// 池化分配器的容量参数。
///
/// ### 契约说明（What）
/// - `pool_size`：构造分配器时预先创建的缓冲数量，全部以 `max_buffer_capacity` 为键入池；
/// - `max_pool_size`：单个键下队列允许保留的最大缓冲数，超出部分在归还时直接释放；
/// - `max_buffer_capacity`：该分配器允许的最大 `max_capacity`，超过即为非法参数。
///
/// ### 前置条件
/// - `pool_size <= max_pool_size`，且 `max_buffer_capacity > 0`，由 [`PoolConfig::validate`] 校验。
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    pool_size: usize,
    max_pool_size: usize,
    max_buffer_capacity: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new(0, 64, 64 * 1024)
    }
}

impl PoolConfig {
    pub const fn new(pool_size: usize, max_pool_size: usize, max_buffer_capacity: u32) -> Self {
        Self {
            pool_size,
            max_pool_size,
            max_buffer_capacity,
        }
    }

    pub const fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub const fn max_pool_size(&self) -> usize {
        self.max_pool_size
    }

    pub const fn max_buffer_capacity(&self) -> u32 {
        self.max_buffer_capacity
    }

    /// 校验参数组合是否自洽。
    pub fn validate(&self) -> Result<()> {
        if self.max_buffer_capacity == 0 {
            return Err(MemoryError::illegal_argument(
                "maxBufferCapacity: 0 (expected: > 0)",
            ));
        }
        if self.pool_size > self.max_pool_size {
            return Err(MemoryError::illegal_argument(format!(
                "poolSize: {} (expected: <= maxPoolSize({}))",
                self.pool_size, self.max_pool_size
            )));
        }
        Ok(())
    }
}
