//! Crate-wide error type
//!
//! 错误分为两大类：
//! - **参数错误**（`Validation`）：调用方提供了非法的出价、价格或市场基准，
//!   在写入路径上被同步拒绝，不会进入缓存
//! - **状态错误**（`InvalidState`）：在会话尚未激活、市场基准未知时操作，
//!   只影响本次调用
//!
//! 其余变体覆盖传输、配置与I/O层面的失败。

use crate::domain::validation::ValidationError;

/// PowerMatcher 统一错误类型
#[derive(Debug, thiserror::Error)]
pub enum PowerMatcherError {
    #[error("invalid argument: {0}")]
    Validation(#[from] ValidationError),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("agent [{agent_id}] is not permitted to connect")]
    NotPermitted { agent_id: String },

    #[error("wire format error: {0}")]
    Wire(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PowerMatcherError {
    pub fn state(msg: impl Into<String>) -> Self {
        PowerMatcherError::InvalidState(msg.into())
    }

    /// 调用方需要修正输入后重发
    pub fn is_argument_error(&self) -> bool {
        matches!(self, PowerMatcherError::Validation(_) | PowerMatcherError::Wire(_))
    }

    pub fn is_state_error(&self) -> bool {
        matches!(self, PowerMatcherError::InvalidState(_))
    }
}

impl From<serde_json::Error> for PowerMatcherError {
    fn from(err: serde_json::Error) -> Self {
        PowerMatcherError::Wire(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PowerMatcherError>;
