//! Health Check Endpoint
//!
//! 提供节点健康状态检查，用于负载均衡器和监控系统
//!
//! ## 健康检查端点
//! - `/health` - 状态与集群详情
//! - `/health/ready` - 就绪检查（节点是否可以接受代理）
//! - `/health/live` - 存活检查（进程是否仍在运行）
//!
//! ## 响应格式
//! ```json
//! {
//!   "status": "healthy",
//!   "uptime_seconds": 3600,
//!   "version": "0.1.0",
//!   "timestamp": 1234567890,
//!   "details": {"active_sessions": 12, "registered_agents": 12, "cached_bids": 10, "last_price": 0.42}
//! }
//! ```

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// 健康状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// 健康
    Healthy,
    /// 降级（例如集中器失去上游）
    Degraded,
    /// 不健康
    Unhealthy,
}

/// 健康检查响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    /// 运行时间（秒）
    pub uptime_seconds: u64,
    pub version: String,
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HealthDetails>,
}

/// 集群详情
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthDetails {
    /// 活跃会话数
    pub active_sessions: usize,
    /// 已注册代理数
    pub registered_agents: usize,
    /// 拍卖器缓存中的出价数
    pub cached_bids: usize,
    /// 最近一次出清价格
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_price: Option<f64>,
}

pub type DetailsProvider = Arc<dyn Fn() -> HealthDetails + Send + Sync>;

/// 健康检查器
pub struct HealthChecker {
    start_time: SystemTime,
    status: RwLock<HealthStatus>,
    version: String,
    details: RwLock<Option<DetailsProvider>>,
}

impl HealthChecker {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            start_time: SystemTime::now(),
            status: RwLock::new(HealthStatus::Healthy),
            version: version.into(),
            details: RwLock::new(None),
        }
    }

    /// 获取运行时间（秒）
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time
            .elapsed()
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    fn current_timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    pub fn set_status(&self, status: HealthStatus) {
        *self.status.write() = status;
    }

    pub fn get_status(&self) -> HealthStatus {
        *self.status.read()
    }

    /// 注册集群详情来源
    pub fn set_details_provider(&self, provider: DetailsProvider) {
        *self.details.write() = Some(provider);
    }

    /// 生成健康检查响应，带上已注册的集群详情
    pub fn check_health(&self) -> HealthResponse {
        let provider = self.details.read().clone();
        HealthResponse {
            status: self.get_status(),
            uptime_seconds: self.uptime_seconds(),
            version: self.version.clone(),
            timestamp: Self::current_timestamp(),
            details: provider.map(|p| p()),
        }
    }

    /// 存活检查
    pub fn check_liveness(&self) -> bool {
        true
    }

    /// 就绪检查
    pub fn check_readiness(&self) -> bool {
        matches!(self.get_status(), HealthStatus::Healthy)
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new(env!("CARGO_PKG_VERSION"))
    }
}
