//! Prometheus Metrics Module
//!
//! 提供价格发现集群的核心指标监控
//!
//! ## 指标类型
//! - **Counter**: 收到/拒绝的出价、发布的价格、投递失败、过期价格
//! - **Histogram**: 聚合耗时、出清价格
//! - **Gauge**: 活跃会话数、缓存中的出价数
//!
//! ## 使用示例
//! ```rust,ignore
//! use powermatcher::shared::metrics::METRICS;
//!
//! // 记录一次出价
//! METRICS.bids_received.with_label_values(&["auctioneer"]).inc();
//!
//! // 记录聚合耗时
//! let timer = METRICS.aggregation_duration.with_label_values(&["auctioneer"]).start_timer();
//! // ... 聚合 ...
//! timer.observe_duration();
//! ```

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec,
    CounterVec, Encoder, GaugeVec, HistogramVec, TextEncoder,
};

lazy_static! {
    /// 全局Metrics实例
    pub static ref METRICS: Metrics = Metrics::new();
}

/// 集群核心指标，标签均为节点 id
pub struct Metrics {
    /// 收到的出价总数
    pub bids_received: CounterVec,

    /// 被拒绝的出价 (按原因: argument/state)
    pub bids_rejected: CounterVec,

    /// 发布（或转发）的价格总数
    pub prices_published: CounterVec,

    /// 向单个会话投递价格失败的次数
    pub price_deliveries_failed: CounterVec,

    /// 代理收到的过期价格
    pub stale_prices: CounterVec,

    /// 聚合次数
    pub aggregations: CounterVec,

    /// 活跃会话数
    pub active_sessions: GaugeVec,

    /// 缓存中的出价数
    pub cached_bids: GaugeVec,

    /// 最近一次出清价格
    pub equilibrium_price: GaugeVec,

    /// 聚合耗时分布 (秒)
    pub aggregation_duration: HistogramVec,
}

impl Metrics {
    /// 创建新的Metrics实例
    pub fn new() -> Self {
        Self {
            bids_received: register_counter_vec!(
                "powermatcher_bids_received_total",
                "Total number of bid updates accepted",
                &["node"]
            )
            .unwrap(),

            bids_rejected: register_counter_vec!(
                "powermatcher_bids_rejected_total",
                "Total number of bid updates rejected",
                &["node", "reason"]
            )
            .unwrap(),

            prices_published: register_counter_vec!(
                "powermatcher_prices_published_total",
                "Total number of prices published or relayed",
                &["node"]
            )
            .unwrap(),

            price_deliveries_failed: register_counter_vec!(
                "powermatcher_price_deliveries_failed_total",
                "Total number of price updates that could not be delivered to a session",
                &["node"]
            )
            .unwrap(),

            stale_prices: register_counter_vec!(
                "powermatcher_stale_prices_total",
                "Price updates received for an outdated bid",
                &["agent"]
            )
            .unwrap(),

            aggregations: register_counter_vec!(
                "powermatcher_aggregations_total",
                "Total number of bid aggregations",
                &["node"]
            )
            .unwrap(),

            active_sessions: register_gauge_vec!(
                "powermatcher_active_sessions",
                "Number of live sessions per matcher",
                &["node"]
            )
            .unwrap(),

            cached_bids: register_gauge_vec!(
                "powermatcher_cached_bids",
                "Number of bids currently held in the bid cache",
                &["node"]
            )
            .unwrap(),

            equilibrium_price: register_gauge_vec!(
                "powermatcher_equilibrium_price",
                "Last published equilibrium price",
                &["node"]
            )
            .unwrap(),

            aggregation_duration: register_histogram_vec!(
                "powermatcher_aggregation_duration_seconds",
                "Time spent aggregating and clearing",
                &["node"],
                vec![0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05]
            )
            .unwrap(),
        }
    }

    /// 导出Prometheus格式的指标
    pub fn export(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = prometheus::gather();
        let mut buffer = vec![];
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            return format!("# metrics encoding failed: {}\n", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_global() {
        // 使用全局METRICS实例而不是创建新的
        METRICS.bids_received.with_label_values(&["TEST"]).inc();

        let output = METRICS.export();
        assert!(output.contains("powermatcher_bids_received_total"));
    }

    #[test]
    fn test_histogram_global() {
        METRICS
            .aggregation_duration
            .with_label_values(&["TEST"])
            .observe(0.0002);

        let output = METRICS.export();
        assert!(output.contains("powermatcher_aggregation_duration_seconds"));
    }

    #[test]
    fn test_gauge_global() {
        METRICS.equilibrium_price.with_label_values(&["TEST"]).set(0.42);

        // Note: 由于是全局共享，不能假设值精确匹配
        let output = METRICS.export();
        assert!(output.contains("powermatcher_equilibrium_price"));
    }
}
