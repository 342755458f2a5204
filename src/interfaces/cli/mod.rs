/// CLI Interface Module
///
/// This module provides the command-line entry point of a PowerMatcher node.
/// One process runs one auctioneer, optionally a layer of concentrators and a
/// number of simulated device agents, accepts remote agents over TCP and
/// serves metrics and health checks over HTTP.
///
/// ## Responsibilities
/// - Parse command-line arguments and the optional properties file
/// - Build the tokio runtime with the requested worker count
/// - Wire the cluster into a `SessionManager` and start the periodic ticks
/// - Run until Ctrl-C

use crate::application::config::{parse_properties, AuctioneerConfig, ConcentratorConfig};
use crate::application::monitoring::TracingObserver;
use crate::application::scheduler::{ScheduledTask, Scheduler, TokioScheduler};
use crate::application::{Auctioneer, Concentrator, DeviceAgent, SessionManager};
use crate::infrastructure::network::AgentServer;
use crate::infrastructure::observability::{HealthChecker, HealthDetails, HealthStatus, ObservabilityServer};
use crate::interfaces::tools::random_bid;
use crate::shared::error::Result;
use clap::Parser;
use serde::Serialize;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// PowerMatcher 节点命令行配置
#[derive(Parser, Debug, Clone)]
#[command(name = "powermatcher")]
#[command(version)]
#[command(about = "智能电网双向拍卖价格发现节点", long_about = None)]
pub struct CliConfig {
    /// 远程代理监听地址
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    pub host: IpAddr,

    /// 远程代理监听端口
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,

    /// Metrics/健康检查 HTTP 端口（0 表示不启动）
    #[arg(short = 'm', long, default_value_t = 9090)]
    pub metrics_port: u16,

    /// 工作线程数（0表示自动检测CPU核心数）
    #[arg(short = 'w', long, default_value_t = 0)]
    pub workers: usize,

    /// 拍卖器属性文件 (key=value)
    #[arg(short = 'c', long)]
    pub properties: Option<PathBuf>,

    /// 进程内模拟的设备代理数量
    #[arg(short = 'a', long, default_value_t = 0)]
    pub simulated_agents: usize,

    /// 拍卖器与代理之间的集中器数量
    #[arg(short = 'n', long, default_value_t = 0)]
    pub concentrators: usize,

    /// 模拟代理的出价间隔（秒）
    #[arg(long, default_value_t = 5)]
    pub bid_interval: u64,

    /// 日志级别
    #[arg(short = 'l', long, default_value = "info", value_parser = ["trace", "debug", "info", "warn", "error"])]
    pub log_level: String,

    /// 记录每条代理事件
    #[arg(long, default_value_t = false)]
    pub log_events: bool,

    /// 仅显示配置不启动服务器（用于调试）
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

impl CliConfig {
    pub fn worker_threads(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get()
        } else {
            self.workers
        }
    }
}

/// Node plan derived from the CLI and the properties file
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePlan {
    pub auctioneer: AuctioneerConfig,
    pub concentrators: Vec<ConcentratorConfig>,
    pub simulated_agents: Vec<String>,
}

impl NodePlan {
    pub fn from_cli(config: &CliConfig, props: &HashMap<String, String>) -> Result<Self> {
        let auctioneer = AuctioneerConfig::from_properties(props)?;
        let concentrators: Vec<ConcentratorConfig> = (0..config.concentrators)
            .map(|i| ConcentratorConfig {
                agent_id: format!("concentrator-{}", i),
                desired_parent_id: auctioneer.agent_id.clone(),
                bid_timeout: auctioneer.bid_timeout,
                ..ConcentratorConfig::default()
            })
            .collect();
        for c in &concentrators {
            c.validate()?;
        }
        let simulated_agents = (0..config.simulated_agents).map(|i| format!("device-{}", i)).collect();
        Ok(Self {
            auctioneer,
            concentrators,
            simulated_agents,
        })
    }

    /// Parent of a simulated agent; agents are spread over the concentrators
    pub fn parent_of(&self, agent_index: usize) -> &str {
        if self.concentrators.is_empty() {
            &self.auctioneer.agent_id
        } else {
            &self.concentrators[agent_index % self.concentrators.len()].agent_id
        }
    }
}

/// Runs the CLI application
///
/// Parses command-line arguments, builds the runtime and blocks until the
/// node shuts down.
pub fn run() -> Result<()> {
    let config = CliConfig::parse();
    init_logging(&config.log_level);

    let props = match &config.properties {
        Some(path) => parse_properties(&std::fs::read_to_string(path)?),
        None => HashMap::new(),
    };
    let plan = NodePlan::from_cli(&config, &props)?;
    let workers = config.worker_threads();

    info!("PowerMatcher 节点启动");
    info!("配置: {:?}", config);

    println!("========================================");
    println!("  PowerMatcher v{}", env!("CARGO_PKG_VERSION"));
    println!("========================================");
    println!("监听地址:     {}:{}", config.host, config.port);
    println!("Metrics端口:  {}", config.metrics_port);
    println!("工作线程:     {}", workers);
    println!("拍卖器:       {}", plan.auctioneer.agent_id);
    println!("集中器数量:   {}", plan.concentrators.len());
    println!("模拟代理数:   {}", plan.simulated_agents.len());
    println!("日志级别:     {}", config.log_level);
    println!("========================================");

    // 如果是dry-run模式，仅显示配置
    if config.dry_run {
        let json = serde_json::to_string_pretty(&plan)?;
        println!("{}", json);
        println!("\nDry-run 模式 - 不启动服务器");
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers)
        .enable_all()
        .build()?;
    runtime.block_on(serve(config, plan))
}

async fn serve(config: CliConfig, plan: NodePlan) -> Result<()> {
    let scheduler = TokioScheduler::current()?;
    let manager = Arc::new(SessionManager::new());

    let auctioneer = Arc::new(Auctioneer::new(plan.auctioneer.clone())?);
    if config.log_events {
        auctioneer.add_observer(Arc::new(TracingObserver));
    }
    manager.add_matcher_endpoint(auctioneer.clone());
    auctioneer.start(&scheduler);

    let mut concentrators = Vec::with_capacity(plan.concentrators.len());
    for c in &plan.concentrators {
        let concentrator = Arc::new(Concentrator::new(c.clone())?);
        if config.log_events {
            concentrator.add_observer(Arc::new(TracingObserver));
        }
        manager.add_matcher_endpoint(concentrator.clone());
        manager.add_agent_endpoint(concentrator.clone());
        concentrator.start(&scheduler);
        concentrators.push(concentrator);
    }

    let mut tasks: Vec<ScheduledTask> = Vec::new();
    for (i, agent_id) in plan.simulated_agents.iter().enumerate() {
        let agent = Arc::new(DeviceAgent::new(agent_id.clone(), plan.parent_of(i)));
        manager.add_agent_endpoint(agent.clone());
        tasks.push(schedule_random_bids(&scheduler, agent, config.bid_interval));
    }
    info!("集群已就绪: {} 个活跃会话", manager.active_session_count());

    let server = AgentServer::bind(SocketAddr::new(config.host, config.port), manager.clone()).await?;
    let server_task = tokio::spawn(server.run());

    let metrics_task = if config.metrics_port > 0 {
        let http = ObservabilityServer::new(config.metrics_port);
        let checker = http.health_checker();
        let details_manager = manager.clone();
        let details_auctioneer = auctioneer.clone();
        checker.set_details_provider(Arc::new(move || HealthDetails {
            active_sessions: details_manager.active_session_count(),
            registered_agents: details_manager.agent_count(),
            cached_bids: details_auctioneer.bid_cache().len(),
            last_price: details_auctioneer.last_price().map(|p| p.value()),
        }));
        tasks.push(schedule_health_updates(&scheduler, checker, concentrators.clone()));
        Some(tokio::spawn(http.run()))
    } else {
        None
    };

    tokio::signal::ctrl_c().await?;
    info!("收到退出信号，正在关闭");

    for task in &tasks {
        task.cancel();
    }
    for concentrator in &concentrators {
        concentrator.stop();
    }
    auctioneer.stop();
    server_task.abort();
    if let Some(task) = metrics_task {
        task.abort();
    }
    Ok(())
}

/// 任一集中器失去上游时节点降级
pub fn cluster_status(concentrators: &[Arc<Concentrator>]) -> HealthStatus {
    if concentrators.iter().any(|c| c.upstream_session().is_none()) {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

fn schedule_health_updates(
    scheduler: &dyn Scheduler,
    checker: Arc<HealthChecker>,
    concentrators: Vec<Arc<Concentrator>>,
) -> ScheduledTask {
    scheduler.schedule_at_fixed_rate(
        HEALTH_CHECK_PERIOD,
        Arc::new(move || {
            let status = cluster_status(&concentrators);
            if checker.get_status() != status {
                warn!("节点健康状态变化: {:?}", status);
                checker.set_status(status);
            }
        }),
    )
}

const HEALTH_CHECK_PERIOD: Duration = Duration::from_secs(5);

fn schedule_random_bids(scheduler: &dyn Scheduler, agent: Arc<DeviceAgent>, interval: u64) -> ScheduledTask {
    scheduler.schedule_at_fixed_rate(
        Duration::from_secs(interval.max(1)),
        Arc::new(move || {
            let Some(mb) = agent.market_basis() else {
                return;
            };
            let bid = match random_bid(&mut rand::thread_rng(), &mb, 1000.0) {
                Ok(bid) => bid,
                Err(e) => {
                    warn!("随机出价无效: {}", e);
                    return;
                }
            };
            if let Err(e) = agent.publish_bid(bid) {
                warn!("模拟代理出价失败: {}", e);
            }
        }),
    )
}

/// 初始化日志系统
pub fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    // 重复初始化（例如测试中）时忽略
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_config_default() {
        let config = CliConfig::parse_from(["powermatcher"]);
        assert_eq!(config.port, 8080);
        assert_eq!(config.metrics_port, 9090);
        assert_eq!(config.workers, 0);
        assert!(config.worker_threads() >= 1);
        assert_eq!(config.simulated_agents, 0);
        assert_eq!(config.concentrators, 0);
        assert_eq!(config.log_level, "info");
        assert!(config.properties.is_none());
        assert!(!config.dry_run);
    }

    #[test]
    fn test_cli_config_custom() {
        let config = CliConfig::parse_from([
            "powermatcher",
            "--host", "0.0.0.0",
            "--port", "9000",
            "--metrics-port", "0",
            "--workers", "8",
            "--properties", "auctioneer.properties",
            "--simulated-agents", "100",
            "--concentrators", "4",
            "--log-level", "debug",
            "--log-events",
            "--dry-run",
        ]);

        assert_eq!(config.host.to_string(), "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.metrics_port, 0);
        assert_eq!(config.worker_threads(), 8);
        assert_eq!(config.properties, Some(PathBuf::from("auctioneer.properties")));
        assert_eq!(config.simulated_agents, 100);
        assert_eq!(config.concentrators, 4);
        assert!(config.log_events);
        assert!(config.dry_run);
    }

    #[test]
    fn test_cli_config_short_flags() {
        let config = CliConfig::parse_from([
            "powermatcher",
            "-H", "192.168.1.1",
            "-p", "7000",
            "-w", "4",
            "-a", "10",
            "-n", "2",
            "-l", "warn",
        ]);

        assert_eq!(config.host.to_string(), "192.168.1.1");
        assert_eq!(config.port, 7000);
        assert_eq!(config.workers, 4);
        assert_eq!(config.simulated_agents, 10);
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_rejects_unknown_log_level() {
        assert!(CliConfig::try_parse_from(["powermatcher", "-l", "loud"]).is_err());
    }

    #[test]
    fn test_node_plan() {
        let config = CliConfig::parse_from(["powermatcher", "-a", "5", "-n", "2"]);
        let props: HashMap<String, String> = [("agentId".to_string(), "root".to_string())].into();
        let plan = NodePlan::from_cli(&config, &props).unwrap();

        assert_eq!(plan.auctioneer.agent_id, "root");
        assert_eq!(plan.concentrators[1].agent_id, "concentrator-1");
        assert_eq!(plan.concentrators[1].desired_parent_id, "root");
        assert_eq!(plan.simulated_agents.len(), 5);
        assert_eq!(plan.parent_of(0), "concentrator-0");
        assert_eq!(plan.parent_of(3), "concentrator-1");

        let json = serde_json::to_string(&plan).unwrap();
        assert!(json.contains("\"priceUpdateRate\":30"));
    }

    #[test]
    fn test_health_follows_concentrator_upstream() {
        use crate::application::scheduler::ManualScheduler;

        let manager = SessionManager::new();
        let concentrator = Arc::new(Concentrator::new(ConcentratorConfig::default()).unwrap());
        manager.add_agent_endpoint(concentrator.clone());
        let checker = Arc::new(HealthChecker::new("test"));
        let scheduler = ManualScheduler::new();
        let _task = schedule_health_updates(&scheduler, checker.clone(), vec![concentrator.clone()]);

        scheduler.run_pending();
        assert_eq!(checker.get_status(), HealthStatus::Degraded);
        assert!(!checker.check_readiness());

        let auctioneer = Arc::new(Auctioneer::new(AuctioneerConfig::default()).unwrap());
        manager.add_matcher_endpoint(auctioneer.clone());
        assert!(concentrator.upstream_session().is_some());
        scheduler.run_pending();
        assert_eq!(checker.get_status(), HealthStatus::Healthy);
        assert_eq!(cluster_status(&[]), HealthStatus::Healthy);
    }

    #[test]
    fn test_node_plan_without_concentrators() {
        let config = CliConfig::parse_from(["powermatcher", "-a", "2"]);
        let plan = NodePlan::from_cli(&config, &HashMap::new()).unwrap();
        assert_eq!(plan.parent_of(1), "auctioneer");
    }
}
