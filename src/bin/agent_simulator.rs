use clap::Parser;
use futures::{SinkExt, StreamExt};
use powermatcher::domain::{BidUpdate, MarketBasis};
use powermatcher::infrastructure::network::{
    frame_codec, BidModel, Codec, MessageCodec, PmMessage, RegisterModel,
};
use powermatcher::interfaces::tools::random_bid;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

/// 远程设备代理模拟器
#[derive(Parser, Debug, Clone)]
#[command(name = "agent_simulator")]
struct Args {
    /// 节点地址
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    server: SocketAddr,

    /// 模拟的并发代理数量
    #[arg(short, long, default_value_t = 8)]
    clients: u32,

    /// 父节点ID（拍卖器或集中器）
    #[arg(long, default_value = "auctioneer")]
    parent: String,

    /// 出价间隔（毫秒）
    #[arg(long, default_value_t = 500)]
    interval_ms: u64,

    /// 测试持续时间（秒）
    #[arg(short, long, default_value_t = 10)]
    duration: u64,
}

#[derive(Default)]
struct Counters {
    bids_sent: AtomicU64,
    prices_received: AtomicU64,
    // 价格对应的出价号等于该代理最后一次发送的出价号
    prices_current: AtomicU64,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    println!("启动代理模拟...");
    println!("模拟代理数量: {}", args.clients);
    println!("测试持续时间: {}s", args.duration);

    let counters = Arc::new(Counters::default());
    let mut handles = Vec::new();
    for i in 0..args.clients {
        let counters = counters.clone();
        let args = args.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = run_client(i, &args, &counters).await {
                eprintln!("[代理 {}] 异常退出: {}", i, e);
            }
        }));
    }

    // 等待测试结束
    tokio::time::sleep(Duration::from_secs(args.duration)).await;
    for handle in &handles {
        handle.abort();
    }

    let bids = counters.bids_sent.load(Ordering::Relaxed);
    let prices = counters.prices_received.load(Ordering::Relaxed);
    let current = counters.prices_current.load(Ordering::Relaxed);
    println!("\n--- 测试结果 ---");
    println!("已发送出价: {}", bids);
    println!("已收到价格: {}", prices);
    println!("对应最新出价的价格: {}", current);
    println!("出价速率: {:.2}/s", bids as f64 / args.duration as f64);
}

async fn run_client(
    client_id: u32,
    args: &Args,
    counters: &Counters,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let stream = TcpStream::connect(args.server).await?;
    let mut framed = Framed::new(stream, frame_codec());
    let mut codec = MessageCodec::new();

    let register = PmMessage::Register(RegisterModel {
        agent_id: format!("sim-{}", client_id),
        desired_parent_id: args.parent.clone(),
    });
    framed.send(codec.encode(&register)?).await?;

    // 等待集群信息，得到市场基准
    let mut market_basis: Option<MarketBasis> = None;
    let mut bid_number = 0u64;
    let mut ticker = tokio::time::interval(Duration::from_millis(args.interval_ms.max(1)));

    loop {
        tokio::select! {
            frame = framed.next() => {
                let Some(frame) = frame else { return Ok(()) };
                match codec.decode(&frame?)? {
                    Some(PmMessage::ClusterInfo(info)) => {
                        market_basis = Some(info.market_basis.to_market_basis()?);
                        bid_number = 0;
                    }
                    Some(PmMessage::PriceUpdate(update)) => {
                        counters.prices_received.fetch_add(1, Ordering::Relaxed);
                        if update.bid_number == bid_number {
                            counters.prices_current.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    _ => {}
                }
            }
            _ = ticker.tick() => {
                let Some(mb) = &market_basis else { continue };
                let bid = random_bid(&mut rand::thread_rng(), mb, 1000.0)?;
                bid_number += 1;
                let update = BidUpdate::new(bid, bid_number);
                // 交替使用稠密和稀疏两种出价格式
                let model = if bid_number % 2 == 0 {
                    BidModel::dense(&update)
                } else {
                    BidModel::sparse(&update)
                };
                framed.send(codec.encode(&PmMessage::Bid(model))?).await?;
                counters.bids_sent.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
