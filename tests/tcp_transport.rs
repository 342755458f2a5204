use futures::{SinkExt, StreamExt};
use powermatcher::application::{Auctioneer, AuctioneerConfig, SessionManager};
use powermatcher::infrastructure::network::{frame_codec, AgentServer, Codec, MessageCodec, PmMessage};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

const WAIT: Duration = Duration::from_secs(5);

async fn start_node() -> (Arc<SessionManager>, Arc<Auctioneer>, SocketAddr) {
    let manager = Arc::new(SessionManager::new());
    let auctioneer = Arc::new(
        Auctioneer::new(AuctioneerConfig {
            price_steps: 11,
            minimum_price: 0.0,
            maximum_price: 10.0,
            bid_timeout: 0,
            ..AuctioneerConfig::default()
        })
        .unwrap(),
    );
    manager.add_matcher_endpoint(auctioneer.clone());

    let server = AgentServer::bind("127.0.0.1:0".parse().unwrap(), manager.clone())
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    (manager, auctioneer, addr)
}

async fn connect(addr: SocketAddr) -> Framed<TcpStream, LengthDelimitedCodec> {
    let stream = TcpStream::connect(addr).await.expect("无法连接到服务器");
    Framed::new(stream, frame_codec())
}

async fn next_message(framed: &mut Framed<TcpStream, LengthDelimitedCodec>) -> Option<PmMessage> {
    let frame = tokio::time::timeout(WAIT, framed.next()).await.expect("等待消息超时")?;
    MessageCodec::new().decode(&frame.unwrap()).unwrap()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("条件未在期限内满足");
}

#[tokio::test]
async fn test_remote_agent_bid_and_price() {
    let (manager, auctioneer, addr) = start_node().await;
    let mut framed = connect(addr).await;

    // 1. 注册
    let register = r#"{"payloadType":"REGISTER","payload":{"agentId":"remote-1","desiredParentId":"auctioneer"}}"#;
    framed.send(Bytes::from(register)).await.unwrap();

    // 2. 应该收到集群信息
    let Some(PmMessage::ClusterInfo(info)) = next_message(&mut framed).await else {
        panic!("expected CLUSTERINFO");
    };
    assert_eq!(info.cluster_id, "DefaultCluster");
    assert_eq!(info.market_basis.price_steps, 11);
    assert_eq!(manager.session_of("remote-1").unwrap().matcher_id(), "auctioneer");

    // 3. 发送稀疏格式出价：在价格 4 之后转为供给
    let bid = r#"{"payloadType":"BID","payload":{
        "marketBasis":{"commodity":"electricity","currency":"EUR","priceSteps":11,"minimumPrice":0.0,"maximumPrice":10.0},
        "pricePoints":[{"price":0.0,"demand":3.0},{"price":4.0,"demand":3.0},{"price":5.0,"demand":-2.0},{"price":10.0,"demand":-2.0}],
        "bidNumber":4}}"#;
    framed.send(Bytes::from(bid)).await.unwrap();
    wait_until(|| auctioneer.bid_cache().len() == 1).await;

    // 4. 出清后收到带自己出价号的价格
    assert_eq!(auctioneer.publish_new_price().value(), 5.0);
    let Some(PmMessage::PriceUpdate(price)) = next_message(&mut framed).await else {
        panic!("expected PRICE_UPDATE");
    };
    assert_eq!(price.price_value, 5.0);
    assert_eq!(price.bid_number, 4);

    // 5. 关闭连接后代理被注销，出价被撤回
    drop(framed);
    wait_until(|| manager.agent_count() == 0).await;
    assert_eq!(auctioneer.bid_cache().len(), 0);
    assert_eq!(manager.active_session_count(), 0);
}

#[tokio::test]
async fn test_invalid_bid_keeps_connection_open() {
    let (_manager, auctioneer, addr) = start_node().await;
    let mut framed = connect(addr).await;
    let mut codec = MessageCodec::new();

    framed
        .send(Bytes::from(r#"{"payloadType":"REGISTER","payload":{"agentId":"remote-2","desiredParentId":"auctioneer"}}"#))
        .await
        .unwrap();
    assert!(matches!(next_message(&mut framed).await, Some(PmMessage::ClusterInfo(_))));

    // 需求递增的出价被拒绝，连接保持
    let ascending: Vec<String> = (0..11).map(|i| format!("{}.0", i)).collect();
    let bad = format!(
        r#"{{"payloadType":"BID","payload":{{"marketBasis":{{"commodity":"electricity","currency":"EUR","priceSteps":11,"minimumPrice":0.0,"maximumPrice":10.0}},"demand":[{}],"bidNumber":1}}}}"#,
        ascending.join(",")
    );
    framed.send(Bytes::from(bad)).await.unwrap();
    framed.send(Bytes::from("not json")).await.unwrap();

    let good = PmMessage::Bid(powermatcher::infrastructure::network::BidModel {
        market_basis: info_market_basis(),
        demand: Some(vec![-1.0; 11]),
        price_points: None,
        bid_number: 2,
    });
    framed.send(codec.encode(&good).unwrap()).await.unwrap();
    wait_until(|| auctioneer.bid_cache().len() == 1).await;

    auctioneer.publish_new_price();
    let Some(PmMessage::PriceUpdate(price)) = next_message(&mut framed).await else {
        panic!("expected PRICE_UPDATE");
    };
    assert_eq!(price.bid_number, 2);
    assert_eq!(price.price_value, 0.0);
}

#[tokio::test]
async fn test_oversized_market_basis_is_rejected() {
    let (manager, auctioneer, addr) = start_node().await;
    let mut framed = connect(addr).await;

    framed
        .send(Bytes::from(r#"{"payloadType":"REGISTER","payload":{"agentId":"remote-3","desiredParentId":"auctioneer"}}"#))
        .await
        .unwrap();
    assert!(matches!(next_message(&mut framed).await, Some(PmMessage::ClusterInfo(_))));

    // 巨大的价格步数不能让节点展开出价
    let huge = r#"{"payloadType":"BID","payload":{
        "marketBasis":{"commodity":"electricity","currency":"EUR","priceSteps":1099511627776,"minimumPrice":0.0,"maximumPrice":10.0},
        "pricePoints":[{"price":0.0,"demand":3.0},{"price":10.0,"demand":-2.0}],
        "bidNumber":1}}"#;
    framed.send(Bytes::from(huge)).await.unwrap();

    let good = PmMessage::Bid(powermatcher::infrastructure::network::BidModel {
        market_basis: info_market_basis(),
        demand: Some(vec![2.0; 11]),
        price_points: None,
        bid_number: 2,
    });
    framed.send(MessageCodec::new().encode(&good).unwrap()).await.unwrap();
    wait_until(|| auctioneer.bid_cache().len() == 1).await;
    assert_eq!(auctioneer.bid_cache().bid_of("remote-3").unwrap().bid_number(), 2);
    assert!(manager.session_of("remote-3").is_some());

    auctioneer.publish_new_price();
    let Some(PmMessage::PriceUpdate(price)) = next_message(&mut framed).await else {
        panic!("expected PRICE_UPDATE");
    };
    assert_eq!(price.bid_number, 2);
    assert_eq!(price.price_value, 10.0);
}

#[tokio::test]
async fn test_first_frame_must_register() {
    let (manager, _auctioneer, addr) = start_node().await;
    let mut framed = connect(addr).await;

    let stray = r#"{"payloadType":"REGISTER_TYPO","payload":{}}"#;
    framed.send(Bytes::from(stray)).await.unwrap();

    // 服务器关闭连接
    let closed = tokio::time::timeout(WAIT, framed.next()).await.expect("等待关闭超时");
    assert!(closed.is_none() || closed.is_some_and(|f| f.is_err()));
    assert_eq!(manager.agent_count(), 0);
}

fn info_market_basis() -> powermatcher::infrastructure::network::MarketBasisModel {
    powermatcher::infrastructure::network::MarketBasisModel {
        commodity: "electricity".into(),
        currency: "EUR".into(),
        price_steps: 11,
        minimum_price: 0.0,
        maximum_price: 10.0,
    }
}
