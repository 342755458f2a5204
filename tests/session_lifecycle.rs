use powermatcher::application::{
    AgentEndpoint, Auctioneer, AuctioneerConfig, Concentrator, ConcentratorConfig, DeviceAgent,
    MatcherEndpoint, SessionManager,
};
use powermatcher::domain::Bid;
use std::sync::Arc;

fn auctioneer() -> Arc<Auctioneer> {
    Arc::new(
        Auctioneer::new(AuctioneerConfig {
            price_steps: 11,
            minimum_price: 0.0,
            maximum_price: 10.0,
            bid_timeout: 0,
            ..AuctioneerConfig::default()
        })
        .unwrap(),
    )
}

#[test]
fn test_agent_waits_for_its_parent() {
    let manager = SessionManager::new();
    let agent = Arc::new(DeviceAgent::new("fridge", "auctioneer"));
    manager.add_agent_endpoint(agent.clone());
    assert!(!agent.is_connected());
    assert!(manager.session_of("fridge").is_none());

    let auctioneer = auctioneer();
    manager.add_matcher_endpoint(auctioneer.clone());
    assert!(agent.is_connected());
    let session = manager.session_of("fridge").unwrap();
    assert_eq!(session.agent_id(), "fridge");
    assert_eq!(session.matcher_id(), "auctioneer");
    assert_eq!(auctioneer.session_count(), 1);
}

#[test]
fn test_duplicate_agent_id_is_ignored() {
    let manager = SessionManager::new();
    manager.add_matcher_endpoint(auctioneer());
    let first = Arc::new(DeviceAgent::new("fridge", "auctioneer"));
    let second = Arc::new(DeviceAgent::new("fridge", "auctioneer"));
    manager.add_agent_endpoint(first.clone());
    manager.add_agent_endpoint(second.clone());

    assert_eq!(manager.agent_count(), 1);
    assert!(first.is_connected());
    assert!(!second.is_connected());

    // 以另一实例注销同一 id 无效
    let stranger: Arc<dyn AgentEndpoint> = second;
    manager.remove_agent_endpoint(&stranger);
    assert!(first.is_connected());
}

#[test]
fn test_removing_agent_withdraws_its_bid() {
    let manager = SessionManager::new();
    let auctioneer = auctioneer();
    manager.add_matcher_endpoint(auctioneer.clone());
    let agent = Arc::new(DeviceAgent::new("heater", "auctioneer"));
    manager.add_agent_endpoint(agent.clone());

    agent
        .publish_bid(Bid::flat(auctioneer.market_basis(), 4.0).unwrap())
        .unwrap();
    assert_eq!(auctioneer.bid_cache().len(), 1);
    assert_eq!(auctioneer.publish_new_price().value(), 10.0);

    let endpoint: Arc<dyn AgentEndpoint> = agent.clone();
    manager.remove_agent_endpoint(&endpoint);
    assert!(!agent.is_connected());
    assert_eq!(auctioneer.bid_cache().len(), 0);
    assert_eq!(manager.active_session_count(), 0);
    assert_eq!(auctioneer.publish_new_price().value(), 0.0);
}

#[test]
fn test_matcher_removal_and_return() {
    let manager = SessionManager::new();
    let auctioneer = auctioneer();
    let concentrator = Arc::new(Concentrator::new(ConcentratorConfig::default()).unwrap());
    manager.add_matcher_endpoint(auctioneer.clone());
    manager.add_matcher_endpoint(concentrator.clone());
    manager.add_agent_endpoint(concentrator.clone());
    let leaf = Arc::new(DeviceAgent::new("boiler", "concentrator"));
    manager.add_agent_endpoint(leaf.clone());
    assert_eq!(manager.active_session_count(), 2);

    // 移除拍卖器：集中器失去上游，其子会话也随之断开
    let root: Arc<dyn MatcherEndpoint> = auctioneer.clone();
    manager.remove_matcher_endpoint(&root);
    assert!(concentrator.upstream_session().is_none());
    assert_eq!(concentrator.child_count(), 0);
    assert!(!leaf.is_connected());
    assert_eq!(manager.active_session_count(), 0);

    // 重新注册后会话恢复
    let auctioneer = self::auctioneer();
    manager.add_matcher_endpoint(auctioneer.clone());
    assert!(concentrator.upstream_session().is_some());
    assert!(leaf.is_connected());
    assert_eq!(manager.active_session_count(), 2);
    assert_eq!(leaf.last_bid_number(), 0);

    leaf.publish_bid(Bid::flat(auctioneer.market_basis(), -1.0).unwrap())
        .unwrap();
    concentrator.do_bid_update().unwrap();
    assert_eq!(auctioneer.publish_new_price().value(), 0.0);
    assert_eq!(leaf.last_price().unwrap().bid_number(), 1);
}

#[test]
fn test_agent_disconnect_is_idempotent() {
    let manager = SessionManager::new();
    let auctioneer = auctioneer();
    manager.add_matcher_endpoint(auctioneer.clone());
    let agent = Arc::new(DeviceAgent::new("pv", "auctioneer"));
    manager.add_agent_endpoint(agent.clone());

    let session = agent.session().unwrap();
    session.disconnect();
    session.disconnect();
    assert!(!session.is_connected());
    assert_eq!(auctioneer.session_count(), 0);
    assert!(agent
        .publish_bid(Bid::flat(auctioneer.market_basis(), 1.0).unwrap())
        .is_err());

    // 下一轮匹配为仍在等待的代理建立新会话
    manager.refresh();
    assert!(agent.is_connected());
    assert_ne!(agent.session().unwrap().session_id(), session.session_id());
}
