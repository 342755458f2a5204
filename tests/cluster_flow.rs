use powermatcher::application::{
    Auctioneer, AuctioneerConfig, Concentrator, ConcentratorConfig, DeviceAgent, ManualScheduler,
    ObjectiveClearing, ObjectiveEndpoint, SessionManager,
};
use powermatcher::domain::{Bid, MarketBasis, Price};
use powermatcher::shared::SystemClock;
use parking_lot::Mutex;
use std::sync::Arc;

fn auctioneer_config() -> AuctioneerConfig {
    AuctioneerConfig {
        price_steps: 11,
        minimum_price: 0.0,
        maximum_price: 10.0,
        bid_timeout: 0,
        ..AuctioneerConfig::default()
    }
}

fn mb() -> MarketBasis {
    MarketBasis::new("electricity", "EUR", 11, 0.0, 10.0).unwrap()
}

fn curve(parts: &[(f64, usize)]) -> Bid {
    let demand = parts
        .iter()
        .flat_map(|&(value, count)| std::iter::repeat(value).take(count))
        .collect();
    Bid::new(&mb(), demand).unwrap()
}

fn agents(manager: &SessionManager, parent: &str, ids: &[&str]) -> Vec<Arc<DeviceAgent>> {
    ids.iter()
        .map(|id| {
            let agent = Arc::new(DeviceAgent::new(*id, parent));
            manager.add_agent_endpoint(agent.clone());
            agent
        })
        .collect()
}

#[test]
fn test_flat_cluster_equilibrium() {
    let manager = SessionManager::new();
    let auctioneer = Arc::new(Auctioneer::new(auctioneer_config()).unwrap());
    manager.add_matcher_endpoint(auctioneer.clone());
    let agents = agents(&manager, "auctioneer", &["a", "b", "c"]);

    agents[0].publish_bid(curve(&[(5.0, 11)])).unwrap();
    agents[1].publish_bid(curve(&[(4.0, 5), (0.0, 6)])).unwrap();
    agents[2].publish_bid(curve(&[(0.0, 5), (-5.0, 6)])).unwrap();
    assert_eq!(auctioneer.publish_new_price().value(), 5.0);

    agents[0].publish_bid(curve(&[(-5.0, 11)])).unwrap();
    agents[1].publish_bid(curve(&[(0.0, 7), (-4.0, 4)])).unwrap();
    agents[2].publish_bid(curve(&[(9.0, 11)])).unwrap();
    assert_eq!(auctioneer.publish_new_price().value(), 7.0);

    for agent in &agents {
        let update = agent.last_price().unwrap();
        assert_eq!(update.price().value(), 7.0);
        assert_eq!(update.bid_number(), 2);
    }
}

#[test]
fn test_boundary_prices() {
    let manager = SessionManager::new();
    let auctioneer = Arc::new(Auctioneer::new(auctioneer_config()).unwrap());
    manager.add_matcher_endpoint(auctioneer.clone());
    let agents = agents(&manager, "auctioneer", &["a"]);

    agents[0].publish_bid(Bid::flat(&mb(), 3.0).unwrap()).unwrap();
    assert_eq!(auctioneer.publish_new_price().value(), 10.0);

    agents[0].publish_bid(Bid::flat(&mb(), -3.0).unwrap()).unwrap();
    assert_eq!(auctioneer.publish_new_price().value(), 0.0);
}

#[test]
fn test_two_level_tree_relays_per_child_bid_numbers() {
    let manager = SessionManager::new();
    let auctioneer = Arc::new(Auctioneer::new(auctioneer_config()).unwrap());
    let concentrator = Arc::new(
        Concentrator::new(ConcentratorConfig {
            agent_id: "c1".into(),
            ..ConcentratorConfig::default()
        })
        .unwrap(),
    );

    // 代理先于父节点注册，父节点出现后会话才建立
    let leaves = agents(&manager, "c1", &["a", "b"]);
    let direct = agents(&manager, "auctioneer", &["d"]);
    manager.add_matcher_endpoint(concentrator.clone());
    assert_eq!(manager.active_session_count(), 0);
    manager.add_agent_endpoint(concentrator.clone());
    manager.add_matcher_endpoint(auctioneer.clone());
    assert_eq!(manager.active_session_count(), 4);

    leaves[0].publish_bid(curve(&[(5.0, 11)])).unwrap();
    leaves[0].publish_bid(curve(&[(5.0, 11)])).unwrap();
    leaves[0].publish_bid(curve(&[(-5.0, 11)])).unwrap();
    leaves[1].publish_bid(curve(&[(0.0, 7), (-4.0, 4)])).unwrap();
    direct[0].publish_bid(curve(&[(9.0, 11)])).unwrap();

    let forwarded = concentrator.do_bid_update().unwrap().unwrap();
    assert_eq!(forwarded.bid().demand(), curve(&[(-5.0, 7), (-9.0, 4)]).demand());

    assert_eq!(auctioneer.publish_new_price().value(), 7.0);

    // 相同的价格值，各自的出价号
    assert_eq!(leaves[0].last_price().unwrap().bid_number(), 2);
    assert_eq!(leaves[1].last_price().unwrap().bid_number(), 1);
    assert_eq!(direct[0].last_price().unwrap().bid_number(), 1);
    for agent in leaves.iter().chain(direct.iter()) {
        assert_eq!(agent.last_price().unwrap().price().value(), 7.0);
        assert_eq!(agent.stale_price_count(), 0);
    }
}

#[test]
fn test_scheduled_ticks_drive_the_tree() {
    let manager = SessionManager::new();
    let scheduler = ManualScheduler::new();
    let auctioneer = Arc::new(Auctioneer::new(auctioneer_config()).unwrap());
    let concentrator = Arc::new(Concentrator::new(ConcentratorConfig::default()).unwrap());
    manager.add_matcher_endpoint(auctioneer.clone());
    manager.add_matcher_endpoint(concentrator.clone());
    manager.add_agent_endpoint(concentrator.clone());
    let leaves = agents(&manager, "concentrator", &["a"]);

    concentrator.start(&scheduler);
    auctioneer.start(&scheduler);

    leaves[0].publish_bid(curve(&[(4.0, 3), (-1.0, 8)])).unwrap();
    // 第一轮：集中器转发，拍卖器出清
    scheduler.run_pending();
    assert_eq!(auctioneer.last_price().unwrap().value(), 3.0);
    assert_eq!(leaves[0].last_price().unwrap().price().value(), 3.0);

    auctioneer.stop();
    concentrator.stop();
    assert_eq!(scheduler.run_pending(), 0);
}

struct ShaveAbove {
    limit: f64,
    seen: Mutex<Vec<f64>>,
}

impl ObjectiveEndpoint for ShaveAbove {
    fn handle_aggregated_bid(&self, aggregated: &Bid) -> Option<Bid> {
        // 以平坦供给抵消超过上限的负荷
        let excess = aggregated.maximum_demand() - self.limit;
        if excess <= 0.0 {
            return None;
        }
        Bid::flat(aggregated.market_basis(), -excess).ok()
    }

    fn notify_price_update(&self, price: &Price) {
        self.seen.lock().push(price.value());
    }
}

#[test]
fn test_objective_agent_steers_the_price() {
    let policy = Arc::new(ObjectiveClearing::new());
    let auctioneer = Arc::new(
        Auctioneer::with_policy(auctioneer_config(), policy.clone(), Arc::new(SystemClock)).unwrap(),
    );
    let manager = SessionManager::new();
    manager.add_matcher_endpoint(auctioneer.clone());
    let leaves = agents(&manager, "auctioneer", &["a"]);
    leaves[0].publish_bid(curve(&[(5.0, 6), (0.0, 5)])).unwrap();

    assert_eq!(auctioneer.publish_new_price().value(), 6.0);

    let objective = Arc::new(ShaveAbove { limit: 0.0, seen: Mutex::new(Vec::new()) });
    policy.bind(objective.clone());
    assert_eq!(auctioneer.publish_new_price().value(), 0.0);
    assert_eq!(*objective.seen.lock(), vec![0.0]);

    policy.unbind();
    assert_eq!(auctioneer.publish_new_price().value(), 6.0);
    assert_eq!(objective.seen.lock().len(), 1);
}
