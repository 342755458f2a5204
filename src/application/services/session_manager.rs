/// Session Manager - Endpoint Registry and Matching Pass
///
/// Keeps every registered agent and matcher and pairs each agent with the
/// matcher named by its `desired_parent_id`. At most one session exists per
/// agent; a session lives until either side leaves the registry or it is
/// disconnected explicitly.
///
/// ## Matching Pass
/// Every registry change runs a pass that repeats until a sweep creates no
/// new session, so a concentrator connected to its parent during a sweep is
/// offered its own waiting children in the same call. For one pairing the
/// matcher is asked first (and may refuse), then the agent.
///
/// ## Concurrency
/// All registry operations run under one mutex. Endpoint callbacks never
/// call back into the manager, so holding the mutex across them is safe.

use crate::application::endpoints::{AgentEndpoint, MatcherEndpoint};
use crate::application::session::Session;
use crate::shared::metrics::METRICS;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Default)]
struct Registry {
    agents: BTreeMap<String, Arc<dyn AgentEndpoint>>,
    matchers: BTreeMap<String, Arc<dyn MatcherEndpoint>>,
    /// agentId -> session
    sessions: BTreeMap<String, Arc<Session>>,
}

impl Registry {
    fn prune_disconnected(&mut self) {
        self.sessions.retain(|_, session| session.is_connected());
    }

    /// One sweep over the waiting agents; returns how many sessions were made
    fn sweep(&mut self) -> usize {
        let waiting: Vec<Arc<dyn AgentEndpoint>> = self
            .agents
            .iter()
            .filter(|(agent_id, _)| !self.sessions.contains_key(*agent_id))
            .map(|(_, agent)| agent.clone())
            .collect();

        let mut created = 0;
        for agent in waiting {
            let agent_id = agent.agent_id().to_string();
            let parent_id = agent.desired_parent_id();
            if parent_id == agent_id {
                continue;
            }
            let Some(matcher) = self.matchers.get(parent_id).cloned() else {
                continue;
            };

            let session = Session::new(&agent, &matcher);
            if let Err(e) = matcher.connect_to_agent(session.clone()) {
                debug!(session_id = %session.session_id(), "匹配方拒绝连接: {}", e);
                session.abandon();
                continue;
            }
            if let Err(e) = agent.connect_to_matcher(session.clone()) {
                warn!(session_id = %session.session_id(), "代理连接失败: {}", e);
                session.disconnect();
                continue;
            }

            info!(session_id = %session.session_id(), "会话建立");
            self.sessions.insert(agent_id, session);
            created += 1;
        }
        created
    }

    fn run_matching_pass(&mut self) {
        loop {
            self.prune_disconnected();
            if self.sweep() == 0 {
                break;
            }
        }
        METRICS
            .active_sessions
            .with_label_values(&["session_manager"])
            .set(self.sessions.len() as f64);
    }
}

#[derive(Default)]
pub struct SessionManager {
    registry: Mutex<Registry>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_agent_endpoint(&self, agent: Arc<dyn AgentEndpoint>) {
        let mut registry = self.registry.lock();
        let agent_id = agent.agent_id().to_string();
        if registry.agents.contains_key(&agent_id) {
            warn!(agent_id = %agent_id, "代理 id 已注册，忽略");
            return;
        }
        debug!(agent_id = %agent_id, parent = %agent.desired_parent_id(), "注册代理");
        registry.agents.insert(agent_id, agent);
        registry.run_matching_pass();
    }

    /// Removes the agent and tears down its session; unknown agents are ignored
    pub fn remove_agent_endpoint(&self, agent: &Arc<dyn AgentEndpoint>) {
        let mut registry = self.registry.lock();
        let agent_id = agent.agent_id().to_string();
        let registered = registry
            .agents
            .get(&agent_id)
            .is_some_and(|a| std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(agent)));
        if !registered {
            return;
        }
        registry.agents.remove(&agent_id);
        if let Some(session) = registry.sessions.remove(&agent_id) {
            session.disconnect();
        }
        debug!(agent_id = %agent_id, "注销代理");
        registry.run_matching_pass();
    }

    pub fn add_matcher_endpoint(&self, matcher: Arc<dyn MatcherEndpoint>) {
        let mut registry = self.registry.lock();
        let matcher_id = matcher.matcher_id().to_string();
        if registry.matchers.contains_key(&matcher_id) {
            warn!(matcher_id = %matcher_id, "匹配方 id 已注册，忽略");
            return;
        }
        debug!(matcher_id = %matcher_id, "注册匹配方");
        registry.matchers.insert(matcher_id, matcher);
        registry.run_matching_pass();
    }

    /// Removes the matcher and tears down every session to its children
    pub fn remove_matcher_endpoint(&self, matcher: &Arc<dyn MatcherEndpoint>) {
        let mut registry = self.registry.lock();
        let matcher_id = matcher.matcher_id().to_string();
        let registered = registry
            .matchers
            .get(&matcher_id)
            .is_some_and(|m| std::ptr::addr_eq(Arc::as_ptr(m), Arc::as_ptr(matcher)));
        if !registered {
            return;
        }
        registry.matchers.remove(&matcher_id);

        let children: Vec<String> = registry
            .sessions
            .iter()
            .filter(|(_, s)| s.matcher_id() == matcher_id)
            .map(|(agent_id, _)| agent_id.clone())
            .collect();
        for agent_id in children {
            if let Some(session) = registry.sessions.remove(&agent_id) {
                session.disconnect();
            }
        }
        debug!(matcher_id = %matcher_id, "注销匹配方");
        registry.run_matching_pass();
    }

    /// Re-runs the matching pass, e.g. after a session was dropped from outside
    pub fn refresh(&self) {
        self.registry.lock().run_matching_pass();
    }

    pub fn session_of(&self, agent_id: &str) -> Option<Arc<Session>> {
        self.registry
            .lock()
            .sessions
            .get(agent_id)
            .filter(|s| s.is_connected())
            .cloned()
    }

    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.registry
            .lock()
            .sessions
            .values()
            .filter(|s| s.is_connected())
            .cloned()
            .collect()
    }

    pub fn active_session_count(&self) -> usize {
        self.registry
            .lock()
            .sessions
            .values()
            .filter(|s| s.is_connected())
            .count()
    }

    pub fn agent_count(&self) -> usize {
        self.registry.lock().agents.len()
    }

    pub fn matcher_count(&self) -> usize {
        self.registry.lock().matchers.len()
    }
}
