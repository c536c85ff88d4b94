use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use terminalwon_config::ConfigManager;
use terminalwon_llm_api::LlmClient;
use terminalwon_types::{AgentKind, TimelineEvent};

use crate::terminal_agent::{
    TerminalAgent, TerminalAgentOptions, TerminalAgentStatus, TerminalContext,
};

/// One terminal agent per live terminal.
///
/// `attach` is idempotent and `detach` destroys the agent, so each agent is
/// destroyed exactly once however often the terminal is reported closed.
pub struct AgentPool {
    agents: Mutex<HashMap<String, TerminalAgent>>,
    client: Arc<dyn LlmClient>,
    config: Arc<ConfigManager>,
    events: UnboundedSender<TimelineEvent>,
    options: TerminalAgentOptions,
}

impl AgentPool {
    pub fn new(
        client: Arc<dyn LlmClient>,
        config: Arc<ConfigManager>,
        events: UnboundedSender<TimelineEvent>,
    ) -> Self {
        Self {
            agents: Mutex::new(HashMap::new()),
            client,
            config,
            events,
            options: TerminalAgentOptions::default(),
        }
    }

    pub fn with_options(mut self, options: TerminalAgentOptions) -> Self {
        self.options = options;
        self
    }

    /// Agent for a terminal, created on first use
    pub fn attach(&self, terminal_id: &str, context: TerminalContext) -> TerminalAgent {
        let mut agents = self.agents.lock();
        if let Some(agent) = agents.get(terminal_id) {
            return agent.clone();
        }

        let config = self.config.agent_config(AgentKind::Terminal);
        let agent = TerminalAgent::with_options(
            terminal_id,
            context,
            &config,
            self.client.clone(),
            self.events.clone(),
            self.options,
        );
        agents.insert(terminal_id.to_string(), agent.clone());
        agent
    }

    pub fn get(&self, terminal_id: &str) -> Option<TerminalAgent> {
        self.agents.lock().get(terminal_id).cloned()
    }

    /// Remove and destroy a terminal's agent. False if there was none.
    pub fn detach(&self, terminal_id: &str) -> bool {
        let removed = self.agents.lock().remove(terminal_id);
        match removed {
            Some(agent) => {
                agent.destroy();
                true
            }
            None => {
                debug!("No agent to detach for {}", terminal_id);
                false
            }
        }
    }

    pub fn statuses(&self) -> Vec<TerminalAgentStatus> {
        let mut statuses: Vec<_> = self.agents.lock().values().map(TerminalAgent::status).collect();
        statuses.sort_by(|a, b| a.terminal_id.cmp(&b.terminal_id));
        statuses
    }

    pub fn len(&self) -> usize {
        self.agents.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shutdown(&self) {
        let agents: Vec<TerminalAgent> = self.agents.lock().drain().map(|(_, a)| a).collect();
        for agent in agents {
            agent.destroy();
        }
    }
}
