// src/model/host.rs

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::AgentId;

/// A resolved host participating in a task instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub agent_id: AgentId,
    /// Numeric host id. May be missing while host resolution is in flight.
    #[serde(default)]
    pub host_id: Option<i64>,
    /// Cloud ip, e.g. `0:10.0.0.1`.
    pub ip: String,
    /// Ip shown to users.
    #[serde(default)]
    pub display_ip: Option<String>,
}

impl HostInfo {
    /// Placeholder for an agent the directory has never heard of.
    pub fn unresolved(agent_id: &AgentId) -> Self {
        Self {
            agent_id: agent_id.clone(),
            host_id: None,
            ip: agent_id.as_str().to_string(),
            display_ip: None,
        }
    }

    pub fn display_ip(&self) -> &str {
        self.display_ip.as_deref().unwrap_or(&self.ip)
    }
}

/// Agent id -> host lookup for one task instance.
#[derive(Debug, Clone, Default)]
pub struct HostDirectory {
    hosts: HashMap<AgentId, HostInfo>,
}

impl HostDirectory {
    pub fn new<'a>(hosts: impl IntoIterator<Item = &'a HostInfo>) -> Self {
        let hosts = hosts
            .into_iter()
            .map(|h| (h.agent_id.clone(), h.clone()))
            .collect();
        Self { hosts }
    }

    /// Resolve an agent, falling back to an ip-only host.
    pub fn resolve(&self, agent_id: &AgentId) -> HostInfo {
        self.hosts
            .get(agent_id)
            .cloned()
            .unwrap_or_else(|| HostInfo::unresolved(agent_id))
    }
}
