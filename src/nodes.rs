// src/nodes.rs
//
// =============================================================================
// GRIDMASTER: NODE SUPERVISOR
// =============================================================================
//
// Worker node lifecycle: register, heartbeat, time out, remove.
//
// Liveness is entirely heartbeat-driven. A worker that stops reporting is
// flipped to OFFLINE by the timeout sweep the scheduler runs every tick;
// a heartbeat from an OFFLINE node heals it back to ONLINE. A heartbeat
// from an id the master has never seen is refused, which tells the worker
// to re-register.

use crate::core::{
    HeartbeatRequest, HeartbeatResponse, Node, NodeRegister, NodeStatus,
};
use crate::error::{MasterError, MasterResult};
use crate::store::{ClusterStore, NodePatch};

use chrono::{Duration, Utc};
use std::sync::Arc;

pub struct NodeSupervisor {
    store: Arc<ClusterStore>,
    node_timeout: Duration,
}

impl NodeSupervisor {
    pub fn new(store: Arc<ClusterStore>, node_timeout: Duration) -> Self {
        Self {
            store,
            node_timeout,
        }
    }

    /// Register a worker node. The returned record is ONLINE by
    /// construction; re-registration keeps the existing id.
    pub fn register(&self, reg: NodeRegister) -> MasterResult<Node> {
        if reg.hostname.is_empty() {
            return Err(MasterError::Validation("hostname must not be empty".into()));
        }
        if reg.ip_address.is_empty() {
            return Err(MasterError::Validation(
                "ip_address must not be empty".into(),
            ));
        }
        Ok(self.store.register_node(reg))
    }

    /// Process a worker heartbeat.
    ///
    /// Refreshes liveness and the resource snapshot, and reconciles the
    /// node's job list with the worker's view (recent scheduler
    /// assignments the worker has not seen yet survive the overwrite).
    pub fn heartbeat(&self, req: &HeartbeatRequest) -> HeartbeatResponse {
        let Some(node) = self.store.get_node(&req.worker_id) else {
            log::warn!("Heartbeat from unknown worker {}", req.worker_id);
            return HeartbeatResponse::nack();
        };

        self.store.merge_reported_jobs(&req.worker_id, &req.active_jobs);
        self.store.update_node(
            &req.worker_id,
            NodePatch {
                status: Some(NodeStatus::Online),
                resources: Some(req.resources.clone()),
                last_heartbeat: Some(Some(Utc::now())),
                ..NodePatch::default()
            },
        );
        log::debug!("Heartbeat from {} ({})", node.hostname, req.worker_id);

        HeartbeatResponse::ack()
    }

    /// Flip ONLINE nodes whose last heartbeat is older than the timeout
    /// to OFFLINE. Returns the ids that were transitioned.
    ///
    /// A node that has never heartbeated (null `last_heartbeat`) is
    /// exempt: the registration-to-first-heartbeat grace is unbounded.
    /// Jobs assigned to a timed-out node are left untouched.
    pub fn check_timeouts(&self) -> Vec<String> {
        let now = Utc::now();
        let mut timed_out = Vec::new();

        for node in self.store.list_nodes(Some(NodeStatus::Online)) {
            let Some(last) = node.last_heartbeat else {
                continue;
            };
            if now - last > self.node_timeout {
                self.store.update_node(
                    &node.id,
                    NodePatch {
                        status: Some(NodeStatus::Offline),
                        ..NodePatch::default()
                    },
                );
                log::warn!("Node {} ({}) timed out", node.id, node.hostname);
                timed_out.push(node.id);
            }
        }
        timed_out
    }

    pub fn get(&self, node_id: &str) -> Option<Node> {
        self.store.get_node(node_id)
    }

    pub fn list(&self, status: Option<NodeStatus>) -> Vec<Node> {
        self.store.list_nodes(status)
    }

    pub fn remove(&self, node_id: &str) -> bool {
        let removed = self.store.remove_node(node_id);
        if removed {
            log::info!("Unregistered node {}", node_id);
        }
        removed
    }
}
