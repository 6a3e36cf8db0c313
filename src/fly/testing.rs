//! Scripted Machines API used by unit tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::machines::{HttpReply, MachineApi, MachineApiError};
use super::types::{CreateMachineRequest, InstanceState};

type Scripted = Result<(u16, serde_json::Value), String>;

/// Builds a Machines API body for a machine in the given state.
pub fn machine_body(id: &str, state: InstanceState) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "name": "web",
        "state": state.to_string(),
        "region": "ord",
        "instance_id": "01H",
        "private_ip": "fdaa::3",
        "config": {
            "image": "nginx:latest",
            "guest": { "cpu_kind": "shared", "cpus": 1, "memory_mb": 256 }
        },
        "created_at": "2024-01-01T00:00:00Z"
    })
}

/// Machines API stub that replays scripted replies and records calls.
///
/// `get_machine` pops replies in order and keeps repeating the last one.
#[derive(Debug)]
pub struct ScriptedMachines {
    probe: Option<u16>,
    create: Scripted,
    gets: Mutex<VecDeque<Scripted>>,
    stop: Scripted,
    delete: Scripted,
    calls: Mutex<Vec<&'static str>>,
    created: Mutex<Vec<CreateMachineRequest>>,
}

impl ScriptedMachines {
    /// Stub with a reachable tunnel and successful create, stop and delete.
    pub fn new() -> Self {
        Self {
            probe: Some(404),
            create: Ok((200, machine_body("148e", InstanceState::Created))),
            gets: Mutex::new(VecDeque::new()),
            stop: Ok((200, serde_json::json!({ "ok": true }))),
            delete: Ok((200, serde_json::json!({ "ok": true }))),
            calls: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
        }
    }

    /// Status returned by the tunnel probe.
    pub fn with_probe_status(mut self, status: u16) -> Self {
        self.probe = Some(status);
        self
    }

    /// Makes the tunnel probe fail at the transport level.
    pub fn with_probe_unreachable(mut self) -> Self {
        self.probe = None;
        self
    }

    /// Reply to `create_machine`.
    pub fn with_create_reply(mut self, status: u16, body: serde_json::Value) -> Self {
        self.create = Ok((status, body));
        self
    }

    /// Queues one successful `get_machine` reply per state.
    pub fn with_states(self, id: &str, states: &[InstanceState]) -> Self {
        {
            let mut gets = self.gets.lock().expect("gets lock");
            for state in states {
                gets.push_back(Ok((200, machine_body(id, *state))));
            }
        }
        self
    }

    /// Queues a raw `get_machine` reply.
    pub fn with_get_reply(self, status: u16, body: serde_json::Value) -> Self {
        self.gets
            .lock()
            .expect("gets lock")
            .push_back(Ok((status, body)));
        self
    }

    /// Queues a transport failure for `get_machine`.
    pub fn with_get_error(self, message: &str) -> Self {
        self.gets
            .lock()
            .expect("gets lock")
            .push_back(Err(message.to_string()));
        self
    }

    /// Reply to `stop_machine`.
    pub fn with_stop_reply(mut self, status: u16, body: serde_json::Value) -> Self {
        self.stop = Ok((status, body));
        self
    }

    /// Reply to `delete_machine`.
    pub fn with_delete_reply(mut self, status: u16, body: serde_json::Value) -> Self {
        self.delete = Ok((status, body));
        self
    }

    /// Makes `delete_machine` fail at the transport level.
    pub fn with_delete_error(mut self, message: &str) -> Self {
        self.delete = Err(message.to_string());
        self
    }

    /// Number of calls made to the named operation.
    pub fn calls_to(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .filter(|c| **c == operation)
            .count()
    }

    /// Create requests received, in order.
    pub fn created_requests(&self) -> Vec<CreateMachineRequest> {
        self.created.lock().expect("created lock").clone()
    }

    fn record(&self, operation: &'static str) {
        self.calls.lock().expect("calls lock").push(operation);
    }

    fn reply(uri: &str, scripted: &Scripted) -> Result<HttpReply, MachineApiError> {
        match scripted {
            Ok((status, body)) => Ok(HttpReply {
                status: *status,
                uri: uri.to_string(),
                body: serde_json::to_vec(body).expect("serializable body"),
            }),
            Err(message) => Err(MachineApiError::new(message.clone())),
        }
    }
}

impl Default for ScriptedMachines {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MachineApi for ScriptedMachines {
    async fn probe(&self) -> Result<HttpReply, MachineApiError> {
        self.record("probe");
        match self.probe {
            Some(status) => Ok(HttpReply {
                status,
                uri: String::from("http://127.0.0.1:4280/bogus"),
                body: Vec::new(),
            }),
            None => Err(MachineApiError::new("connection refused")),
        }
    }

    async fn create_machine(
        &self,
        app: &str,
        request: &CreateMachineRequest,
    ) -> Result<HttpReply, MachineApiError> {
        self.record("create");
        self.created
            .lock()
            .expect("created lock")
            .push(request.clone());
        Self::reply(&format!("/v1/apps/{app}/machines"), &self.create)
    }

    async fn get_machine(&self, app: &str, id: &str) -> Result<HttpReply, MachineApiError> {
        self.record("get");
        let next = {
            let mut gets = self.gets.lock().expect("gets lock");
            if gets.len() > 1 {
                gets.pop_front()
            } else {
                gets.front().cloned()
            }
        };
        let scripted = next.unwrap_or_else(|| Ok((404, serde_json::json!({ "error": "not found" }))));
        Self::reply(&format!("/v1/apps/{app}/machines/{id}"), &scripted)
    }

    async fn stop_machine(&self, app: &str, id: &str) -> Result<HttpReply, MachineApiError> {
        self.record("stop");
        Self::reply(&format!("/v1/apps/{app}/machines/{id}/stop"), &self.stop)
    }

    async fn delete_machine(&self, app: &str, id: &str) -> Result<HttpReply, MachineApiError> {
        self.record("delete");
        Self::reply(&format!("/v1/apps/{app}/machines/{id}"), &self.delete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_replies_repeat_the_last_one() {
        let api = ScriptedMachines::new()
            .with_probe_status(200)
            .with_get_reply(503, serde_json::json!({ "error": "busy" }))
            .with_states("148e", &[InstanceState::Stopped])
            .with_delete_error("connection reset");

        assert_eq!(api.probe().await.expect("probe reply").status, 200);
        assert_eq!(api.get_machine("hello", "148e").await.expect("reply").status, 503);
        assert_eq!(api.get_machine("hello", "148e").await.expect("reply").status, 200);
        assert_eq!(api.get_machine("hello", "148e").await.expect("reply").status, 200);
        assert!(api.delete_machine("hello", "148e").await.is_err());
        assert_eq!(api.calls_to("get"), 3);
    }

    #[tokio::test]
    async fn test_unreachable_probe_is_a_transport_error() {
        let api = ScriptedMachines::new().with_probe_unreachable();

        assert!(api.probe().await.is_err());
    }
}
