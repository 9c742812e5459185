// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

// MCP sessions over an in-process transport, under supervision.

use hostbridge_core::{handler_fn, ToolResult};
use hostbridge_server::builtin_tools::register_builtin_tools;
use hostbridge_server::config::BridgeConfig;
use hostbridge_server::dispatch::{HostThread, TickSignal};
use hostbridge_server::mcp::{ChannelClient, ChannelTransport, McpTransport, TransportFactory};
use hostbridge_server::supervisor::{Supervisor, SupervisorPhase};
use hostbridge_server::HostBridge;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Hands out pre-made transports, one per launch.
fn queued_factory(transports: Vec<ChannelTransport>) -> TransportFactory {
    let pending = Arc::new(Mutex::new(transports));
    Arc::new(move || {
        let mut pending = pending.lock();
        if pending.is_empty() {
            anyhow::bail!("no transport available");
        }
        Ok(Box::new(pending.remove(0)) as Box<dyn McpTransport>)
    })
}

async fn next_response(client: &mut ChannelClient) -> Value {
    tokio::time::timeout(RESPONSE_TIMEOUT, client.recv_value())
        .await
        .expect("response in time")
        .expect("server still connected")
}

async fn request(client: &mut ChannelClient, id: i64, method: &str, params: Value) -> Value {
    client
        .send_value(&json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }))
        .await
        .unwrap();
    next_response(client).await
}

struct Session {
    bridge: HostBridge,
    host: Option<HostThread>,
}

impl Session {
    fn new(config: BridgeConfig) -> Self {
        let signal = Arc::new(TickSignal::new());
        let bridge = HostBridge::new(config, signal.clone());
        let host = HostThread::spawn(Arc::clone(bridge.queue()), signal, Duration::from_millis(5))
            .expect("spawn host thread");
        register_builtin_tools(bridge.orchestrator()).unwrap();
        Self {
            bridge,
            host: Some(host),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.bridge.queue().close();
        if let Some(host) = self.host.take() {
            host.shutdown();
        }
    }
}

#[tokio::test]
async fn test_mcp_session_roundtrip() {
    let session = Session::new(BridgeConfig::default());
    let (transport, mut client) = ChannelTransport::pair(16);
    let serving = Arc::new(session.bridge.serving_loop(queued_factory(vec![transport])));
    let supervisor = Supervisor::new(serving, session.bridge.config().supervisor.clone());
    supervisor.start().await.unwrap();

    let init = request(&mut client, 1, "initialize", json!({})).await;
    assert_eq!(init["id"], 1);
    assert_eq!(init["result"]["protocolVersion"], "2024-11-05");
    assert_eq!(init["result"]["serverInfo"]["name"], "hostbridge");

    // Notifications get no response; the next message answers the ping.
    client
        .send_value(&json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }))
        .await
        .unwrap();
    let pong = request(&mut client, 2, "ping", json!({})).await;
    assert_eq!(pong["id"], 2);
    assert_eq!(pong["result"], json!({}));

    let tools = request(&mut client, 3, "tools/list", json!({})).await;
    let names: Vec<_> = tools["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap().to_string())
        .collect();
    assert!(names.contains(&"ping".to_string()));
    assert!(names.contains(&"bridge_stats".to_string()));

    let called = request(
        &mut client,
        4,
        "tools/call",
        json!({ "name": "ping", "arguments": {} }),
    )
    .await;
    assert_eq!(called["result"]["isError"], false);
    assert_eq!(called["result"]["structuredContent"]["message"], "pong");
    assert!(called["result"]["_meta"]["etag"].as_str().unwrap().starts_with('"'));

    let missing = request(
        &mut client,
        5,
        "tools/call",
        json!({ "name": "nonexistent_tool", "arguments": {} }),
    )
    .await;
    assert_eq!(missing["result"]["isError"], true);
    assert_eq!(
        missing["result"]["content"][0]["text"],
        "Tool not found: nonexistent_tool"
    );

    let unknown = request(&mut client, 6, "prompts/list", json!({})).await;
    assert_eq!(unknown["error"]["code"], -32601);

    let bad_params = request(&mut client, 7, "tools/call", json!({ "arguments": {} })).await;
    assert_eq!(bad_params["error"]["code"], -32602);

    let no_resource = request(
        &mut client,
        8,
        "resources/read",
        json!({ "uri": "host://missing" }),
    )
    .await;
    assert_eq!(no_resource["error"]["code"], -32002);

    client.send_line("{not json").await.unwrap();
    let parse_error = tokio::time::timeout(RESPONSE_TIMEOUT, client.recv_value())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(parse_error["error"]["code"], -32700);
    assert_eq!(parse_error["id"], Value::Null);

    supervisor.shutdown().await;
    assert_eq!(supervisor.phase(), SupervisorPhase::Stopped);
}

#[tokio::test]
async fn test_key_order_does_not_defeat_cache() {
    let session = Session::new(BridgeConfig::default());
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    session
        .bridge
        .orchestrator()
        .register_tool(
            "get_settings",
            "Read editor settings",
            handler_fn(move |_ctx, args| {
                counter.fetch_add(1, Ordering::SeqCst);
                let sum = args["a"].as_i64().unwrap_or(0) + args["b"].as_i64().unwrap_or(0);
                Ok(ToolResult::json(json!({ "sum": sum })))
            }),
        )
        .unwrap();

    let (transport, mut client) = ChannelTransport::pair(16);
    let serving = Arc::new(session.bridge.serving_loop(queued_factory(vec![transport])));
    let supervisor = Supervisor::new(serving, session.bridge.config().supervisor.clone());
    supervisor.start().await.unwrap();

    // Raw lines, so the argument key order on the wire is exactly as written
    client
        .send_line(r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"get_settings","arguments":{"b":1,"a":2}}}"#)
        .await
        .unwrap();
    let first = next_response(&mut client).await;
    assert_eq!(first["id"], 1);
    assert_eq!(first["result"]["_meta"]["cacheHit"], false);
    assert_eq!(first["result"]["structuredContent"]["sum"], 3);

    client
        .send_line(r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"get_settings","arguments":{"a":2,"b":1}}}"#)
        .await
        .unwrap();
    let second = next_response(&mut client).await;
    assert_eq!(second["id"], 2);
    assert_eq!(second["result"]["_meta"]["cacheHit"], true);
    assert_eq!(second["result"]["_meta"]["etag"], first["result"]["_meta"]["etag"]);
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_transport_loss_triggers_restart() {
    let mut config = BridgeConfig::default();
    config.supervisor.restart_delay_ms = 10;
    let session = Session::new(config);

    let (first, first_client) = ChannelTransport::pair(16);
    let (second, mut second_client) = ChannelTransport::pair(16);
    let serving = Arc::new(session.bridge.serving_loop(queued_factory(vec![first, second])));
    let supervisor = Supervisor::new(serving, session.bridge.config().supervisor.clone());
    supervisor.start().await.unwrap();

    drop(first_client);

    let pong = request(&mut second_client, 1, "ping", json!({})).await;
    assert_eq!(pong["id"], 1);

    let status = supervisor.status().await;
    assert_eq!(status.phase, SupervisorPhase::Running);
    assert_eq!(status.total_restarts, 1);
    assert_eq!(status.restart_attempts_in_window, 1);

    supervisor.shutdown().await;
}
