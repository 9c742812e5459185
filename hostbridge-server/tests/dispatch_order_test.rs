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

// Ordering and capping of host-thread execution under concurrent submitters.

use hostbridge_core::{handler_fn, ToolCall, ToolResult};
use hostbridge_server::config::BridgeConfig;
use hostbridge_server::dispatch::{HostThread, NoopTick, TickSignal};
use hostbridge_server::HostBridge;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

const SUBMITTERS: usize = 8;
const CALLS_EACH: usize = 25;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submitters_execute_in_enqueue_order() {
    let mut config = BridgeConfig::default();
    config.dispatch.max_calls_per_tick = 4;
    let signal = Arc::new(TickSignal::new());
    let bridge = HostBridge::new(config, signal.clone());
    let host = HostThread::spawn(Arc::clone(bridge.queue()), signal, Duration::from_millis(2))
        .expect("spawn host thread");

    let executed = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&executed);
    bridge
        .orchestrator()
        .register_tool(
            "record_call",
            "Record execution order",
            handler_fn(move |ctx, args| {
                log.lock().push(ctx.call_id);
                Ok(ToolResult::json(json!({ "callId": ctx.call_id, "echo": args["seq"] })))
            }),
        )
        .unwrap();

    let mut tasks = Vec::new();
    for submitter in 0..SUBMITTERS {
        let orchestrator = Arc::clone(bridge.orchestrator());
        tasks.push(tokio::spawn(async move {
            let mut seen = Vec::new();
            for seq in 0..CALLS_EACH {
                let response = orchestrator
                    .execute_tool(ToolCall::new(
                        "record_call",
                        json!({ "submitter": submitter, "seq": seq }),
                    ))
                    .await
                    .unwrap();
                let payload = response.result.payload();
                assert_eq!(payload["echo"], seq);
                seen.push(payload["callId"].as_u64().unwrap());
            }
            seen
        }));
    }

    for task in tasks {
        let seen = task.await.unwrap();
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    let executed = executed.lock().clone();
    assert_eq!(executed.len(), SUBMITTERS * CALLS_EACH);
    assert!(
        executed.windows(2).all(|w| w[0] < w[1]),
        "host thread must run calls in id order"
    );

    let stats = bridge.queue().stats();
    assert_eq!(stats.executed, (SUBMITTERS * CALLS_EACH) as u64);
    assert_eq!(stats.queue_depth, 0);

    bridge.queue().close();
    host.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tick_respects_cap() {
    let mut config = BridgeConfig::default();
    config.dispatch.max_calls_per_tick = 4;
    let bridge = HostBridge::new(config, Arc::new(NoopTick));
    bridge
        .orchestrator()
        .register_tool("noop", "", handler_fn(|_ctx, _args| Ok(ToolResult::text("ok"))))
        .unwrap();

    let mut waiters = Vec::new();
    for _ in 0..10 {
        let orchestrator = Arc::clone(bridge.orchestrator());
        waiters.push(tokio::spawn(async move {
            orchestrator.execute_tool(ToolCall::new("noop", json!({}))).await
        }));
    }

    let started = Instant::now();
    while bridge.queue().len() < 10 && started.elapsed() < Duration::from_secs(3) {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert_eq!(bridge.queue().len(), 10);

    // Dedicated thread stands in for the host.
    let queue = Arc::clone(bridge.queue());
    let reports = std::thread::spawn(move || {
        let mut reports = Vec::new();
        while !queue.is_empty() {
            reports.push(queue.drain_tick().unwrap());
        }
        reports
    })
    .join()
    .unwrap();

    let executed: Vec<_> = reports.iter().map(|r| r.executed).collect();
    assert_eq!(executed, vec![4, 4, 2]);
    assert_eq!(reports[0].remaining, 6);

    for waiter in waiters {
        assert!(waiter.await.unwrap().is_ok());
    }
}
