use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::{json, Value};
use starling::message::{error_codes, Request, ServerStatus, StatusUpdate, CHECKIN, CHECKOUT};
use starling::registry::ServiceRegistry;
use starling::{
    FnHealthCheck, HandlerTable, NodeClient, NodeError, NodeService, RequestOptions, ServiceDiscovery, TimeoutContext,
};
use tokio::time::Instant;

use test_helpers::{drain, wait_for, TestCluster, DEFAULT_WAIT_TIME, NAMESPACE};

/// Responder with one handler per behavior under test.
#[derive(Default)]
struct Echo {
    client: OnceLock<NodeClient>,
    recorded: Mutex<Vec<Value>>,
    broadcasts: Mutex<Vec<Value>>,
    lobby: Mutex<Vec<String>>,
    status_updates: AtomicUsize,
}

#[async_trait]
impl NodeService for Echo {
    fn handlers() -> HandlerTable<Self> {
        HandlerTable::new()
            .sync_body("ping", |_: &Self, _: String| Ok::<_, anyhow::Error>("pong"))
            .sync_body("null", |_: &Self, _: Value| Ok::<_, anyhow::Error>(Value::Null))
            .sync_body("empty_object", |_: &Self, _: Value| Ok::<_, anyhow::Error>(json!({})))
            .sync_body("empty_string", |_: &Self, _: Value| Ok::<_, anyhow::Error>(""))
            .sync_body("fail", |_: &Self, _: Value| Err::<Value, _>(anyhow!("kaboom")))
            .sync_body("panic", |_: &Self, _: Value| -> anyhow::Result<Value> { panic!("handler exploded") })
            .sync_body("record", |svc: &Self, body: Value| {
                svc.recorded.lock().unwrap().push(body);
                Ok::<_, anyhow::Error>(Value::Null)
            })
            .sync_body("add", |_: &Self, (a, b): (i64, i64)| Ok::<_, anyhow::Error>(a + b))
            .sync_request("whoami", |_: &Self, req: Request<Value>| {
                Ok::<_, anyhow::Error>(req.header.requester_address)
            })
            .async_body("slow", |_: Arc<Self>, ms: u64| async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok::<_, anyhow::Error>(ms)
            })
            .async_request("progress", |svc: Arc<Self>, req: Request<Vec<u64>>| async move {
                let client = svc.client.get().cloned().ok_or_else(|| anyhow!("client not attached"))?;
                for (step, ms) in req.body.iter().enumerate() {
                    tokio::time::sleep(Duration::from_millis(*ms)).await;
                    if step + 1 < req.body.len() {
                        client.send_status_update(&req.header, json!({ "step": step })).await?;
                    }
                }
                Ok::<_, anyhow::Error>("done")
            })
    }

    fn attach(&self, client: NodeClient) {
        let _ = self.client.set(client);
    }

    async fn on_broadcast(&self, request: Request<Value>) {
        self.broadcasts.lock().unwrap().push(request.body);
    }

    async fn on_lobby_message(&self, request: Request<Value>) {
        self.lobby.lock().unwrap().push(request.header.request_type);
    }

    async fn on_status_update(&self, _update: StatusUpdate) {
        self.status_updates.fetch_add(1, Ordering::SeqCst);
    }
}

async fn pair(cluster: &TestCluster) -> anyhow::Result<(starling::Node<Echo>, starling::Node<Echo>)> {
    let responder = cluster.spawn(cluster.config("echo", "b1"), Echo::default()).await?;
    let caller = cluster.spawn(cluster.config("caller", "a1"), Echo::default()).await?;
    Ok((caller, responder))
}

#[tokio::test]
async fn test_request_response_round_trip() -> anyhow::Result<()> {
    let cluster = TestCluster::new();
    let (caller, _responder) = pair(&cluster).await?;

    let response = caller
        .make_request(RequestOptions::new("echo", "ping", json!("ping")).request_id("req-1"))
        .await?;

    assert!(response.is_success());
    assert_eq!(response.body.data, json!("pong"));
    assert_eq!(response.request_id(), "req-1");
    assert_eq!(response.request_header.requester_address, "acme:caller:a1");
    assert_eq!(response.response_header.responder_address, "acme:echo:b1");
    assert_eq!(caller.client().pending_requests(), 0);
    Ok(())
}

#[tokio::test]
async fn test_typed_request_and_handler_shapes() -> anyhow::Result<()> {
    let cluster = TestCluster::new();
    let (caller, _responder) = pair(&cluster).await?;

    let sum: i64 = caller.request("echo", "add", &(2, 40)).await?;
    assert_eq!(sum, 42);

    let requester: String = caller.request("echo", "whoami", &Value::Null).await?;
    assert_eq!(requester, "acme:caller:a1");

    let slept: u64 = caller.request("echo", "slow", &20u64).await?;
    assert_eq!(slept, 20);
    Ok(())
}

#[tokio::test]
async fn test_qualified_address_bypasses_discovery() -> anyhow::Result<()> {
    let cluster = TestCluster::new();
    let (caller, responder) = pair(&cluster).await?;
    cluster.registry.deregister_service("echo", "b1").await?;

    let pong: String = caller.request(&responder.address().to_string(), "ping", &"ping").await?;
    assert_eq!(pong, "pong");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_request_times_out_without_responder() -> anyhow::Result<()> {
    let cluster = TestCluster::new();
    let config = cluster
        .config("caller", "a1")
        .with_request_callback_timeout(Duration::from_millis(1000));
    let caller = cluster.spawn(config, Echo::default()).await?;

    let start = Instant::now();
    let err = caller
        .make_request(RequestOptions::new("acme:ghost:x1", "ping", json!("ping")))
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    let message = err.to_string();
    assert!(message.contains("acme:ghost:x1"), "{message}");
    assert!(message.contains("1000ms"), "{message}");
    assert_eq!(start.elapsed(), Duration::from_millis(1000));
    assert_eq!(caller.client().pending_requests(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_custom_timeout_callback_replaces_error() -> anyhow::Result<()> {
    let cluster = TestCluster::new();
    let caller = cluster.spawn(cluster.config("caller", "a1"), Echo::default()).await?;

    let err = caller
        .make_request(
            RequestOptions::new("acme:ghost:x1", "ping", json!("ping"))
                .timeout(Duration::from_millis(250))
                .on_timeout(|ctx: TimeoutContext| {
                    NodeError::Other(anyhow!("gave up on {} after {:?}", ctx.target, ctx.elapsed))
                }),
        )
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "gave up on acme:ghost:x1 after 250ms");
    assert_eq!(caller.client().pending_requests(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_status_updates_slide_the_deadline() -> anyhow::Result<()> {
    let cluster = TestCluster::new();
    let (caller, _responder) = pair(&cluster).await?;

    let updates = Arc::new(AtomicUsize::new(0));
    let counter = updates.clone();
    let start = Instant::now();
    // Three 600ms steps, well past the 1000ms request timeout in total. The
    // first update arrives inside it and every later one keeps the request alive.
    let response = caller
        .make_request(
            RequestOptions::new("echo", "progress", json!([600, 600, 600]))
                .timeout(Duration::from_millis(1000))
                .on_status_update(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
        )
        .await?;

    assert_eq!(response.body.data, json!("done"));
    assert_eq!(start.elapsed(), Duration::from_millis(1800));
    assert_eq!(updates.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_status_update_restarts_the_node_timeout() -> anyhow::Result<()> {
    let cluster = TestCluster::new();
    let (caller, _responder) = pair(&cluster).await?;

    let start = Instant::now();
    // The 1000ms request timeout only covers the first silence. After the update
    // at 600ms the node's 30s callback timeout applies, so the 5000ms step fits.
    let response = caller
        .make_request(
            RequestOptions::new("echo", "progress", json!([600, 5000])).timeout(Duration::from_millis(1000)),
        )
        .await?;

    assert_eq!(response.body.data, json!("done"));
    assert_eq!(start.elapsed(), Duration::from_millis(5600));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_slid_deadline_expires_after_node_timeout() -> anyhow::Result<()> {
    let cluster = TestCluster::new();
    let _responder = cluster.spawn(cluster.config("echo", "b1"), Echo::default()).await?;
    let config = cluster
        .config("caller", "a1")
        .with_request_callback_timeout(Duration::from_millis(2000));
    let caller = cluster.spawn(config, Echo::default()).await?;

    let start = Instant::now();
    let err = caller
        .make_request(
            RequestOptions::new("echo", "progress", json!([600, 5000])).timeout(Duration::from_millis(1000)),
        )
        .await
        .unwrap_err();

    // 600ms until the update, then a fresh 2000ms node timeout.
    assert!(err.is_timeout());
    assert_eq!(start.elapsed(), Duration::from_millis(2600));
    assert!(err.to_string().contains("2600ms"));
    assert_eq!(caller.client().pending_requests(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_status_updates_default_to_service_hook() -> anyhow::Result<()> {
    let cluster = TestCluster::new();
    let (caller, _responder) = pair(&cluster).await?;

    caller
        .make_request(RequestOptions::new("echo", "progress", json!([100, 100, 100])))
        .await?;
    wait_for(1).await;

    assert_eq!(caller.service().status_updates.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn test_empty_reply_is_an_error_when_reply_expected() -> anyhow::Result<()> {
    let cluster = TestCluster::new();
    let (caller, _responder) = pair(&cluster).await?;

    for request_type in ["null", "empty_object"] {
        let err = caller
            .make_request(RequestOptions::new("echo", request_type, Value::Null))
            .await
            .unwrap_err();
        assert_eq!(err.remote_code(), Some(error_codes::EMPTY_RESPONSE), "{request_type}");
    }

    // Empty strings carry data and are delivered.
    let response = caller
        .make_request(RequestOptions::new("echo", "empty_string", Value::Null))
        .await?;
    assert_eq!(response.body.data, json!(""));
    Ok(())
}

#[tokio::test]
async fn test_handler_failures_become_failed_responses() -> anyhow::Result<()> {
    let cluster = TestCluster::new();
    let (caller, _responder) = pair(&cluster).await?;

    let err = caller
        .make_request(RequestOptions::new("echo", "no_such_type", Value::Null))
        .await
        .unwrap_err();
    assert_eq!(err.remote_code(), Some(error_codes::NO_HANDLER));

    let err = caller
        .make_request(RequestOptions::new("echo", "fail", Value::Null))
        .await
        .unwrap_err();
    assert_eq!(err.remote_code(), Some(error_codes::HANDLER_ERROR));
    assert!(err.to_string().contains("kaboom"));

    let err = caller
        .make_request(RequestOptions::new("echo", "add", json!("not a pair")))
        .await
        .unwrap_err();
    assert_eq!(err.remote_code(), Some(error_codes::INVALID_BODY));

    let err = caller
        .make_request(RequestOptions::new("echo", "panic", Value::Null))
        .await
        .unwrap_err();
    assert_eq!(err.remote_code(), Some(error_codes::HANDLER_PANIC));

    // The responder keeps serving after all of the above.
    let pong: String = caller.request("echo", "ping", &"ping").await?;
    assert_eq!(pong, "pong");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_reused_request_id_is_rejected_while_pending() -> anyhow::Result<()> {
    let cluster = TestCluster::new();
    let caller = Arc::new(cluster.spawn(cluster.config("caller", "a1"), Echo::default()).await?);
    let options = RequestOptions::new("acme:ghost:x1", "ping", Value::Null)
        .request_id("dup-1")
        .timeout(Duration::from_millis(1000));

    let first = {
        let caller = caller.clone();
        let options = options.clone();
        tokio::spawn(async move { caller.make_request(options).await })
    };
    wait_for(10).await;

    let err = caller.make_request(options).await.unwrap_err();
    assert!(matches!(err, NodeError::DuplicateRequest { ref request_id } if request_id == "dup-1"));
    assert_eq!(err.to_string(), "Request id dup-1 is already pending");

    // The first request keeps its own deadline instead of failing early.
    let first = first.await?.unwrap_err();
    assert!(first.is_timeout(), "{first}");
    assert_eq!(caller.client().pending_requests(), 0);
    Ok(())
}

#[tokio::test]
async fn test_placement_error_without_instances() -> anyhow::Result<()> {
    let cluster = TestCluster::new();
    let caller = cluster.spawn(cluster.config("caller", "a1"), Echo::default()).await?;

    let err = caller
        .make_request(RequestOptions::new("missing", "ping", Value::Null))
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::Placement { .. }));
    assert_eq!(err.to_string(), "No nodes available for service missing");

    let err = caller
        .send_one_way_message("ping", "missing", Value::Null, None)
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::Placement { .. }));
    Ok(())
}

#[tokio::test]
async fn test_publish_failure_cleans_up_pending_request() -> anyhow::Result<()> {
    let cluster = TestCluster::new();
    let _responder = cluster.spawn(cluster.config("echo", "b1"), Echo::default()).await?;
    let (caller, transport) = cluster
        .spawn_with_transport(cluster.config("caller", "a1"), Echo::default())
        .await?;

    transport.set_publish_failure(true);
    let err = caller
        .make_request(RequestOptions::new("echo", "ping", json!("ping")).request_id("r-fail"))
        .await
        .unwrap_err();

    assert!(matches!(err, NodeError::Transport { .. }));
    let message = err.to_string();
    assert!(message.contains("r-fail") && message.contains("acme:echo:b1"), "{message}");
    assert_eq!(caller.client().pending_requests(), 0);

    transport.set_publish_failure(false);
    let pong: String = caller.request("echo", "ping", &"ping").await?;
    assert_eq!(pong, "pong");
    Ok(())
}

#[tokio::test]
async fn test_one_way_message_gets_no_reply() -> anyhow::Result<()> {
    let cluster = TestCluster::new();
    let (caller, responder) = pair(&cluster).await?;
    let (_observer, mut replies) = cluster.observe(&caller.address().to_string()).await?;

    let request_id = caller
        .send_one_way_message("record", "echo", json!({"event": "signup"}), Some("one-way-1".into()))
        .await?;
    assert_eq!(request_id, "one-way-1");

    wait_for(DEFAULT_WAIT_TIME).await;
    assert_eq!(*responder.service().recorded.lock().unwrap(), vec![json!({"event": "signup"})]);
    // A null result would be an error if a reply were expected; here nothing is sent back at all.
    assert!(drain(&mut replies).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_inbound_messages_are_acknowledged() -> anyhow::Result<()> {
    let cluster = TestCluster::new();
    let (responder, transport) = cluster
        .spawn_with_transport(cluster.config("echo", "b1"), Echo::default())
        .await?;
    let caller = cluster.spawn(cluster.config("caller", "a1"), Echo::default()).await?;
    wait_for(DEFAULT_WAIT_TIME).await;
    let before = transport.acked_count();

    let _: String = caller.request("echo", "ping", &"ping").await?;
    wait_for(DEFAULT_WAIT_TIME).await;

    assert!(transport.acked_count() > before);
    drop(responder);
    Ok(())
}

#[tokio::test]
async fn test_checkin_and_single_checkout() -> anyhow::Result<()> {
    let cluster = TestCluster::new();
    let (_observer, mut lobby) = cluster.observe(&format!("{NAMESPACE}:lobby")).await?;

    let node = cluster.spawn(cluster.config("echo", "b1"), Echo::default()).await?;
    wait_for(DEFAULT_WAIT_TIME).await;

    let checkin = drain(&mut lobby);
    assert_eq!(checkin.len(), 1);
    assert_eq!(checkin[0]["header"]["requestType"], CHECKIN);
    assert!(checkin[0]["header"].get("recipientAddress").is_none());
    let status: ServerStatus = serde_json::from_value(checkin[0]["body"].clone())?;
    assert_eq!(status.address, "acme:echo:b1");
    assert_eq!(status.service_id, "echo");
    assert!(cluster.registry.is_service_online("echo").await?);

    node.stop().await?;
    node.stop().await?;
    wait_for(DEFAULT_WAIT_TIME).await;

    let checkout = drain(&mut lobby);
    assert_eq!(checkout.len(), 1);
    assert_eq!(checkout[0]["header"]["requestType"], CHECKOUT);
    assert!(!cluster.registry.is_service_online("echo").await?);
    assert!(node.is_stopped());
    Ok(())
}

#[tokio::test]
async fn test_stop_after_failed_initialize_still_checks_out() -> anyhow::Result<()> {
    let cluster = TestCluster::new();
    let (_observer, mut lobby) = cluster.observe(&format!("{NAMESPACE}:lobby")).await?;
    let (node, transport) = cluster.build(cluster.config("echo", "b1"), Echo::default())?;

    // Registration succeeds, the CHECKIN publish does not.
    transport.set_publish_failure(true);
    assert!(matches!(node.initialize().await, Err(NodeError::Transport { .. })));
    assert!(cluster.registry.is_service_online("echo").await?);

    transport.set_publish_failure(false);
    node.stop().await?;
    node.stop().await?;
    wait_for(DEFAULT_WAIT_TIME).await;

    let messages = drain(&mut lobby);
    let checkouts = messages
        .iter()
        .filter(|m| m["header"]["requestType"] == CHECKOUT)
        .count();
    assert_eq!(checkouts, 1);
    assert!(!cluster.registry.is_service_online("echo").await?);
    assert!(matches!(node.initialize().await, Err(NodeError::Stopped)));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_initialize_retry_resumes_after_failure() -> anyhow::Result<()> {
    let cluster = TestCluster::new();
    let (_observer, mut lobby) = cluster.observe(&format!("{NAMESPACE}:lobby")).await?;
    let config = cluster
        .config("echo", "b1")
        .with_status_update_interval(Duration::from_millis(500));
    let (node, transport) = cluster.build(config, Echo::default())?;

    transport.set_publish_failure(true);
    assert!(node.initialize().await.is_err());
    transport.set_publish_failure(false);
    node.initialize().await?;
    node.initialize().await?;
    wait_for(DEFAULT_WAIT_TIME).await;

    let checkins = drain(&mut lobby)
        .iter()
        .filter(|m| m["header"]["requestType"] == CHECKIN)
        .count();
    assert_eq!(checkins, 1);
    // Channels bound by the failed attempt are not bound twice.
    assert_eq!(cluster.broker.subscriber_count("acme:echo:b1"), 1);
    assert_eq!(cluster.broker.subscriber_count("acme:lobby"), 2);

    // The load reporter runs.
    cluster.registry.update_service_load("echo", "b1", 99).await?;
    wait_for(600).await;
    assert_eq!(cluster.registry.get_all_nodes("echo").await?[0].load, 0);
    Ok(())
}

#[tokio::test]
async fn test_lobby_announcements_reach_services() -> anyhow::Result<()> {
    let cluster = TestCluster::new();
    let watcher = cluster.spawn(cluster.config("watcher", "w1"), Echo::default()).await?;
    let node = cluster.spawn(cluster.config("echo", "b1"), Echo::default()).await?;
    node.stop().await?;
    wait_for(DEFAULT_WAIT_TIME).await;

    let lobby = watcher.service().lobby.lock().unwrap().clone();
    // The watcher's own CHECKIN, then the other node's CHECKIN and CHECKOUT.
    assert_eq!(lobby, vec![CHECKIN.to_string(), CHECKIN.to_string(), CHECKOUT.to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_stop_rejects_pending_requests() -> anyhow::Result<()> {
    let cluster = TestCluster::new();
    let caller = Arc::new(cluster.spawn(cluster.config("caller", "a1"), Echo::default()).await?);

    let waiting = {
        let caller = caller.clone();
        tokio::spawn(async move {
            caller
                .make_request(RequestOptions::new("acme:ghost:x1", "ping", Value::Null))
                .await
        })
    };
    wait_for(DEFAULT_WAIT_TIME).await;
    assert_eq!(caller.client().pending_requests(), 1);

    caller.stop().await?;
    assert!(matches!(waiting.await?, Err(NodeError::Stopped)));
    assert!(matches!(
        caller.make_request(RequestOptions::new("acme:ghost:x1", "ping", Value::Null)).await,
        Err(NodeError::Stopped)
    ));
    Ok(())
}

#[tokio::test]
async fn test_requests_go_to_least_loaded_instance() -> anyhow::Result<()> {
    let cluster = TestCluster::new();
    let _b1 = cluster.spawn(cluster.config("echo", "b1"), Echo::default()).await?;
    let _b2 = cluster.spawn(cluster.config("echo", "b2"), Echo::default()).await?;
    let caller = cluster.spawn(cluster.config("caller", "a1"), Echo::default()).await?;

    cluster.registry.update_service_load("echo", "b1", 5).await?;
    cluster.registry.update_service_load("echo", "b2", 1).await?;

    let response = caller.make_request(RequestOptions::new("echo", "ping", json!("ping"))).await?;
    assert_eq!(response.response_header.responder_address, "acme:echo:b2");
    Ok(())
}

#[tokio::test]
async fn test_unhealthy_instance_is_pruned_on_placement() -> anyhow::Result<()> {
    let cluster = TestCluster::new();
    let check = FnHealthCheck::new(|_: &str, node: &str| node != "b1");
    let discovery = ServiceDiscovery::new(cluster.registry.clone()).with_health_check(Arc::new(check));
    let cluster = cluster.with_discovery(discovery);

    let _b1 = cluster.spawn(cluster.config("echo", "b1"), Echo::default()).await?;
    let _b2 = cluster.spawn(cluster.config("echo", "b2"), Echo::default()).await?;
    let caller = cluster.spawn(cluster.config("caller", "a1"), Echo::default()).await?;

    let response = caller.make_request(RequestOptions::new("echo", "ping", json!("ping"))).await?;
    assert_eq!(response.response_header.responder_address, "acme:echo:b2");

    let nodes = cluster.registry.get_all_nodes("echo").await?;
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].node_id, "b2");
    Ok(())
}

#[tokio::test]
async fn test_broadcast_reaches_every_instance() -> anyhow::Result<()> {
    let cluster = TestCluster::new();
    let b1 = cluster.spawn(cluster.config("echo", "b1"), Echo::default()).await?;
    let b2 = cluster.spawn(cluster.config("echo", "b2"), Echo::default()).await?;
    let caller = cluster.spawn(cluster.config("caller", "a1"), Echo::default()).await?;

    caller.broadcast("echo", "cache.flush", json!({"key": "users"})).await?;
    wait_for(DEFAULT_WAIT_TIME).await;

    for node in [&b1, &b2] {
        assert_eq!(*node.service().broadcasts.lock().unwrap(), vec![json!({"key": "users"})]);
    }
    assert!(caller.service().broadcasts.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_load_reporter_publishes_queue_depth() -> anyhow::Result<()> {
    let cluster = TestCluster::new();
    let config = cluster
        .config("echo", "b1")
        .with_status_update_interval(Duration::from_millis(500));
    let _node = cluster.spawn(config, Echo::default()).await?;

    cluster.registry.update_service_load("echo", "b1", 99).await?;
    wait_for(600).await;

    let nodes = cluster.registry.get_all_nodes("echo").await?;
    assert_eq!(nodes[0].load, 0);
    Ok(())
}

#[tokio::test]
async fn test_server_status_snapshot() -> anyhow::Result<()> {
    let cluster = TestCluster::new();
    let node = cluster.spawn(cluster.config("echo", "b1"), Echo::default()).await?;

    let status = node.server_status();
    assert_eq!(status.address, "acme:echo:b1");
    assert_eq!(status.namespace, NAMESPACE);
    assert_eq!(status.instance_id, "b1");
    assert_eq!(status.queued_tasks, 0);
    assert_eq!(status.pending_requests, 0);
    assert_eq!(node.scheduler_stats().await?.running_tasks, 0);
    Ok(())
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let cluster = TestCluster::new();
    let config = cluster.config("bad:service", "b1");
    assert!(matches!(
        cluster.build(config, Echo::default()).map(|_| ()).unwrap_err().downcast::<NodeError>(),
        Ok(NodeError::InvalidConfig(_))
    ));
}
