use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use starling::logging;
use starling::{
    HandlerTable, InMemoryBroker, InMemoryServiceRegistry, InMemoryTransport, Node, NodeConfig, NodeService,
    RequestOptions, ServiceDiscovery,
};

#[derive(Debug, Serialize, Deserialize)]
struct Ping(u32);

#[derive(Debug, Serialize, Deserialize)]
struct Pong {
    seq: u32,
    served: u32,
}

#[derive(Default)]
struct PongService {
    served: AtomicU32,
}

impl NodeService for PongService {
    fn handlers() -> HandlerTable<Self> {
        HandlerTable::new()
            .sync_body("ping", |svc: &Self, ping: Ping| {
                let served = svc.served.fetch_add(1, Ordering::SeqCst) + 1;
                Ok::<_, anyhow::Error>(Pong { seq: ping.0, served })
            })
            .async_body("slow_ping", |_: Arc<Self>, ping: Ping| async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, anyhow::Error>(Pong { seq: ping.0, served: 0 })
            })
    }
}

struct PingService;

impl NodeService for PingService {
    fn handlers() -> HandlerTable<Self> {
        HandlerTable::new()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_development()?;

    let broker = InMemoryBroker::new();
    let discovery = ServiceDiscovery::new(Arc::new(InMemoryServiceRegistry::new()));
    let connect = || Arc::new(InMemoryTransport::connect(&broker));

    let config = |service: &str, instance: &str| NodeConfig::new("demo", service).with_instance_id(instance);

    let pong_a = Node::new(config("pong", "a"), PongService::default(), connect(), discovery.clone())?;
    let pong_b = Node::new(config("pong", "b"), PongService::default(), connect(), discovery.clone())?;
    let ping = Node::new(config("ping", "1"), PingService, connect(), discovery.clone())?;
    for node in [&pong_a, &pong_b] {
        node.initialize().await?;
    }
    ping.initialize().await?;

    for seq in 0..4 {
        let pong: Pong = ping.request("pong", "ping", &Ping(seq)).await?;
        println!("ping {seq} -> {pong:?}");
    }

    let response = ping
        .make_request(RequestOptions::new("demo:pong:b", "slow_ping", json!(99)).timeout(Duration::from_secs(1)))
        .await?;
    println!("slow ping answered by {}", response.response_header.responder_address);

    match ping.make_request(RequestOptions::new("pong", "unknown", json!(null))).await {
        Ok(_) => println!("unexpected success"),
        Err(err) => println!("unknown request type rejected: {err}"),
    }

    ping.stop().await?;
    pong_a.stop().await?;
    pong_b.stop().await?;
    Ok(())
}
