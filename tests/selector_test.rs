//! 选择器测试：节点池换代与完成回调反馈

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use flare_routing_core::selector::ewma::EwmaNode;
use flare_routing_core::selector::{
    DefaultSelector, WeightedNode, WeightedNodeBuilder, filter, p2c, random, wrr,
};
use flare_routing_core::{
    BuilderRegistry, Context, DoneInfo, Node, Peer, RoutingError, SelectOptions, Selector,
};

fn generation_nodes(generation: usize) -> Vec<Arc<Node>> {
    (0..3)
        .map(|i| {
            Arc::new(
                Node::new("grpc", format!("10.0.{}.{}:9000", generation, i))
                    .with_metadata("generation", generation.to_string()),
            )
        })
        .collect()
}

#[test]
fn select_never_returns_a_superseded_generation() {
    let ctx = Context::background();
    for builder in [p2c::builder(), random::builder(), wrr::builder()] {
        let selector = builder.build_default();
        for generation in 0..20 {
            selector.store(generation_nodes(generation));
            for _ in 0..20 {
                let (node, done) = selector.select(&ctx, &SelectOptions::new()).unwrap();
                assert_eq!(
                    node.metadata().get("generation"),
                    Some(&generation.to_string())
                );
                done(&ctx, DoneInfo::success());
            }
        }
    }
}

#[test]
fn concurrent_readers_observe_monotonic_generations() {
    let selector: Arc<DefaultSelector> = Arc::new(random::builder().build_default());
    selector.store(generation_nodes(0));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let selector = selector.clone();
            thread::spawn(move || {
                let ctx = Context::background();
                let mut last = 0usize;
                for _ in 0..2_000 {
                    let (node, done) = selector.select(&ctx, &SelectOptions::new()).unwrap();
                    let generation: usize = node.metadata()["generation"].parse().unwrap();
                    assert!(generation >= last, "generation went back from {} to {}", last, generation);
                    last = generation;
                    done(&ctx, DoneInfo::success());
                }
            })
        })
        .collect();

    for generation in 1..=50 {
        selector.store(generation_nodes(generation));
    }
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(selector.generation(), 51);
}

/// 记录每个新建的 EWMA 节点，便于事后检查统计状态
#[derive(Default)]
struct RecordingBuilder {
    built: parking_lot::Mutex<Vec<Arc<EwmaNode>>>,
}

impl WeightedNodeBuilder for RecordingBuilder {
    fn build(&self, node: Arc<Node>) -> Arc<dyn WeightedNode> {
        let node = Arc::new(EwmaNode::new(node, None));
        self.built.lock().push(node.clone());
        node
    }
}

fn rotating_nodes(round: usize) -> Vec<Arc<Node>> {
    let start = round % 2;
    (start..start + 3)
        .map(|i| Arc::new(Node::new("grpc", format!("10.0.0.{}:9000", i))))
        .collect()
}

#[test]
fn concurrent_feedback_keeps_ewma_stats_consistent() {
    let builder = Arc::new(RecordingBuilder::default());
    let selector = Arc::new(DefaultSelector::new(
        builder.clone(),
        Box::new(p2c::P2cBalancer::new()),
    ));
    selector.store(rotating_nodes(0));

    let workers: Vec<_> = (0..8)
        .map(|worker| {
            let selector = selector.clone();
            thread::spawn(move || {
                let ctx = Context::background();
                for i in 0..2_000usize {
                    let (_, done) = selector.select(&ctx, &SelectOptions::new()).unwrap();
                    let info = match (worker + i) % 4 {
                        0 => DoneInfo::failure(anyhow::anyhow!("connection reset"), true),
                        1 => DoneInfo::failure(anyhow::anyhow!("connect refused"), false),
                        _ => DoneInfo::success(),
                    };
                    done(&ctx, info);
                }
            })
        })
        .collect();

    for round in 1..=200 {
        selector.store(rotating_nodes(round));
    }
    for worker in workers {
        worker.join().unwrap();
    }

    let built = builder.built.lock();
    assert!(built.len() >= 4);
    for node in built.iter() {
        assert_eq!(node.inflight(), 0, "{} still has requests in flight", node.raw().address());
        let health = node.health();
        assert!((0.0..=1000.0).contains(&health), "health out of range: {}", health);
    }
    let requests: u64 = built.iter().map(|node| node.requests()).sum();
    assert_eq!(requests, 8 * 2_000);
}

#[tokio::test(start_paused = true)]
async fn failing_node_loses_traffic() {
    let ctx = Context::background();
    let selector = p2c::builder().build_default();
    selector.store(vec![
        Arc::new(Node::new("grpc", "10.0.0.1:9000")),
        Arc::new(Node::new("grpc", "10.0.0.2:9000")),
    ]);

    let mut failing = 0;
    for _ in 0..400 {
        let (node, done) = selector.select(&ctx, &SelectOptions::new()).unwrap();
        tokio::time::advance(Duration::from_millis(10)).await;
        if node.address() == "10.0.0.1:9000" {
            failing += 1;
            done(&ctx, DoneInfo::failure(anyhow::anyhow!("connection refused"), true));
        } else {
            done(&ctx, DoneInfo::success());
        }
    }
    // 只剩长时间未被选中时的强制选择
    assert!(failing <= 5, "failing node picked {} times", failing);
}

#[test]
fn weight_metadata_drives_random_selection() {
    let ctx = Context::background();
    let selector = BuilderRegistry::with_defaults().build("RANDOM").unwrap();
    selector.store(vec![
        Arc::new(Node::new("grpc", "a:9000").with_initial_weight(10)),
        Arc::new(Node::new("grpc", "b:9000").with_initial_weight(0)),
    ]);

    for _ in 0..200 {
        let (node, done) = selector.select(&ctx, &SelectOptions::new()).unwrap();
        assert_eq!(node.address(), "a:9000");
        done(&ctx, DoneInfo::success());
    }
}

#[test]
fn filters_compose_in_order() {
    let ctx = Peer::with_peer(&Context::background());
    let selector = wrr::builder().build_default();
    selector.store(vec![
        Arc::new(Node::new("grpc", "a:9000").with_version("v1").with_metadata("zone", "sh")),
        Arc::new(Node::new("grpc", "b:9000").with_version("v2").with_metadata("zone", "sh")),
        Arc::new(Node::new("grpc", "c:9000").with_version("v2").with_metadata("zone", "bj")),
    ]);

    let opts = SelectOptions::new()
        .filter(filter::version("v2"))
        .filter(filter::metadata("zone", "sh"));
    for _ in 0..10 {
        let (node, done) = selector.select(&ctx, &opts).unwrap();
        assert_eq!(node.address(), "b:9000");
        done(&ctx, DoneInfo::success());
    }
    let peer = Peer::from_context(&ctx).and_then(|p| p.node()).unwrap();
    assert_eq!(peer.address(), "b:9000");

    let opts = opts.filter(filter::version("v1"));
    let err = selector.select(&ctx, &opts).err().unwrap();
    assert!(matches!(err, RoutingError::NoAvailable));
}
