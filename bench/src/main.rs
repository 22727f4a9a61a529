use std::collections::HashSet;
use std::ops::ControlFlow;
use std::time::Instant;

use kpaths_core::{
    run_query, CostEvaluator, CostOrderedSearch, DeviationSearch, Direction, Graph, GraphStore,
    PathConstraints, PathExpander, PathRecord, Properties, PropertyValue, QueryParams, Settings,
    VirtualGraph,
};
use tracing_subscriber::EnvFilter;

/// Traverse every edge type both ways so the far node is reachable.
const PLAIN: &str = r#"{"defaultDirection": "both"}"#;

/// Same, with set membership hubs collapsed into direct edges.
const INLINED: &str = r#"{"defaultDirection": "both",
    "inline": {"type": "consistsOf", "as": "to", "flag": "isSet"}}"#;

type Generator = fn(u64) -> Graph;

/// Hop distance of the benchmark target from node 0. Path counts grow
/// exponentially with depth, so keep this small.
const TARGET_DEPTH: usize = 3;
const MAX_DEPTH: usize = TARGET_DEPTH + 1;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mode = args.get(1).map(|s| s.as_str()).unwrap_or("all");
    let node_count: u64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(5_000);

    if mode == "help" || mode == "--help" {
        println!("Usage: kpaths-bench [mode] [node_count]");
        println!();
        println!("Modes:");
        println!("  all         Run all generators and benchmark each (default)");
        println!("  scalefree   Preferential attachment via edge sampling (hub-and-spoke)");
        println!("  smallworld  Watts-Strogatz ring lattice + shortcuts");
        println!("  sets        Ring network plus set hubs, traversed with inlining");
        println!();
        println!("Default node_count: 5000");
        println!("Set RUST_LOG=kpaths_core=debug for request traces.");
        return;
    }

    println!("kpaths-bench");
    println!("============");
    println!();

    let scale_free: (&str, Generator, &str) = ("Scale-free (edge sampling)", gen_scale_free, PLAIN);
    let small_world: (&str, Generator, &str) = ("Small-world (Watts-Strogatz)", gen_small_world, PLAIN);
    let sets: (&str, Generator, &str) = ("Set hubs (inlined)", gen_sets, INLINED);
    let generators = match mode {
        "scalefree" => vec![scale_free],
        "smallworld" => vec![small_world],
        "sets" => vec![sets],
        "all" => vec![scale_free, small_world, sets],
        _ => {
            eprintln!("Unknown mode: {}. Use --help for options.", mode);
            return;
        }
    };

    for (name, generator, constraints) in generators {
        run_benchmark(name, generator, constraints, node_count);
    }
}

fn run_benchmark(name: &str, generator: Generator, constraints_text: &str, node_count: u64) {
    let _span = tracing::info_span!("benchmark", generator = name, node_count).entered();
    println!("--- {} ---", name);
    println!("Size: {} nodes", node_count);

    let t = Instant::now();
    let graph = generator(node_count);
    let gen_time = t.elapsed();
    println!(
        "Generated in {:.2}s, {} nodes, {} edges, ~{:.0}MB",
        gen_time.as_secs_f64(),
        graph.node_count(),
        graph.edge_count(),
        graph.memory_usage() as f64 / 1_048_576.0
    );

    let Some(far_node) = pick_target(&graph, TARGET_DEPTH) else {
        println!("No node {} hops from 0, skipping", TARGET_DEPTH);
        println!();
        return;
    };
    println!("Target: node {} ({} hops from 0)", far_node, TARGET_DEPTH);
    let constraints = match PathConstraints::parse(constraints_text) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("bad constraints: {}", e);
            return;
        }
    };

    println!();
    println!(
        "{:>14} {:>8} {:>4} {:>8} {:>10} {:>10}",
        "engine", "cost", "k", "found", "best", "time"
    );
    println!("{:->14} {:->8} {:->4} {:->8} {:->10} {:->10}", "", "", "", "", "", "");

    for weighted in [false, true] {
        let cost = if weighted {
            CostEvaluator::new(Some("weight".into()), 1.0)
        } else {
            CostEvaluator::default()
        };
        for k in [1usize, 5, 10] {
            for engine in ["deviation", "cost-ordered"] {
                let mut expander = PathExpander::new(VirtualGraph::new(&graph), constraints.clone(), MAX_DEPTH);
                let (Some(s), Some(t)) = (
                    expander.overlay_mut().resolve_by_id(0),
                    expander.overlay_mut().resolve_by_id(far_node),
                ) else {
                    println!("{:>14} endpoints missing", engine);
                    continue;
                };

                let start = Instant::now();
                let found: Result<Vec<_>, _> = match engine {
                    "deviation" => DeviationSearch::new(&mut expander, &cost, s, t, k, MAX_DEPTH).collect(),
                    _ => CostOrderedSearch::new(&mut expander, &cost, s, t, k, MAX_DEPTH).collect(),
                };
                let elapsed = start.elapsed();

                match found {
                    Ok(paths) => println!(
                        "{:>14} {:>8} {:>4} {:>8} {:>10} {:>8.1}ms",
                        engine,
                        if weighted { "weight" } else { "hops" },
                        k,
                        paths.len(),
                        paths.first().map(|p| format!("{:.2}", p.cost)).unwrap_or_else(|| "-".into()),
                        elapsed.as_secs_f64() * 1000.0
                    ),
                    Err(e) => println!("{:>14} error: {}", engine, e),
                }
            }
        }
    }

    // Full request path: resolution, wrappers, trimming, delivery
    println!();
    let params = QueryParams {
        request_id: Some(format!("bench-{}", name)),
        source: Some(0),
        target: Some(far_node),
        k: Some(3),
        max_depth: Some(MAX_DEPTH),
        algorithm: Some("shortestPath+dijkstra".into()),
        cost_function: Some("weight".into()),
        ..Default::default()
    };
    let mut first: Option<PathRecord> = None;
    let mut listener = |rec: PathRecord| -> ControlFlow<()> {
        if first.is_none() {
            first = Some(rec);
        }
        ControlFlow::Continue(())
    };
    let t = Instant::now();
    let outcome = run_query(&graph, &Settings::default(), &params, constraints_text, &mut listener);
    let elapsed = t.elapsed();
    println!(
        "run_query 0 -> {}: {:?}, {} paths in {:.1}ms",
        far_node,
        outcome.status,
        outcome.delivered,
        elapsed.as_secs_f64() * 1000.0
    );
    if let Some(rec) = first {
        match serde_json::to_string(&rec) {
            Ok(json) if json.len() <= 400 => println!("first: {}", json),
            Ok(json) => println!("first: {}...", json.chars().take(400).collect::<String>()),
            Err(e) => println!("first: <unserializable: {}>", e),
        }
    }
    println!();
}

/// Last node discovered by a breadth-first sweep from node 0, `depth` hops out
/// (or at the deepest level reached).
/// Set membership edges are not followed, so the target is never a hub.
fn pick_target(graph: &Graph, depth: usize) -> Option<u64> {
    let membership = graph.rel_type_id(MEMBERSHIP);
    let mut seen: HashSet<u64> = HashSet::from([0]);
    let mut frontier = vec![0u64];
    for _ in 0..depth {
        let mut next = Vec::new();
        for &node in &frontier {
            for dir in [Direction::Outgoing, Direction::Incoming] {
                for rel in graph.relationships(node, dir) {
                    if Some(rel.rel_type) == membership {
                        continue;
                    }
                    let other = rel.other(dir);
                    if seen.insert(other) {
                        next.push(other);
                    }
                }
            }
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }
    frontier.last().copied().filter(|&n| n != 0)
}

// ---------------------------------------------------------------------------
// Generators: all O(n) or O(n + edges), single-threaded, deterministic
// ---------------------------------------------------------------------------

/// Simple LCG for deterministic, fast pseudo-random numbers.
struct FastRng(u64);

impl FastRng {
    fn new(seed: u64) -> Self {
        Self(seed)
    }
    fn next(&mut self, max: u64) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1);
        (self.0 >> 33) % max
    }
    fn next_f64(&mut self) -> f64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1);
        (self.0 >> 11) as f64 / (1u64 << 53) as f64
    }
}

const REL_TYPES: [&str; 5] = ["IMPLIES", "SUPPORTS", "CONTRADICTS", "RELATED_TO", "REQUIRES"];

/// Random edge weight in [0.1, 10).
fn weight(rng: &mut FastRng) -> Properties {
    let mut props = Properties::new();
    props.insert("weight".to_string(), PropertyValue::Float(0.1 + rng.next_f64() * 9.9));
    props
}

fn add_edge(graph: &mut Graph, rng: &mut FastRng, from: u64, to: u64, rel_type: &str) {
    let rt = graph.intern_rel_type(rel_type);
    let props = weight(rng);
    graph.add_relationship(from, to, rt, props);
}

fn random_type(rng: &mut FastRng) -> &'static str {
    REL_TYPES[rng.next(5) as usize]
}

/// Scale-free via edge-list sampling (O(edges), not O(n²)).
///
/// Preferential attachment by picking a random existing edge and connecting
/// to one of its endpoints. Nodes with more edges are more likely to be picked.
fn gen_scale_free(node_count: u64) -> Graph {
    let edges_per_node = 4u64;
    let mut graph = Graph::with_capacity(node_count as usize, (node_count * edges_per_node) as usize);
    let mut rng = FastRng::new(12345);

    // Edge list for O(1) preferential attachment sampling
    let mut edge_endpoints: Vec<u64> = Vec::with_capacity((node_count * edges_per_node * 2) as usize);

    let seed = 5u64;
    for i in 0..seed {
        graph.add_node(i, &["Concept"], Properties::new());
    }
    for i in 0..seed {
        for j in (i + 1)..seed {
            let rt = random_type(&mut rng);
            add_edge(&mut graph, &mut rng, i, j, rt);
            edge_endpoints.push(i);
            edge_endpoints.push(j);
        }
    }

    for new_node in seed..node_count {
        graph.add_node(new_node, &["Concept"], Properties::new());

        let attach = edges_per_node.min(new_node);
        for _ in 0..attach {
            let idx = rng.next(edge_endpoints.len() as u64) as usize;
            let target = edge_endpoints[idx];
            if target != new_node {
                let rt = random_type(&mut rng);
                add_edge(&mut graph, &mut rng, new_node, target, rt);
                edge_endpoints.push(new_node);
                edge_endpoints.push(target);
            }
        }
    }

    graph
}

/// Small-world (Watts-Strogatz): ring lattice + random rewiring.
fn gen_small_world(node_count: u64) -> Graph {
    let k = 3u64; // neighbors on each side
    let p = 0.05f64; // rewire probability
    let mut graph = Graph::with_capacity(node_count as usize, (node_count * k) as usize);
    let mut rng = FastRng::new(67890);

    for i in 0..node_count {
        graph.add_node(i, &["Concept"], Properties::new());
    }

    for i in 0..node_count {
        for j in 1..=k {
            let neighbor = (i + j) % node_count;
            let rt = random_type(&mut rng);
            let to = if rng.next_f64() < p {
                let rewired = rng.next(node_count);
                if rewired != i { rewired } else { neighbor }
            } else {
                neighbor
            };
            add_edge(&mut graph, &mut rng, i, to, rt);
        }
    }

    graph
}

const MEMBERSHIP: &str = "consistsOf";

/// Ring of network nodes with a few random chords, plus one set hub per 20
/// nodes whose `consistsOf` edges point at 5 random members.
fn gen_sets(node_count: u64) -> Graph {
    let node_count = node_count.max(2);
    let set_count = (node_count / 20).max(1);
    let mut graph = Graph::with_capacity((node_count + set_count) as usize, (node_count * 3) as usize);
    let mut rng = FastRng::new(24680);

    for i in 0..node_count {
        graph.add_node(i, &["NetworkNode"], Properties::new());
    }
    for i in 0..node_count {
        add_edge(&mut graph, &mut rng, i, (i + 1) % node_count, "to");
        if rng.next(4) == 0 {
            let other = rng.next(node_count);
            if other != i {
                add_edge(&mut graph, &mut rng, i, other, "to");
            }
        }
    }

    for s in 0..set_count {
        let hub = node_count + s;
        let mut props = Properties::new();
        props.insert("name".to_string(), PropertyValue::String(format!("set-{}", s)));
        graph.add_node(hub, &["SetNode"], props);
        for _ in 0..5 {
            let member = rng.next(node_count);
            add_edge(&mut graph, &mut rng, hub, member, MEMBERSHIP);
        }
    }

    graph
}
