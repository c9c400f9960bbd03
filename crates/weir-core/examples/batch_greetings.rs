//! End-to-end demo: a seed node feeds a loop that greets each name in a
//! batch, and a report node reads the loop's stored output afterwards.
//!
//! Run with: cargo run -p weir-core --example batch_greetings

use std::future::Future;

use serde_json::{Value, json};
use weir_core::context::RunContext;
use weir_core::engine::Engine;
use weir_core::registry::{Executor, LoopExecutor, NodeExecutor};
use weir_types::flow::{Edge, Flow, HandleMap, Node};

/// Emits the batch of names to process.
struct Seed;

impl NodeExecutor for Seed {
    fn node_type(&self) -> &str {
        "seed"
    }

    fn execute(
        &self,
        input: &HandleMap,
        _run: &RunContext,
    ) -> impl Future<Output = anyhow::Result<HandleMap>> + Send {
        let output = input.clone();
        async move { Ok(output) }
    }
}

/// Greets one name per invocation.
struct Greet;

impl NodeExecutor for Greet {
    fn node_type(&self) -> &str {
        "greet"
    }

    fn execute(
        &self,
        input: &HandleMap,
        _run: &RunContext,
    ) -> impl Future<Output = anyhow::Result<HandleMap>> + Send {
        let name = input
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("world")
            .to_string();
        async move {
            println!("hello, {name}");
            let mut output = HandleMap::new();
            output.insert("greeting".to_string(), json!(format!("hello, {name}")));
            Ok(output)
        }
    }
}

/// Iterates the "names" array, overriding "name" per iteration.
struct EachName;

impl LoopExecutor for EachName {
    fn node_type(&self) -> &str {
        "each-name"
    }

    fn sequence(
        &self,
        input: &HandleMap,
        _run: &RunContext,
        _iteration: Option<usize>,
    ) -> impl Future<Output = anyhow::Result<Vec<HandleMap>>> + Send {
        let names = input
            .get("names")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        async move {
            Ok(names
                .into_iter()
                .map(|name| {
                    let mut patch = HandleMap::new();
                    patch.insert("name".to_string(), name);
                    patch
                })
                .collect())
        }
    }
}

/// Prints how many greetings went out.
struct Report;

impl NodeExecutor for Report {
    fn node_type(&self) -> &str {
        "report"
    }

    fn execute(
        &self,
        input: &HandleMap,
        _run: &RunContext,
    ) -> impl Future<Output = anyhow::Result<HandleMap>> + Send {
        let count = input.get("count").cloned().unwrap_or(json!(0));
        async move {
            println!("greeted {count} name(s)");
            let mut output = HandleMap::new();
            output.insert("count".to_string(), count);
            Ok(output)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let engine = Engine::new(vec![
        Executor::simple(Seed),
        Executor::simple(Greet),
        Executor::simple(Report),
        Executor::looping(EachName),
    ]);

    // "report" is also fed by "seed", so it runs at top level after the loop
    // and reads the loop's stored output.
    let flow = Flow::new(
        vec![
            Node::new("seed", "seed").with_input("names", json!(["ada", "grace", "edsger"])),
            Node::new("batch", "each-name"),
            Node::new("hello", "greet"),
            Node::new("summary", "report"),
        ],
        vec![
            Edge::new("seed", "names", "batch", "names"),
            Edge::new("batch", "name", "hello", "name"),
            Edge::new("seed", "names", "summary", "batch"),
            Edge::new("batch", "iterations", "summary", "count"),
        ],
    );

    let result = engine.execute(&flow).await?;
    println!(
        "run {} finished with {} node output(s)",
        result.run_id,
        result.outputs.len()
    );
    Ok(())
}
