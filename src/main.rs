//! Tensorweave CLI - Interactive Tensor Pipelines
//!
//! Inspect the built-in node kinds, check and run saved graphs.

use anyhow::{bail, Context as _, Result};
use std::path::Path;
use tensorweave::prelude::*;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("tensorweave");

    if args.len() < 2 {
        print_usage(program);
        return;
    }

    let result = match args[1].as_str() {
        "list" => {
            list_kinds();
            Ok(())
        }
        "info" => match args.get(2) {
            Some(kind) => kind_info(kind),
            None => Err(anyhow::anyhow!("Please specify a node kind")),
        },
        "check" => match args.get(2) {
            Some(path) => check_graph(Path::new(path)),
            None => Err(anyhow::anyhow!("Please specify a graph file")),
        },
        "run" => match args.get(2) {
            Some(path) => run_graph(Path::new(path), &args[3..]),
            None => Err(anyhow::anyhow!("Please specify a graph file")),
        },
        "demo" => run_demo(),
        "help" | "--help" | "-h" => {
            print_usage(program);
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage(program);
            Ok(())
        }
    };

    if let Err(err) = result {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn print_usage(program: &str) {
    println!("tensorweave v{}", tensorweave::VERSION);
    println!();
    println!("Usage: {program} <command> [options]");
    println!();
    println!("Commands:");
    println!("  list                List all node kinds");
    println!("  info <kind>         Show channels and description of a kind");
    println!("  check <graph.json>  Load a graph and print its validation report");
    println!("  run <graph.json>    Load a graph and evaluate every node");
    println!("  demo                Build a small view pipeline and edit it live");
    println!("  help                Show this help message");
    println!();
    println!("Run options:");
    println!("  --max-in-flight <n> Limit concurrently evaluating nodes");
    println!("  --progress          Print each node as it completes");
    println!();
    println!("Set RUST_LOG=debug for phase and memo traces.");
}

fn list_kinds() {
    let registry = NodeRegistry::with_builtins();

    println!("Available node kinds ({} total):", registry.len());
    println!();

    for (category, kinds) in registry.grouped_by_category() {
        println!("  {}", category.display_name());
        for metadata in kinds {
            println!("      {:<14} {}", metadata.kind, metadata.description);
        }
        println!();
    }
}

fn kind_info(kind: &str) -> Result<()> {
    let registry = NodeRegistry::with_builtins();
    let Some(metadata) = registry.get_metadata(kind) else {
        bail!("Unknown node kind '{kind}'. Use 'list' to see available kinds.");
    };

    println!("Node: {}", metadata.name);
    println!("Kind: {}", metadata.kind);
    println!("Category: {}", metadata.category.display_name());
    println!();
    println!("Description:");
    println!("  {}", metadata.description);
    println!();

    if !metadata.inputs.is_empty() {
        println!("Inputs:");
        for channel in &metadata.inputs {
            println!("  {} [{}]", channel.name, channel.arity);
            if !channel.description.is_empty() {
                println!("    {}", channel.description);
            }
        }
        println!();
    }

    if !metadata.outputs.is_empty() {
        println!("Outputs:");
        for channel in &metadata.outputs {
            println!("  {}", channel.name);
            if !channel.description.is_empty() {
                println!("    {}", channel.description);
            }
        }
        println!();
    }

    if let Some(node) = registry.create(kind) {
        println!("Default config:");
        println!("  {}", node.config());
    }
    Ok(())
}

fn load_context(path: &Path) -> Result<Context> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let doc = SerializedGraph::from_json(&json)
        .with_context(|| format!("parsing {}", path.display()))?;

    let ctx = Context::new();
    let registry = NodeRegistry::with_builtins();
    let report = pollster::block_on(ctx.load(&registry, &doc));

    for (index, err) in &report.skipped_nodes {
        println!("skipped node #{index}: {err}");
    }
    for index in &report.skipped_edges {
        println!("skipped edge #{index}: endpoint was not loaded");
    }
    for (index, err) in &report.rejected_edges {
        println!("rejected edge #{index}: {err}");
    }
    println!(
        "Loaded {} node(s) and {} edge(s) from {}",
        ctx.node_count(),
        ctx.edge_count(),
        path.display()
    );
    Ok(ctx)
}

fn check_graph(path: &Path) -> Result<()> {
    let ctx = load_context(path)?;
    let report = ctx.validate(&ValidationPipeline::default());
    let shape = ctx.inspect(|graph| TopologyAnalyzer::new(graph).summary());
    println!("Topology: {shape}");
    println!("  sources: {}", id_list(&shape.sources));
    println!("  sinks:   {}", id_list(&shape.sinks));

    for warning in &report.warnings {
        println!("warning: {}", warning.message);
    }
    for error in &report.errors {
        println!("error: {error}");
    }
    println!("{}", report.summary());

    if !report.success {
        bail!("validation failed");
    }
    Ok(())
}

fn id_list(ids: &[NodeId]) -> String {
    ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

fn run_graph(path: &Path, options: &[String]) -> Result<()> {
    let mut engine = EngineOptions::new();
    let mut i = 0;
    while i < options.len() {
        match options[i].as_str() {
            "--max-in-flight" => {
                let n: usize = options
                    .get(i + 1)
                    .context("--max-in-flight needs a value")?
                    .parse()
                    .context("--max-in-flight expects a number")?;
                engine = engine.with_max_in_flight(n);
                i += 2;
            }
            "--progress" => {
                engine = engine.with_progress(print_progress);
                i += 1;
            }
            other => bail!("Unknown option: {other}"),
        }
    }

    let ctx = load_context(path)?;
    let roots = ctx.inspect(|graph| graph.node_ids().collect::<Vec<_>>());
    let report = pollster::block_on(ctx.propagate_with(&roots, &engine));
    print_report(&report);

    if !report.is_success() {
        bail!("{} node(s) failed", report.failures.len());
    }
    Ok(())
}

fn print_progress(update: ProgressUpdate) {
    match update {
        ProgressUpdate::Started { roots } => println!("pass started from {roots} root(s)"),
        ProgressUpdate::NodeCompleted {
            node_id,
            duration_ms,
            completed,
        } => println!("  [{completed}] node {node_id} done in {duration_ms}ms"),
        ProgressUpdate::NodeFailed { node_id, error } => println!("  node {node_id} failed: {error}"),
        ProgressUpdate::Completed { .. } => {}
    }
}

fn print_report(report: &PropagationReport) {
    println!("{}", report.summary());
    for (node, err) in &report.failures {
        if err.relayed_by().is_empty() {
            println!("  node {node}: {}", err.kind());
        } else {
            println!("  node {node}: relayed from node {}: {}", err.origin(), err.kind());
        }
    }
}

fn run_demo() -> Result<()> {
    let ctx = Context::new();

    let noise = ctx.add_node(Box::new(NoiseNode::new(vec![3, 32, 32], 7)));
    let green = ctx.add_node(Box::new(SliceNode::fix(3, 0, 1)));
    let blur = ctx.add_node(Box::new(Conv2dNode::box_blur(5)));
    let flip = ctx.add_node(Box::new(PermuteNode::new(vec![1, 0])));
    let probe = ProbeNode::new();
    let handle = probe.handle();
    let sink = ctx.add_node(Box::new(probe));

    ctx.link(noise, "o", green, "o")?;
    ctx.link(green, "o", blur, "o")?;
    ctx.link(blur, "o", flip, "o")?;
    ctx.link(flip, "o", sink, "o")?;

    println!("Built a {}-node pipeline", ctx.node_count());
    let report = pollster::block_on(ctx.run_scheduled());
    print_report(&report);
    if let Some(out) = handle.latest() {
        println!("  probe: {out:?}");
    }

    println!();
    println!("Reseeding the noise source...");
    ctx.configure::<NoiseNode, _>(noise, |node| node.seed = 8)?;
    let report = pollster::block_on(ctx.run_scheduled());
    print_report(&report);

    println!();
    println!("Reading the blurred plane again (memoized)...");
    let plane = pollster::block_on(ctx.get(blur, "o"))?;
    println!("  blur: {plane:?}");

    let stats = ctx.memo_stats();
    println!(
        "Memo: {} computation(s), {} hit(s), {} join(s), {} invalidation(s)",
        stats.computations, stats.hits, stats.joins, stats.invalidations
    );

    log::debug!("saved graph:\n{}", ctx.save().to_json()?);
    Ok(())
}
