use modeql::config::QueryLayerConfig;
use modeql::namespace::Namespace;
use modeql::offline;
use modeql::query::plan::StateRequest;
use std::collections::BTreeSet;
use std::path::Path;

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        return Err("missing command".into());
    }
    match args[1].as_str() {
        "sql" => cmd_sql(&args[2..]),
        "replay" => cmd_replay(&args[2..]),
        other => {
            print_usage();
            Err(format!("unknown top-level command: {other}"))
        }
    }
}

fn cmd_sql(args: &[String]) -> Result<(), String> {
    let namespace = parse_flag_value(args, "--namespace").ok_or("--namespace is required")?;
    let tables = parse_list(args, "--tables").ok_or("--tables is required")?;
    let world = parse_flag_value(args, "--world");
    let filter = parse_list(args, "--filter")
        .unwrap_or_default()
        .into_iter()
        .collect::<BTreeSet<_>>();
    let config = parse_config(args)?;
    let queries = offline::build_sql(&namespace, world.as_deref(), &tables, &filter, &config)
        .map_err(|e| format!("build sql: {e}"))?;
    for sql in queries {
        println!("{sql}");
    }
    Ok(())
}

fn cmd_replay(args: &[String]) -> Result<(), String> {
    let schemas = parse_flag_value(args, "--schemas").ok_or("--schemas is required")?;
    let feed = parse_flag_value(args, "--feed").ok_or("--feed is required")?;
    let chain_id = parse_flag_value(args, "--chain-id")
        .ok_or("--chain-id is required")?
        .parse::<u64>()
        .map_err(|e| format!("invalid --chain-id: {e}"))?;
    let world = parse_flag_value(args, "--world").ok_or("--world is required")?;
    let config = parse_config(args)?;
    let request = StateRequest::new(Namespace::world(chain_id, world))
        .with_chain_tables(parse_list(args, "--chain-tables").unwrap_or_default())
        .with_world_tables(parse_list(args, "--world-tables").unwrap_or_default());
    let report = offline::replay_files(Path::new(&schemas), Path::new(&feed), &request, &config)
        .map_err(|e| format!("replay: {e}"))?;
    for flush in &report.flushes {
        println!("{}", flush.to_json());
    }
    eprintln!(
        "ok\t{}\t{}\t{}",
        report.events,
        report.flushes.len(),
        report.pending_rows
    );
    Ok(())
}

fn parse_flag_value(args: &[String], flag: &str) -> Option<String> {
    for idx in 0..args.len() {
        if args[idx] == flag {
            return args.get(idx + 1).cloned();
        }
    }
    None
}

fn parse_list(args: &[String], flag: &str) -> Option<Vec<String>> {
    parse_flag_value(args, flag).map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
}

fn parse_config(args: &[String]) -> Result<QueryLayerConfig, String> {
    match parse_flag_value(args, "--config") {
        Some(path) => {
            offline::load_config(Path::new(&path)).map_err(|e| format!("load config: {e}"))
        }
        None if args.iter().any(|a| a == "--dev") => Ok(QueryLayerConfig::development()),
        None => Ok(QueryLayerConfig::default()),
    }
}

fn print_usage() {
    eprintln!("usage:");
    eprintln!(
        "  modeql sql --namespace <key> --tables <a,b> [--world <key>] [--filter <a,b>] [--config <json>]"
    );
    eprintln!(
        "  modeql replay --schemas <schemas.json> --feed <feed.ndjson> --chain-id <id> --world <0x..> [--chain-tables <a,b>] [--world-tables <a,b>] [--config <json>] [--dev]"
    );
}
