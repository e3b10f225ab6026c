use std::env;
use std::path::PathBuf;

use offline_cache::{AppConfig, CacheStorage, DiskStorage, HttpNetwork, OfflineCacheAgent, Request};
use reqwest::Method;
use tokio::io::AsyncWriteExt;

fn print_usage() {
    eprintln!("Usage: offline-cache [OPTIONS] <COMMAND>");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  install             Pre-cache the asset list into the current bucket");
    eprintln!("  fetch <url>         Serve a request cache-first, body to stdout");
    eprintln!("  buckets             List cache buckets and their entries");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config <PATH>     Config file (default: <config dir>/offline-cache/config.toml)");
    eprintln!("  --storage <DIR>     Cache storage directory");
    eprintln!("  --origin <URL>      Origin relative URLs resolve against");
    eprintln!("  -X, --method <M>    Method for fetch (default: GET)");
    eprintln!("  -H, --header <H>    Header for fetch as 'Name: value' (repeatable)");
    eprintln!("  -h, --help          Show this help");
    eprintln!();
    eprintln!("Logging is controlled by RUST_LOG (default: info).");
}

enum Command {
    Install,
    Fetch(String),
    Buckets,
}

struct Args {
    command: Command,
    config: Option<PathBuf>,
    storage: Option<PathBuf>,
    origin: Option<String>,
    method: Method,
    headers: Vec<(String, String)>,
}

fn usage_error(msg: &str) -> ! {
    eprintln!("Error: {msg}");
    eprintln!();
    print_usage();
    std::process::exit(2);
}

fn take_value(args: &[String], i: &mut usize) -> String {
    let flag = &args[*i];
    *i += 1;
    args.get(*i)
        .cloned()
        .unwrap_or_else(|| usage_error(&format!("{flag} requires a value")))
}

fn parse_args() -> Args {
    let args: Vec<String> = env::args().skip(1).collect();
    let mut config = None;
    let mut storage = None;
    let mut origin = None;
    let mut method = Method::GET;
    let mut headers = Vec::new();
    let mut positional = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                std::process::exit(0);
            }
            "--config" => config = Some(PathBuf::from(take_value(&args, &mut i))),
            "--storage" => storage = Some(PathBuf::from(take_value(&args, &mut i))),
            "--origin" => origin = Some(take_value(&args, &mut i)),
            "-X" | "--method" => {
                let value = take_value(&args, &mut i).to_ascii_uppercase();
                method = Method::from_bytes(value.as_bytes())
                    .unwrap_or_else(|_| usage_error(&format!("invalid method {value}")));
            }
            "-H" | "--header" => {
                let value = take_value(&args, &mut i);
                let (name, val) = value
                    .split_once(':')
                    .unwrap_or_else(|| usage_error(&format!("invalid header {value}")));
                headers.push((name.trim().to_string(), val.trim().to_string()));
            }
            flag if flag.starts_with('-') => usage_error(&format!("unknown option {flag}")),
            other => positional.push(other.to_string()),
        }
        i += 1;
    }

    let mut positional = positional.into_iter();
    let command = match positional.next().as_deref() {
        Some("install") => Command::Install,
        Some("fetch") => Command::Fetch(
            positional
                .next()
                .unwrap_or_else(|| usage_error("fetch requires a URL")),
        ),
        Some("buckets") => Command::Buckets,
        Some(other) => usage_error(&format!("unknown command {other}")),
        None => {
            print_usage();
            std::process::exit(0);
        }
    };

    Args {
        command,
        config,
        storage,
        origin,
        method,
        headers,
    }
}

#[tokio::main]
async fn main() -> offline_cache::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = parse_args();
    let mut config = match &args.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    if let Some(dir) = args.storage {
        config.paths.storage_dir = dir;
    }
    if let Some(origin) = args.origin {
        config.agent.origin = origin;
    }

    let storage = DiskStorage::new(&config.paths.storage_dir);
    let network = HttpNetwork::new(&config.network)?;
    let agent = OfflineCacheAgent::new(config.agent.clone(), storage, network);

    match args.command {
        Command::Install => {
            let count = agent.on_install().await?;
            println!(
                "Cached {count} assets in {} ({})",
                agent.config().cache_name,
                agent.storage().root().display()
            );
        }
        Command::Fetch(target) => {
            if agent.restore().await? {
                log::debug!("Serving from installed bucket");
            } else {
                log::warn!(
                    "Bucket {} is not installed; request goes to the network",
                    agent.config().cache_name
                );
            }
            let request = args.headers.into_iter().fold(
                Request::resolve(args.method, &agent.config().origin, &target)?,
                |request, (name, value)| request.with_header(name, value),
            );
            let served = agent.on_fetch(&request).await?;
            eprintln!(
                "{} {} ({:?})",
                served.response.status, served.response.url, served.source
            );
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&served.response.body).await?;
            stdout.flush().await?;
        }
        Command::Buckets => {
            let storage = agent.storage();
            let names = storage.bucket_names().await?;
            if names.is_empty() {
                println!("No cache buckets in {}", storage.root().display());
            }
            for name in names {
                let keys = storage.keys(&name).await?;
                let marker = if name == agent.config().cache_name {
                    ""
                } else {
                    " (orphaned)"
                };
                println!("{name}{marker}: {} entries", keys.len());
                for key in keys {
                    println!("  {key}");
                }
            }
        }
    }

    Ok(())
}
