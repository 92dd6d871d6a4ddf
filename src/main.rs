#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::io::Write;

use log::{debug, error, info};
use tokio::runtime::Builder;
use tokio::task::JoinSet;

use mtcloak::config::{self, ProxyServerConfig};
use mtcloak::proxy::Proxy;
use mtcloak::secret::Secret;
use mtcloak::socket_util::new_tcp_listener;

const DEFAULT_CONFIG_FILENAME: &str = "config.mtcloak.yaml";

fn print_usage_and_exit(arg0: String) {
    eprintln!("Usage: {arg0} [--threads/-t N] [--dry-run/-d] <config filename> [config filename] [..]");
    eprintln!("       {arg0} generate-secret <hostname>");
    std::process::exit(1);
}

fn generate_secret(arg0: String, host: Option<&String>) {
    let Some(host) = host else {
        eprintln!("Missing hostname for generate-secret.");
        print_usage_and_exit(arg0);
        return;
    };

    match Secret::generate(host) {
        Ok(secret) => {
            println!(
                "--------------------------------------------------------------------------------"
            );
            println!("Hostname: {host}");
            println!("Secret (hex): {}", secret.to_hex());
            if let Some(base64) = secret.to_base64() {
                println!("Secret (base64): {base64}");
            }
            println!(
                "--------------------------------------------------------------------------------"
            );
        }
        Err(e) => {
            eprintln!("Failed to generate secret: {e}");
            std::process::exit(1);
        }
    }
}

async fn start_servers(server_configs: Vec<ProxyServerConfig>) -> std::io::Result<Vec<Proxy>> {
    let mut proxies = Vec::with_capacity(server_configs.len());
    let mut serve_tasks = JoinSet::new();

    for ProxyServerConfig {
        bind_address,
        options,
    } in server_configs
    {
        let listener = match new_tcp_listener(bind_address) {
            Ok(l) => l,
            Err(e) => {
                serve_tasks.abort_all();
                return Err(std::io::Error::new(
                    e.kind(),
                    format!("failed to listen on {bind_address}: {e}"),
                ));
            }
        };
        let proxy = Proxy::new(options);
        let serving = proxy.clone();
        serve_tasks.spawn(async move {
            if let Err(e) = serving.serve(listener).await {
                error!("Server on {bind_address} stopped: {e}");
            }
        });
        proxies.push(proxy);
    }

    // the accept loops end once their proxies are shut down
    tokio::spawn(async move { while serve_tasks.join_next().await.is_some() {} });

    Ok(proxies)
}

fn main() {
    env_logger::builder()
        .format(|buf, record| {
            let timestamp = buf.timestamp();
            let level_style = buf.default_level_style(record.level());

            let sanitized_args = format!("{}", record.args())
                .chars()
                .map(|c| {
                    if c.is_ascii_graphic() || c == ' ' {
                        c
                    } else {
                        '?'
                    }
                })
                .collect::<String>();

            writeln!(
                buf,
                "[{} {level_style}{}{level_style:#} {}] {}",
                timestamp,
                record.level(),
                record.target(),
                sanitized_args
            )
        })
        .init();

    let mut args: Vec<String> = std::env::args().collect();
    let arg0 = args.remove(0);
    let mut num_threads = 0usize;
    let mut dry_run = false;

    while !args.is_empty() && args[0].starts_with("-") {
        if args[0] == "--threads" || args[0] == "-t" {
            args.remove(0);
            if args.is_empty() {
                eprintln!("Missing threads argument.");
                print_usage_and_exit(arg0);
                return;
            }
            num_threads = match args.remove(0).parse::<usize>() {
                Ok(n) => n,
                Err(e) => {
                    eprintln!("Invalid thread count: {e}");
                    print_usage_and_exit(arg0);
                    return;
                }
            };
        } else if args[0] == "--dry-run" || args[0] == "-d" {
            args.remove(0);
            dry_run = true;
        } else {
            eprintln!("Invalid argument: {}", args[0]);
            print_usage_and_exit(arg0);
            return;
        }
    }

    if let Some(pos) = args.iter().position(|s| s == "generate-secret") {
        generate_secret(arg0, args.get(pos + 1));
        return;
    }

    if args.is_empty() {
        println!("No config specified, assuming loading from file {DEFAULT_CONFIG_FILENAME}");
        args.push(DEFAULT_CONFIG_FILENAME.to_string())
    }

    if dry_run {
        println!("Starting dry run.");
    }

    if num_threads == 0 {
        num_threads = std::cmp::max(
            2,
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        );
        debug!("Runtime threads: {num_threads}");
    } else {
        println!("Using custom thread count ({num_threads})");
    }

    let mut builder = if num_threads == 1 {
        Builder::new_current_thread()
    } else {
        let mut mt = Builder::new_multi_thread();
        mt.worker_threads(num_threads);
        mt
    };

    let runtime = match builder.enable_io().enable_time().build() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Could not build tokio runtime: {e}");
            std::process::exit(1);
        }
    };

    runtime.block_on(async move {
        let configs = match config::load_configs(&args).await {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load server configs: {e}\n");
                print_usage_and_exit(arg0);
                return;
            }
        };

        for config in configs.iter() {
            debug!("================================================================================");
            debug!("{config:#?}");
        }
        debug!("================================================================================");

        let server_configs = match config::create_server_configs(configs) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to validate server configs: {e}\n");
                print_usage_and_exit(arg0);
                return;
            }
        };

        if server_configs.is_empty() {
            eprintln!("No server configs found.");
            std::process::exit(1);
        }

        if dry_run {
            println!("Finishing dry run, config parsed successfully.");
            return;
        }

        let proxies = match start_servers(server_configs).await {
            Ok(p) => p,
            Err(e) => {
                eprintln!("Failed to start servers: {e}");
                std::process::exit(1);
            }
        };

        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {e}");
        }

        info!("Shutting down, waiting for active connections");
        futures::future::join_all(proxies.iter().map(Proxy::shutdown)).await;
        info!("Shutdown complete");
    });
}
