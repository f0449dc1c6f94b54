use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::LevelFilter;
use simple_logger::SimpleLogger;

use vane_core::builder;
use vane_core::config::{ConfigProvider, LoadBalancerConfig, RuleKind};
use vane_core::list_source::{ServerListSource, StaticServerListSource};
use vane_core::ping::AlwaysAlivePinger;
use vane_core::scheduler::Scheduler;
use vane_core::zone_aware::ZoneAwareLoadBalancer;

#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Comma-separated `host:port` list of servers to balance over.
    #[arg(long, default_value = "a.local:8080,b.local:8080,c.local:8080")]
    servers: String,
    /// Verbose level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Number of `choose()` calls to print before exiting.
    #[arg(long, default_value_t = 10)]
    requests: usize,
}

fn main() {
    let args = Args::parse();
    let log_level = match args.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    SimpleLogger::new().with_level(log_level).init().unwrap();
    run(args);
}

#[tokio::main]
async fn run(args: Args) {
    let config = LoadBalancerConfig {
        list_of_servers: Some(args.servers.clone()),
        rule: RuleKind::ZoneAvoidance,
        server_list_refresh_interval_ms: 5_000,
        ping_interval_ms: 5_000,
        ..Default::default()
    };
    log::debug!("Starting with configuration: {:#?}", config);
    let config_provider = Arc::new(ConfigProvider::new(config.clone()));

    let source: Arc<dyn ServerListSource> = match StaticServerListSource::from_config(&args.servers, None) {
        Ok(source) => Arc::new(source),
        Err(err) => {
            log::error!("Could not parse --servers: {}", err);
            return;
        }
    };

    let zone_cfg = config.zone_avoidance;
    let circuit_cfg = config.circuit_breaker;
    let stats_expiry = Duration::from_millis(config.stats_expiry_ms);
    let config_for_factory = config.clone();
    let load_balancer = Arc::new(ZoneAwareLoadBalancer::new(
        move || builder::build_rule(&config_for_factory),
        zone_cfg,
        circuit_cfg,
        stats_expiry,
    ));

    // Seed the initial list synchronously so the first few `choose()`
    // calls below have something to pick from, ahead of the scheduler's
    // first refresh.
    load_balancer.refresh_from_source(&*source, None).await;

    let filter = builder::build_filter(&config, None).map(Arc::from);
    let pinger = Arc::new(AlwaysAlivePinger);
    let scheduler = Scheduler::new(config_provider, load_balancer.clone(), source, filter, pinger);
    scheduler.start();

    for i in 0..args.requests {
        match load_balancer.choose_server(None).await {
            Some(server) => log::info!("request {i}: routed to {server}"),
            None => log::warn!("request {i}: no eligible server"),
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    scheduler.stop(true).await;
}
