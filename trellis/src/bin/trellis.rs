use std::{env, path::PathBuf, sync::Arc};

use clap::{ArgGroup, Args, Parser, Subcommand};
use metrics::gauge;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::{
    runtime::Builder,
    signal,
    task::JoinSet,
    time::{self, Duration, sleep},
};
use tracing::{Instrument, debug, error, info, info_span, warn};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};
use trellis::{
    config::{self, Config, Telemetry},
    feed,
    pipeline::Pipeline,
    report::{self, Reporter},
    signals,
};
use trellis_accumulator::{RollingAccumulator, Snapshot};

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Failed to load trellis config: {0}")]
    Config(#[from] config::Error),
    #[error("Trellis feed returned an error: {0}")]
    Feed(#[from] feed::Error),
    #[error("Failed to install prometheus exporter: {0}")]
    Prometheus(#[from] metrics_exporter_prometheus::BuildError),
}

fn default_config_path() -> String {
    "/etc/trellis/trellis.yaml".to_string()
}

#[derive(Parser)]
#[clap(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run trellis with specified configuration
    Run(RunArgs),
    /// Validate configuration file and exit
    ConfigCheck(ConfigCheckArgs),
}

#[derive(Args)]
#[clap(group(
     ArgGroup::new("run-duration")
           .required(false)
           .args(&["duration_seconds", "duration_infinite"]),
))]
struct RunArgs {
    /// path on disk to the configuration file
    #[clap(long, default_value_t = default_config_path())]
    config_path: String,
    /// number of most recent samples the rolling average covers, overrides
    /// the configuration file
    #[clap(long, allow_negative_numbers = true)]
    window_size: Option<i64>,
    /// the time, in seconds, to run before shutting down
    #[clap(long, default_value_t = 120)]
    duration_seconds: u32,
    /// flag to allow infinite run duration
    #[clap(long)]
    duration_infinite: bool,
    /// the maximum time to wait, in seconds, for controlled shutdown
    #[clap(long, default_value_t = 30)]
    max_shutdown_delay: u16,
}

#[derive(Args)]
struct ConfigCheckArgs {
    /// path on disk to the configuration file
    #[clap(long, default_value_t = default_config_path())]
    config_path: String,
}

fn load_config(config_path: &str) -> Result<Config, Error> {
    let config = if let Ok(env_var_value) = env::var("TRELLIS_CONFIG") {
        debug!("Using config from env var 'TRELLIS_CONFIG'");
        Config::from_yaml(&env_var_value)
    } else {
        debug!("Attempting to open configuration file at: {config_path}");
        config::load_config_from_path(&PathBuf::from(config_path))
    };
    config.map_err(|err| {
        error!("Configuration validation failed: {err}");
        Error::Config(err)
    })
}

fn get_config(args: &RunArgs) -> Result<Config, Error> {
    let mut config = load_config(&args.config_path)?;
    if let Some(window_size) = args.window_size {
        config.accumulator.window_size = window_size;
    }
    Ok(config)
}

async fn inner_main(run_duration: Duration, config: Config) -> Result<Snapshot, Error> {
    let (shutdown_watcher, shutdown_broadcast) = signals::signal();

    if let Some(Telemetry::Prometheus {
        addr,
        global_labels,
    }) = config.telemetry
    {
        let mut builder = PrometheusBuilder::new().with_http_listener(addr);
        for (k, v) in global_labels {
            builder = builder.add_global_label(k, v);
        }
        builder.install()?;
        info!("prometheus exporter listening on {addr}");
    }

    let accumulator = Arc::new(RollingAccumulator::new(config.accumulator));
    info!(
        "rolling average over the last {} samples",
        accumulator.window_size()
    );
    let pipeline = Pipeline::new(Arc::clone(&accumulator), &config.report);

    //
    // FEEDS
    //
    let mut fsrv_joinset = JoinSet::new();
    for cfg in config.feed {
        let feed_server = feed::Server::new(cfg, pipeline.clone(), shutdown_watcher.clone())?;
        fsrv_joinset.spawn(feed_server.run());
    }
    if fsrv_joinset.is_empty() {
        warn!("no feeds configured, nothing will be recorded");
    }

    //
    // REPORTER
    //
    let reporter = Reporter::new(
        &config.report,
        Arc::clone(&accumulator),
        shutdown_watcher.clone(),
    );
    let reporter = reporter.map(|reporter| tokio::spawn(reporter.run()));

    let (timer_watcher, timer_broadcast) = signals::signal();
    tokio::spawn(
        async move {
            sleep(run_duration).await;
            info!("run duration exceeded, signaling for shutdown");
            timer_broadcast.signal();
        }
        .instrument(info_span!("run_timer")),
    );

    drop(shutdown_watcher);
    let timer_watcher_wait = timer_watcher.recv();
    tokio::pin!(timer_watcher_wait);
    let mut interval = time::interval(Duration::from_millis(400));
    let res = loop {
        tokio::select! {
            _ = interval.tick() => {
                gauge!("trellis.running").set(1.0);
            },
            _ = signal::ctrl_c() => {
                info!("received ctrl-c");
                break Ok(());
            },
            () = &mut timer_watcher_wait => {
                info!("shutdown signal received.");
                break Ok(());
            }
            Some(res) = fsrv_joinset.join_next() => {
                match res {
                    Ok(feed_result) => match feed_result {
                        Ok(()) => debug!("Feed shut down successfully"),
                        Err(err) => {
                            error!("Feed shut down unexpectedly: {err}");
                            break Err(Error::Feed(err));
                        }
                    }
                    Err(err) => error!("Could not join the spawned feed task: {err}"),
                }
            },
        }
    };

    shutdown_broadcast.signal();
    while let Some(res) = fsrv_joinset.join_next().await {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!("Feed failed during shutdown: {err}"),
            Err(err) => error!("Could not join the spawned feed task: {err}"),
        }
    }
    if let Some(reporter) = reporter
        && let Err(err) = reporter.await
    {
        error!("Could not join the reporter task: {err}");
    }

    let line = report::publish(&accumulator);
    info!("final {line}");
    res.map(|()| line.snapshot)
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(false)
        .finish()
        .init();

    let version = env!("CARGO_PKG_VERSION");
    info!("Starting trellis {version} run.");

    let args = match Cli::parse().command {
        Commands::Run(args) => args,
        Commands::ConfigCheck(args) => match load_config(&args.config_path) {
            Ok(_) => {
                info!("Configuration file is valid");
                std::process::exit(0)
            }
            Err(_) => std::process::exit(1),
        },
    };

    let config = get_config(&args)?;
    let run_duration = if args.duration_infinite {
        Duration::MAX
    } else {
        Duration::from_secs(args.duration_seconds.into())
    };
    let max_shutdown_delay = Duration::from_secs(args.max_shutdown_delay.into());

    let runtime = Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()?;
    let res = runtime
        .block_on(inner_main(run_duration, config))
        .map(|_| ());
    info!(
        "Shutting down runtime with a {} second delay. May leave orphaned tasks.",
        max_shutdown_delay.as_secs(),
    );
    runtime.shutdown_timeout(max_shutdown_delay);
    info!("Bye. :)");
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn inner_main_runs_synthetic_feed_to_completion() {
        let contents = r#"
accumulator:
  window_size: 5
feed:
  - synthetic:
      seed: [1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,1]
      samples_per_second: 1000
      producers: 2
      min: 1.0
      max: 2.0
      maximum_samples: 20
report:
  every_window: true
  period_milliseconds: 5
"#;
        let config = Config::from_yaml(contents).expect("config must parse");
        let res = tokio::time::timeout(
            Duration::from_secs(30),
            inner_main(Duration::from_millis(500), config),
        )
        .await
        .expect("inner_main did not finish");
        let snapshot = res.expect("inner_main must succeed");
        assert_eq!(snapshot.count, 20);
        assert!((1.0..2.0).contains(&snapshot.rolling_average));
        assert!((20.0..40.0).contains(&snapshot.sum));
    }

    #[test]
    fn window_size_flag_overrides_config() {
        let cli = Cli::try_parse_from([
            "trellis",
            "run",
            "--config-path",
            "/does/not/matter.yaml",
            "--window-size",
            "-4",
        ])
        .expect("arguments must parse");
        let Commands::Run(args) = cli.command else {
            panic!("expected run subcommand");
        };
        assert_eq!(args.window_size, Some(-4));
        assert_eq!(args.duration_seconds, 120);
        assert!(!args.duration_infinite);
    }

    #[test]
    fn duration_flags_are_exclusive() {
        let res = Cli::try_parse_from([
            "trellis",
            "run",
            "--duration-seconds",
            "5",
            "--duration-infinite",
        ]);
        assert!(res.is_err());
    }
}
