use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use argh::FromArgs;
use discovery::TargetGroup;
use exitcode::ExitCode;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use xds_sd::config::{Config, ConfigError};
use xds_sd::report::LogReporter;
use xds_sd::signal::{self, SignalTo};
use xds_sd::{output, trace};

use crate::validate::Validate;

fn default_worker_threads() -> usize {
    std::env::var("XDS_SD_WORKER_THREADS")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|threads| *threads > 0)
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
}

#[derive(FromArgs, Debug, PartialEq)]
#[argh(
    description = "xds-sd discovers scrape targets from xDS control planes and prints them as JSON lines",
    help_triggers("-h", "--help")
)]
pub struct RootCommand {
    #[argh(switch, short = 'v', description = "show version")]
    version: bool,

    #[argh(
        option,
        short = 'l',
        default = "\"info\".to_string()",
        description = "log level"
    )]
    log_level: String,

    #[argh(
        option,
        short = 'c',
        long = "config",
        description = "read configuration from one or more files"
    )]
    configs: Vec<PathBuf>,

    #[argh(
        option,
        short = 't',
        default = "default_worker_threads()",
        description = "specify how many threads the Tokio runtime will use"
    )]
    threads: usize,

    #[argh(subcommand)]
    sub_commands: Option<SubCommands>,
}

#[derive(FromArgs, Debug, PartialEq)]
#[argh(subcommand)]
enum SubCommands {
    Validate(Validate),
}

impl SubCommands {
    fn run(&self) -> Result<(), ExitCode> {
        let code = match self {
            SubCommands::Validate(validate) => validate.run(),
        };

        if code == exitcode::OK {
            Ok(())
        } else {
            Err(code)
        }
    }
}

impl RootCommand {
    #![allow(clippy::print_stdout)]
    fn show_version(&self) {
        println!("xds-sd {}", env!("CARGO_PKG_VERSION"));
    }

    pub fn run(&self) -> Result<(), ExitCode> {
        if self.version {
            self.show_version();
            return Ok(());
        }

        if let Some(sub_command) = &self.sub_commands {
            return sub_command.run();
        }

        let levels = std::env::var("XDS_SD_LOG").unwrap_or_else(|_| trace::directives(&self.log_level));
        // stdout carries the target groups, logs are written to stderr
        let color = std::io::stderr().is_terminal();
        trace::init(color, &levels);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .thread_name("xds-sd-worker")
            .worker_threads(self.threads.max(1))
            .enable_io()
            .enable_time()
            .build()
            .map_err(|err| {
                error!(message = "Build tokio runtime failed", %err);
                exitcode::SOFTWARE
            })?;

        runtime.block_on(async move {
            info!(
                message = "Start xds-sd",
                threads = self.threads,
                configs = ?self.configs
            );

            let config = Config::load_from_paths(&self.configs).map_err(handle_config_errors)?;
            config.validate().map_err(handle_config_errors)?;

            let registry = metrics::global_registry();
            let discoverers = config.build(&registry).map_err(handle_config_errors)?;
            if discoverers.is_empty() {
                warn!(message = "No discovery configured");
            }

            let shutdown = CancellationToken::new();
            let (tx, rx) = mpsc::channel::<Vec<TargetGroup>>(1);
            let tasks = discoverers
                .into_iter()
                .map(|discoverer| tokio::spawn(discoverer.run(shutdown.clone(), tx.clone())))
                .collect::<Vec<_>>();
            // The consumer stops once every discoverer has dropped its sender.
            drop(tx);
            let mut consumer = tokio::spawn(forward(rx));

            let signal = tokio::select! {
                result = signal::wait() => match result {
                    Ok(signal) => Some(signal),
                    Err(err) => {
                        error!(message = "Unable to listen for OS signals", %err);
                        shutdown.cancel();
                        return Err(exitcode::OSERR);
                    }
                },
                _ = &mut consumer => None,
            };

            shutdown.cancel();

            match signal {
                Some(SignalTo::Shutdown) => {
                    info!(message = "Shutdown signal received");

                    tokio::select! {
                        // graceful shutdown finished
                        _ = wait_all(tasks, consumer) => (),
                        _ = signal::wait() => {
                            info!(message = "Second signal received, exit immediately");
                        }
                    }
                }

                Some(SignalTo::Quit) => {
                    info!(message = "Quit signal received");

                    tasks.iter().for_each(JoinHandle::abort);
                    consumer.abort();
                }

                None => {
                    info!(message = "All discoverers stopped");
                }
            }

            let mut reporter = LogReporter::default();
            registry.report(&mut reporter);

            Ok::<(), ExitCode>(())
        })?;

        runtime.shutdown_timeout(Duration::from_secs(5));

        Ok(())
    }
}

/// Prints every received batch to stdout until all senders are gone.
async fn forward(mut rx: mpsc::Receiver<Vec<TargetGroup>>) {
    while let Some(groups) = rx.recv().await {
        let result = {
            let mut stdout = std::io::stdout().lock();
            output::write_groups(&mut stdout, &groups)
        };

        if let Err(err) = result {
            error!(message = "Write target groups failed", %err);
        }
    }
}

async fn wait_all(tasks: Vec<JoinHandle<()>>, consumer: JoinHandle<()>) {
    for task in tasks {
        if let Err(err) = task.await {
            error!(message = "Discovery task failed", %err);
        }
    }

    if let Err(err) = consumer.await {
        error!(message = "Forward task failed", %err);
    }
}

pub fn handle_config_errors(errors: Vec<ConfigError>) -> ExitCode {
    for err in errors {
        error!(message = "configuration error", %err);
    }

    exitcode::CONFIG
}
