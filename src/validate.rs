use std::fmt::Display;
use std::io::{IsTerminal, Write};
use std::path::PathBuf;

use argh::FromArgs;
use exitcode::ExitCode;
use metrics::Registry;
use xds_sd::config::Config;

#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(FromArgs, PartialEq, Debug)]
#[argh(
    subcommand,
    name = "validate",
    description = "Validate target configs, then exit",
    help_triggers("-h", "--help")
)]
pub struct Validate {
    #[argh(
        switch,
        long = "no-build",
        description = "only check the config files, do not build the discoverers"
    )]
    no_build: bool,

    #[argh(
        option,
        short = 'c',
        long = "config",
        description = "read configuration from one or more files"
    )]
    configs: Vec<PathBuf>,
}

impl Validate {
    pub fn run(&self) -> ExitCode {
        let stdout = std::io::stdout();
        let color = stdout.is_terminal();
        let mut out = Checklist::new(stdout.lock(), color);

        let config = match self.load(&mut out) {
            Some(config) => config,
            None => return exitcode::CONFIG,
        };

        if !self.no_build {
            // The HTTP clients inside the discoverers expect to be created
            // within a runtime.
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_io()
                .enable_time()
                .build()
            {
                Ok(rt) => rt,
                Err(_) => return exitcode::CANTCREAT,
            };

            if !rt.block_on(async { build_discoverers(&config, &mut out) }) {
                return exitcode::CONFIG;
            }
        }

        out.line(Mark::Pass, "Validated");
        exitcode::OK
    }

    fn load<W: Write>(&self, out: &mut Checklist<W>) -> Option<Config> {
        if self.configs.is_empty() {
            out.line(Mark::Fail, "No config file paths");
            return None;
        }

        let loaded = Config::load_from_paths(&self.configs).and_then(|config| {
            config.validate()?;
            Ok(config)
        });

        match loaded {
            Ok(config) => {
                out.line(Mark::Pass, format!("Loaded {:?}", self.configs));
                if config.kuma_sd_configs.is_empty() {
                    out.line(Mark::Warn, "No discovery configured");
                }

                Some(config)
            }

            Err(errs) => {
                out.failures(format!("Failed to load {:?}", self.configs), errs);
                None
            }
        }
    }
}

fn build_discoverers<W: Write>(config: &Config, out: &mut Checklist<W>) -> bool {
    match config.build(&Registry::new()) {
        Ok(discoverers) => {
            out.line(Mark::Pass, format!("Built {} discoverer(s)", discoverers.len()));
            true
        }

        Err(errs) => {
            out.failures("Unable to build discoverers", errs);
            false
        }
    }
}

#[derive(Clone, Copy)]
enum Mark {
    Pass,
    Warn,
    Fail,
}

impl Mark {
    fn symbol(self, color: bool) -> &'static str {
        match (self, color) {
            (Mark::Pass, false) => "√",
            (Mark::Warn, false) => "~",
            (Mark::Fail, false) => "x",
            (Mark::Pass, true) => "\x1b[32m√\x1b[0m",
            (Mark::Warn, true) => "\x1b[33m~\x1b[0m",
            (Mark::Fail, true) => "\x1b[31mx\x1b[0m",
        }
    }
}

/// Prints one marked line per check. Write errors are ignored, there is
/// nowhere else to report them.
struct Checklist<W> {
    writer: W,
    color: bool,
}

impl<W: Write> Checklist<W> {
    fn new(writer: W, color: bool) -> Self {
        Self { writer, color }
    }

    fn line(&mut self, mark: Mark, msg: impl Display) {
        let _ = writeln!(self.writer, "{} {}", mark.symbol(self.color), msg);
    }

    /// A failed check followed by its indented errors.
    fn failures<E: Display>(&mut self, title: impl Display, errs: impl IntoIterator<Item = E>) {
        self.line(Mark::Fail, title);
        for err in errs {
            let _ = writeln!(self.writer, "    {err}");
        }
    }
}
