use tracing_subscriber::EnvFilter;

/// Crates whose events are shown at the requested level.
const CRATES: [&str; 3] = ["xds_sd", "discovery", "metrics"];

/// Turns a bare level like `debug` into per-crate directives, so noisy
/// dependencies (hyper, rustls) stay quiet. Anything that already looks
/// like a filter directive is used as is.
pub fn directives(level: &str) -> String {
    if level == "off" || level.contains('=') || level.contains(',') {
        return level.to_string();
    }

    CRATES
        .iter()
        .map(|name| format!("{name}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Installs the global subscriber. Logs go to stderr, stdout is reserved
/// for discovered target groups.
pub fn init(color: bool, levels: &str) {
    let filter = EnvFilter::try_new(levels).unwrap_or_else(|err| {
        #[allow(clippy::print_stderr)]
        {
            eprintln!("invalid log filter {levels:?}, {err}, fallback to \"info\"");
        }

        EnvFilter::new(directives("info"))
    });

    let result = tracing_subscriber::fmt()
        .with_ansi(color)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    if let Err(err) = result {
        #[allow(clippy::print_stderr)]
        {
            eprintln!("install tracing subscriber failed, {err}");
        }
    }
}
