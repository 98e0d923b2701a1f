use metrics::{Attributes, Observation, Reporter};

/// Logs every series of a registry, one line per series.
#[derive(Default)]
pub struct LogReporter {
    metric: &'static str,
    lines: Vec<String>,
}

impl LogReporter {
    /// The lines reported so far.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

impl Reporter for LogReporter {
    fn start_metric(&mut self, name: &'static str, _description: &'static str) {
        self.metric = name;
    }

    fn report(&mut self, attrs: &Attributes, observation: Observation) {
        let line = format_series(self.metric, attrs, &observation);
        info!(message = "metric", series = %line);
        self.lines.push(line);
    }

    fn finish_metric(&mut self) {
        self.metric = "";
    }
}

/// Renders a series the way the Prometheus text format would name it,
/// e.g. `foo_total{mechanism="kuma"} 3`.
pub fn format_series(name: &str, attrs: &Attributes, observation: &Observation) -> String {
    let labels = attrs
        .iter()
        .map(|(key, value)| format!("{key}=\"{value}\""))
        .collect::<Vec<_>>()
        .join(",");

    match observation {
        Observation::Counter(value) => format!("{name}{{{labels}}} {value}"),
        Observation::Summary(summary) => {
            let quantiles = summary
                .quantiles
                .iter()
                .map(|q| format!("{}={:.6}", q.quantile, q.value))
                .collect::<Vec<_>>()
                .join(" ");

            format!(
                "{name}{{{labels}}} count={} sum={:.6} {quantiles}",
                summary.count, summary.sum
            )
        }
    }
}
