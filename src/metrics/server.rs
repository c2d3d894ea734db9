use prometheus::{Encoder, Registry, TextEncoder};

/// Content type of the Prometheus text exposition format
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Render every metric in `registry` in the text exposition format
pub fn encode(registry: &Registry) -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;

    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
