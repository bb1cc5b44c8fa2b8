use std::{env, sync::LazyLock};

use strum_macros::{EnumIter, IntoStaticStr};

static CONNECTION_URI: LazyLock<String> = LazyLock::new(|| {
    let host = env::var("PROMETHEUS_HOST").unwrap_or("localhost".into());
    let port = env::var("PROMETHEUS_PORT").unwrap_or("9090".into());

    format!("http://{host}:{port}/api/v1/otlp/v1/metrics")
});

const SERVICE_NAME: &str = "image-cache";

#[derive(Debug, EnumIter, IntoStaticStr, Hash, Eq, PartialEq, Clone, Copy)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Metrics {
    /// Fetch answered from the cached copy
    CacheHit,
    /// Fetch that had to go to the source
    CacheMiss,
    /// Fetch that joined a load already in flight for the same key
    CacheCoalesced,
    CacheStored,
    CacheRemoved,
    CacheCleared,
    /// Any call settling with an error, labelled with the error kind
    CacheFailure,
}

impl Metrics {
    pub fn name(&self) -> &'static str {
        self.into()
    }
}

/// Installs the OTLP exporter as the global meter provider.
///
/// Until this runs every counter records into the no-op provider, which is
/// what tests and embedders without a collector get.
pub fn init() {
    _private::install();
}

pub mod _private {
    pub use opentelemetry::KeyValue;

    use std::{collections::HashMap, sync::LazyLock, time::Duration};

    use opentelemetry::{global, metrics::Counter};
    use opentelemetry_otlp::{MetricExporter, Protocol, WithExportConfig};
    use opentelemetry_sdk::{
        Resource,
        metrics::{PeriodicReader, SdkMeterProvider},
    };
    use strum::IntoEnumIterator;
    use tracing::{info, warn};

    use crate::{CONNECTION_URI, Metrics, SERVICE_NAME};

    pub(crate) fn install() {
        let exporter = match MetricExporter::builder()
            .with_http()
            .with_protocol(Protocol::HttpBinary)
            .with_endpoint(CONNECTION_URI.to_string())
            .build()
        {
            Ok(exporter) => exporter,
            Err(err) => {
                warn!("Metrics exporter failed to build, metrics stay disabled: {err}");
                return;
            }
        };

        let reader = PeriodicReader::builder(exporter)
            .with_interval(Duration::from_secs(1))
            .build();

        let resource = Resource::builder().with_service_name(SERVICE_NAME).build();

        let provider = SdkMeterProvider::builder()
            .with_reader(reader)
            .with_resource(resource)
            .build();

        global::set_meter_provider(provider);

        info!("Exporting metrics to {}", CONNECTION_URI.as_str());
    }

    // built on first use, so init() has to run before the first metric is put
    pub static COUNTERS: LazyLock<HashMap<Metrics, Counter<u64>>> = LazyLock::new(|| {
        let meter = global::meter(SERVICE_NAME);
        let mut mapping: HashMap<Metrics, Counter<u64>> = HashMap::new();

        for metric in crate::Metrics::iter() {
            let metric_meter = meter.u64_counter(metric.name()).build();

            mapping.insert(metric, metric_meter);
        }

        mapping
    });
}

#[macro_export]
macro_rules! put_metric {
    ($metric_name:expr, $added_value:expr $(, $key:literal => $value:expr)* $(,)?) => {{
        use $crate::_private::{KeyValue, COUNTERS};
        use $crate::Metrics;

        let metric_name: Metrics = $metric_name;
        let added_value: u64 = $added_value;

        let attributes: &[KeyValue] = &[
            $(KeyValue::new($key, $value),)*
        ];

        if let Some(counter) = COUNTERS.get(&metric_name) {
            counter.add(added_value, attributes);
        }
    }};
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn every_metric_has_a_counter() {
        for metric in Metrics::iter() {
            assert!(_private::COUNTERS.contains_key(&metric));
        }
    }

    #[test]
    fn names_are_screaming_snake_case() {
        assert_eq!(Metrics::CacheHit.name(), "CACHE_HIT");
        assert_eq!(Metrics::CacheCoalesced.name(), "CACHE_COALESCED");
    }

    #[test]
    fn put_metric_without_exporter_is_harmless() {
        put_metric!(Metrics::CacheFailure, 1, "kind" => "timeout", "operation" => "fetch");
        put_metric!(Metrics::CacheHit, 2);
    }
}
