use std::env;

use anyhow::Result;
use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::{
    propagation::TraceContextPropagator,
    resource::Resource,
    runtime::Tokio,
    trace::{self, Sampler},
};
use tracing::{info, warn};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

type Registry = tracing_subscriber::registry::Registry;

const SAMPLING_RATIO_VAR: &str = "SQLPERF_OTEL_SAMPLING_RATE";
const OTLP_ENDPOINT_VAR: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// Flushes pending spans when dropped, if an exporter was installed.
#[derive(Debug)]
pub struct TelemetryGuard {
    exporting: bool,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if self.exporting {
            global::shutdown_tracer_provider();
        }
    }
}

/// Trace export settings read from the environment. Bad values never abort
/// startup; they are kept as notes and logged once the subscriber is up.
#[derive(Debug, Clone, PartialEq)]
struct ExportSettings {
    enabled: bool,
    sampling_ratio: f64,
    notes: Vec<String>,
}

impl ExportSettings {
    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = var(OTLP_ENDPOINT_VAR).is_some_and(|value| !value.trim().is_empty());

        let mut notes = Vec::new();
        let sampling_ratio = match var(SAMPLING_RATIO_VAR) {
            None => 1.0,
            Some(raw) => sampling_ratio(&raw).unwrap_or_else(|(fallback, note)| {
                notes.push(note);
                fallback
            }),
        };

        Self {
            enabled: enabled && sampling_ratio > 0.0,
            sampling_ratio,
            notes,
        }
    }
}

/// Parses a trace sampling ratio. On bad input returns the ratio to use
/// instead together with a note describing the correction.
fn sampling_ratio(raw: &str) -> Result<f64, (f64, String)> {
    let raw = raw.trim();
    if raw.is_empty() {
        let note = format!("{SAMPLING_RATIO_VAR} is blank, sampling everything");
        return Err((1.0, note));
    }

    let ratio: f64 = raw.parse().map_err(|_| {
        let note = format!("{SAMPLING_RATIO_VAR}={raw:?} is not a number, sampling everything");
        (1.0, note)
    })?;

    if (0.0..=1.0).contains(&ratio) {
        Ok(ratio)
    } else {
        let bounded = ratio.clamp(0.0, 1.0);
        let note = format!("{SAMPLING_RATIO_VAR}={raw} is out of range, using {bounded}");
        Err((bounded, note))
    }
}

/// Installs the global subscriber: env-filtered console logs, plus an OTLP
/// trace exporter when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
pub fn init(service_name: &str) -> Result<TelemetryGuard> {
    let settings = ExportSettings::from_vars(|key| env::var(key).ok());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (otel_layer, otel_error) = if settings.enabled {
        match otel_layer(service_name, settings.sampling_ratio) {
            Ok(layer) => (Some(layer), None),
            Err(error) => (None, Some(error)),
        }
    } else {
        (None, None)
    };
    let exporting = otel_layer.is_some();

    tracing_subscriber::registry()
        .with(otel_layer)
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    for note in &settings.notes {
        warn!("{note}");
    }
    if let Some(error) = otel_error {
        warn!(%error, "trace export disabled, OTLP pipeline failed to start");
    }
    if exporting {
        info!(sampling_ratio = settings.sampling_ratio, "exporting traces over OTLP");
    }

    Ok(TelemetryGuard { exporting })
}

fn otel_layer(
    service_name: &str,
    sampling_ratio: f64,
) -> Result<OpenTelemetryLayer<Registry, trace::Tracer>> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_trace_config(
            trace::Config::default()
                .with_sampler(Sampler::TraceIdRatioBased(sampling_ratio))
                .with_resource(Resource::new(vec![KeyValue::new(
                    "service.name",
                    service_name.to_string(),
                )])),
        )
        .with_exporter(opentelemetry_otlp::new_exporter().tonic())
        .install_batch(Tokio)?;

    Ok(tracing_opentelemetry::layer().with_tracer(tracer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> ExportSettings {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ExportSettings::from_vars(|key: &str| map.get(key).cloned())
    }

    #[test]
    fn export_is_off_without_endpoint() {
        let settings = settings(&[("SQLPERF_OTEL_SAMPLING_RATE", "0.5")]);
        assert!(!settings.enabled);
        assert_eq!(settings.sampling_ratio, 0.5);
        assert!(settings.notes.is_empty());
    }

    #[test]
    fn endpoint_enables_full_sampling_by_default() {
        let settings = settings(&[("OTEL_EXPORTER_OTLP_ENDPOINT", "http://localhost:4317")]);
        assert!(settings.enabled);
        assert_eq!(settings.sampling_ratio, 1.0);
    }

    #[test]
    fn zero_ratio_disables_export() {
        let settings = settings(&[
            ("OTEL_EXPORTER_OTLP_ENDPOINT", "http://localhost:4317"),
            ("SQLPERF_OTEL_SAMPLING_RATE", "0"),
        ]);
        assert!(!settings.enabled);
    }

    #[test]
    fn out_of_range_ratio_is_bounded() {
        assert_eq!(sampling_ratio("0.25"), Ok(0.25));

        let (ratio, note) = sampling_ratio("1.5").unwrap_err();
        assert_eq!(ratio, 1.0);
        assert!(note.contains("out of range"), "{note}");

        let (ratio, _) = sampling_ratio("-0.3").unwrap_err();
        assert_eq!(ratio, 0.0);
    }

    #[test]
    fn unusable_ratio_falls_back_to_full_sampling() {
        let settings = settings(&[("SQLPERF_OTEL_SAMPLING_RATE", "abc")]);
        assert_eq!(settings.sampling_ratio, 1.0);
        assert_eq!(settings.notes.len(), 1);
        assert!(settings.notes[0].contains("not a number"));

        let (ratio, note) = sampling_ratio("   ").unwrap_err();
        assert_eq!(ratio, 1.0);
        assert!(note.contains("blank"));
    }
}
