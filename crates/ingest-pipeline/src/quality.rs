//! Ignition Quality Monitoring
//!
//! Per-cycle breakdown of detection methods and confidence, reported both
//! in the aggregate cycle report and through the `metrics` facade. Low
//! confidence is a monitoring signal, never an error.

use serde::Serialize;
use std::collections::HashMap;
use telemetry_normalizer::IgnitionReading;

/// Accumulates detection quality over one pipeline run
pub struct QualityMonitor {
    method_counts: HashMap<&'static str, u64>,
    confidence_sum: f64,
    samples: u64,
    low_confidence: u64,
    low_confidence_threshold: f64,
}

impl QualityMonitor {
    pub fn new(low_confidence_threshold: f64) -> Self {
        Self {
            method_counts: HashMap::new(),
            confidence_sum: 0.0,
            samples: 0,
            low_confidence: 0,
            low_confidence_threshold,
        }
    }

    pub fn record(&mut self, reading: &IgnitionReading) {
        *self.method_counts.entry(reading.method.as_str()).or_insert(0) += 1;
        self.confidence_sum += reading.confidence;
        self.samples += 1;

        metrics::counter!("ignition_detections_total", "method" => reading.method.as_str())
            .increment(1);

        if reading.confidence < self.low_confidence_threshold {
            self.low_confidence += 1;
            metrics::counter!("ignition_low_confidence_total").increment(1);
        }
    }

    pub fn summary(&self) -> QualitySummary {
        let mean_confidence = if self.samples > 0 {
            self.confidence_sum / self.samples as f64
        } else {
            0.0
        };

        metrics::gauge!("ignition_mean_confidence").set(mean_confidence);

        QualitySummary {
            samples: self.samples,
            mean_confidence,
            low_confidence: self.low_confidence,
            method_counts: self
                .method_counts
                .iter()
                .map(|(k, v)| ((*k).to_string(), *v))
                .collect(),
        }
    }
}

/// Detection-method breakdown for one run
#[derive(Debug, Clone, Serialize)]
pub struct QualitySummary {
    pub samples: u64,
    pub mean_confidence: f64,
    pub low_confidence: u64,
    pub method_counts: HashMap<String, u64>,
}
