use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mesh complexity figures produced by model analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexityReport {
    /// Total vertex count.
    pub vertices: u64,
    /// Total polygon count.
    pub polygons: u64,
    /// File size in KiB.
    pub file_size_kb: f64,
    /// Model-specific complexity score.
    pub complexity_score: f64,
}

/// Input of a complexity analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplexityRequest {
    /// URL or path of the 3D model file.
    pub model_file_url: String,
}

impl ComplexityRequest {
    pub fn validate(&self) -> Result<(), AiError> {
        if self.model_file_url.trim().is_empty() {
            return Err(AiError::InvalidInput("model_file_url must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Input of a print-time prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintTimeRequest {
    /// URL or path of the 3D model file.
    pub model_file_url: String,
    /// Printing material (PLA, PETG, ...).
    pub material: String,
    pub layer_height_mm: f64,
    /// Infill percentage in \[0, 100\].
    pub infill_percent: f64,
}

impl PrintTimeRequest {
    pub fn validate(&self) -> Result<(), AiError> {
        if self.model_file_url.trim().is_empty() {
            return Err(AiError::InvalidInput("model_file_url must not be empty".to_string()));
        }
        if self.material.trim().is_empty() {
            return Err(AiError::InvalidInput("material must not be empty".to_string()));
        }
        if !(self.layer_height_mm.is_finite() && self.layer_height_mm > 0.0) {
            return Err(AiError::InvalidInput(
                "layer_height_mm must be a finite positive number".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.infill_percent) {
            return Err(AiError::InvalidInput(
                "infill_percent must be between 0 and 100".to_string(),
            ));
        }
        Ok(())
    }
}

/// Result of a print-time prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintTimeEstimate {
    pub estimated_time_minutes: f64,
}

#[derive(Debug, Error)]
pub enum AiError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("empty response from model for {0}")]
    EmptyResponse(&'static str),

    #[error("inference failed: {0}")]
    InferenceFailed(String),

    #[error("AI backend unavailable: {0}")]
    Unavailable(String),
}

/// Reject blank generator output (trimmed).
pub fn non_empty(operation: &'static str, value: String) -> Result<String, AiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AiError::EmptyResponse(operation));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn print_request() -> PrintTimeRequest {
        PrintTimeRequest {
            model_file_url: "s3://models/vase.stl".to_string(),
            material: "PLA".to_string(),
            layer_height_mm: 0.2,
            infill_percent: 20.0,
        }
    }

    #[test]
    fn print_time_request_accepts_sane_values() {
        assert!(print_request().validate().is_ok());
    }

    #[test]
    fn print_time_request_rejects_out_of_range_infill() {
        let mut req = print_request();
        req.infill_percent = 140.0;
        assert!(matches!(req.validate(), Err(AiError::InvalidInput(_))));
    }

    #[test]
    fn print_time_request_rejects_zero_layer_height() {
        let mut req = print_request();
        req.layer_height_mm = 0.0;
        assert!(req.validate().is_err());
    }

    #[test]
    fn blank_output_is_an_empty_response() {
        assert!(matches!(non_empty("seo_title", "   ".into()), Err(AiError::EmptyResponse("seo_title"))));
        assert_eq!(non_empty("seo_title", " Rocket Vase\n".into()).unwrap(), "Rocket Vase");
    }
}
