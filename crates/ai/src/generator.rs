use std::sync::Arc;

use printopt_core::EntityKey;

use crate::result::{AiError, ComplexityReport, PrintTimeEstimate, PrintTimeRequest};

/// Listing-metadata generator for 3D models.
///
/// This is the boundary to whatever model backend produces the text and
/// estimates. Implementations may call remote services and fail at any time;
/// callers treat every error the same way for retry purposes.
pub trait MetadataGenerator: Send + Sync + 'static {
    /// SEO-friendly listing title (short, marketplace oriented).
    fn generate_seo_title(&self, model_id: &EntityKey) -> Result<String, AiError>;

    /// Marketplace description for the model.
    fn generate_market_description(&self, model_id: &EntityKey) -> Result<String, AiError>;

    /// Content-based tags.
    fn generate_tags(&self, model_id: &EntityKey) -> Result<Vec<String>, AiError>;

    /// Mesh complexity of the model file.
    fn analyze_complexity(&self, model_file_url: &str) -> Result<ComplexityReport, AiError>;

    /// Predicted print duration for the given slicing parameters.
    fn predict_print_time(&self, request: &PrintTimeRequest) -> Result<PrintTimeEstimate, AiError>;
}

impl<G> MetadataGenerator for Arc<G>
where
    G: MetadataGenerator + ?Sized,
{
    fn generate_seo_title(&self, model_id: &EntityKey) -> Result<String, AiError> {
        (**self).generate_seo_title(model_id)
    }

    fn generate_market_description(&self, model_id: &EntityKey) -> Result<String, AiError> {
        (**self).generate_market_description(model_id)
    }

    fn generate_tags(&self, model_id: &EntityKey) -> Result<Vec<String>, AiError> {
        (**self).generate_tags(model_id)
    }

    fn analyze_complexity(&self, model_file_url: &str) -> Result<ComplexityReport, AiError> {
        (**self).analyze_complexity(model_file_url)
    }

    fn predict_print_time(&self, request: &PrintTimeRequest) -> Result<PrintTimeEstimate, AiError> {
        (**self).predict_print_time(request)
    }
}

/// Generator used when no AI backend is configured.
///
/// Every call fails with [`AiError::Unavailable`], so submitted AI tasks end
/// in a definitive FAILURE instead of hanging.
#[derive(Debug, Clone, Default)]
pub struct UnconfiguredGenerator;

impl UnconfiguredGenerator {
    fn unavailable<T>() -> Result<T, AiError> {
        Err(AiError::Unavailable("no AI backend configured".to_string()))
    }
}

impl MetadataGenerator for UnconfiguredGenerator {
    fn generate_seo_title(&self, _model_id: &EntityKey) -> Result<String, AiError> {
        Self::unavailable()
    }

    fn generate_market_description(&self, _model_id: &EntityKey) -> Result<String, AiError> {
        Self::unavailable()
    }

    fn generate_tags(&self, _model_id: &EntityKey) -> Result<Vec<String>, AiError> {
        Self::unavailable()
    }

    fn analyze_complexity(&self, _model_file_url: &str) -> Result<ComplexityReport, AiError> {
        Self::unavailable()
    }

    fn predict_print_time(&self, _request: &PrintTimeRequest) -> Result<PrintTimeEstimate, AiError> {
        Self::unavailable()
    }
}
