//! The per-model result record and the partial writes that build it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use printopt_ai::ComplexityReport;
use printopt_core::EntityKey;

/// Accumulated AI metadata of one 3D model.
///
/// Each field is owned by one task type; fields stay `None` until that task
/// type has succeeded at least once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub model_id: EntityKey,
    pub seo_title: Option<String>,
    pub market_description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub vertices: Option<u64>,
    pub polygons: Option<u64>,
    pub file_size_kb: Option<f64>,
    pub complexity_score: Option<f64>,
    pub estimated_time_minutes: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ModelMetadata {
    pub fn empty(model_id: EntityKey) -> Self {
        let now = Utc::now();
        Self {
            model_id,
            seo_title: None,
            market_description: None,
            tags: None,
            vertices: None,
            polygons: None,
            file_size_kb: None,
            complexity_score: None,
            estimated_time_minutes: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Merge a patch: only fields present in the patch are overwritten.
    pub fn apply(&mut self, patch: &MetadataPatch) {
        fn set<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if let Some(v) = value {
                *slot = Some(v.clone());
            }
        }

        set(&mut self.seo_title, &patch.seo_title);
        set(&mut self.market_description, &patch.market_description);
        set(&mut self.tags, &patch.tags);
        set(&mut self.vertices, &patch.vertices);
        set(&mut self.polygons, &patch.polygons);
        set(&mut self.file_size_kb, &patch.file_size_kb);
        set(&mut self.complexity_score, &patch.complexity_score);
        set(&mut self.estimated_time_minutes, &patch.estimated_time_minutes);

        if !patch.is_empty() {
            self.updated_at = Utc::now();
        }
    }
}

/// A partial write to a [`ModelMetadata`] record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataPatch {
    pub seo_title: Option<String>,
    pub market_description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub vertices: Option<u64>,
    pub polygons: Option<u64>,
    pub file_size_kb: Option<f64>,
    pub complexity_score: Option<f64>,
    pub estimated_time_minutes: Option<f64>,
}

impl MetadataPatch {
    pub fn seo_title(title: impl Into<String>) -> Self {
        Self {
            seo_title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn market_description(description: impl Into<String>) -> Self {
        Self {
            market_description: Some(description.into()),
            ..Default::default()
        }
    }

    pub fn tags(tags: Vec<String>) -> Self {
        Self {
            tags: Some(tags),
            ..Default::default()
        }
    }

    pub fn complexity(report: &ComplexityReport) -> Self {
        Self {
            vertices: Some(report.vertices),
            polygons: Some(report.polygons),
            file_size_kb: Some(report.file_size_kb),
            complexity_score: Some(report.complexity_score),
            ..Default::default()
        }
    }

    pub fn estimated_time(minutes: f64) -> Self {
        Self {
            estimated_time_minutes: Some(minutes),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }

    /// Names of the fields this patch writes.
    pub fn fields(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.seo_title.is_some() {
            out.push("seo_title");
        }
        if self.market_description.is_some() {
            out.push("market_description");
        }
        if self.tags.is_some() {
            out.push("tags");
        }
        if self.vertices.is_some() {
            out.push("vertices");
        }
        if self.polygons.is_some() {
            out.push("polygons");
        }
        if self.file_size_kb.is_some() {
            out.push("file_size_kb");
        }
        if self.complexity_score.is_some() {
            out.push("complexity_score");
        }
        if self.estimated_time_minutes.is_some() {
            out.push("estimated_time_minutes");
        }
        out
    }
}
