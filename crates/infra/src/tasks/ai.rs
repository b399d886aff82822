//! AI metadata tasks. Each one writes its own fields of the model's record.

use std::sync::Arc;

use printopt_ai::{non_empty, ComplexityRequest, MetadataGenerator, PrintTimeRequest};
use printopt_core::Lane;

use crate::jobs::{HandlerError, RegistryError, RetryPolicy, TaskDefinition, TaskOutput, TaskRegistry};
use crate::results::MetadataPatch;

use super::{
    decode_payload, require_entity_key, COMPLEXITY_ANALYSIS, MARKET_DESCRIPTION, PRINT_TIME,
    SEO_TITLE, TAGS,
};

pub fn register(
    registry: &mut TaskRegistry,
    generator: Arc<dyn MetadataGenerator>,
) -> Result<(), RegistryError> {
    let def = |task_type: &str| TaskDefinition::new(task_type, Lane::Ai, RetryPolicy::interactive());

    let g = generator.clone();
    registry.register(def(SEO_TITLE), move |task| {
        let model_id = require_entity_key(task)?;
        let title = non_empty("seo_title", g.generate_seo_title(model_id)?)?;
        Ok(TaskOutput::Metadata(MetadataPatch::seo_title(title)))
    })?;

    let g = generator.clone();
    registry.register(def(MARKET_DESCRIPTION), move |task| {
        let model_id = require_entity_key(task)?;
        let description = non_empty("market_description", g.generate_market_description(model_id)?)?;
        Ok(TaskOutput::Metadata(MetadataPatch::market_description(description)))
    })?;

    let g = generator.clone();
    registry.register(def(TAGS), move |task| {
        let model_id = require_entity_key(task)?;
        let tags: Vec<String> = g
            .generate_tags(model_id)?
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if tags.is_empty() {
            return Err(HandlerError::new("generator returned no tags"));
        }
        Ok(TaskOutput::Metadata(MetadataPatch::tags(tags)))
    })?;

    let g = generator.clone();
    registry.register(def(COMPLEXITY_ANALYSIS), move |task| {
        require_entity_key(task)?;
        let request: ComplexityRequest = decode_payload(task)?;
        request.validate()?;
        let report = g.analyze_complexity(&request.model_file_url)?;
        Ok(TaskOutput::Metadata(MetadataPatch::complexity(&report)))
    })?;

    let g = generator;
    registry.register(def(PRINT_TIME), move |task| {
        require_entity_key(task)?;
        let request: PrintTimeRequest = decode_payload(task)?;
        request.validate()?;
        let estimate = g.predict_print_time(&request)?;
        Ok(TaskOutput::Metadata(MetadataPatch::estimated_time(
            estimate.estimated_time_minutes,
        )))
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use printopt_core::EntityKey;
    use serde_json::json;

    use crate::jobs::{InMemoryBroker, RunOutcome, Task, TaskRunner};
    use crate::results::{InMemoryResultStore, ResultStore};
    use crate::tasks::testing::FakeGenerator;

    fn run(task_type: &str, payload: serde_json::Value) -> (RunOutcome, Arc<InMemoryResultStore>) {
        let mut registry = TaskRegistry::new();
        register(&mut registry, Arc::new(FakeGenerator)).unwrap();
        let store = InMemoryResultStore::arc();
        let runner = TaskRunner::new(Arc::new(registry), store.clone());
        let broker = InMemoryBroker::new();

        let task = Task::new(task_type, Lane::Ai, Some(EntityKey::new("m1").unwrap()), payload, 1);
        let outcome = runner.run(&broker, task);
        (outcome, store)
    }

    fn record(store: &InMemoryResultStore) -> crate::results::ModelMetadata {
        store.get(&EntityKey::new("m1").unwrap()).unwrap().unwrap()
    }

    #[test]
    fn seo_title_writes_only_its_field() {
        let (outcome, store) = run(SEO_TITLE, json!({}));
        assert_eq!(outcome, RunOutcome::Succeeded);
        let record = record(&store);
        assert_eq!(record.seo_title.as_deref(), Some("Title for m1"));
        assert!(record.tags.is_none() && record.market_description.is_none());
    }

    #[test]
    fn complexity_writes_mesh_figures() {
        let (outcome, store) = run(COMPLEXITY_ANALYSIS, json!({"model_file_url": "s3://models/m1.stl"}));
        assert_eq!(outcome, RunOutcome::Succeeded);
        let record = record(&store);
        assert_eq!(record.vertices, Some(1200));
        assert_eq!(record.complexity_score, Some(0.4));
    }

    #[test]
    fn print_time_rejects_invalid_input() {
        let payload = json!({
            "model_file_url": "s3://models/m1.stl",
            "material": "PLA",
            "layer_height_mm": 0.2,
            "infill_percent": 150.0
        });
        let (outcome, store) = run(PRINT_TIME, payload);
        assert_eq!(outcome, RunOutcome::Failed);
        assert!(store.is_empty());
    }

    #[test]
    fn print_time_writes_estimate() {
        let payload = json!({
            "model_file_url": "s3://models/m1.stl",
            "material": "PLA",
            "layer_height_mm": 0.2,
            "infill_percent": 20.0
        });
        let (_, store) = run(PRINT_TIME, payload);
        assert_eq!(record(&store).estimated_time_minutes, Some(95.0));
    }

    #[test]
    fn malformed_payload_fails_the_attempt() {
        let (outcome, _) = run(COMPLEXITY_ANALYSIS, json!({"url": 3}));
        assert_eq!(outcome, RunOutcome::Failed);
    }
}
