// 🏛️ Schema Registry - owns System Models
// Every write is validated in full before anything is stored.

use crate::constraints;
use crate::error::{ErrorCode, FieldError, StoreError, StoreResult, ValidationError};
use crate::notify::{Notification, NotificationSink, TracingSink};
use crate::schema::{DateFormat, Field, SystemModel};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

const ENTITY: &str = "System model";

/// Registry of System Models keyed by id
pub struct SchemaRegistry {
    models: RwLock<BTreeMap<String, SystemModel>>,
    sink: Arc<dyn NotificationSink>,
}

impl SchemaRegistry {
    /// Empty registry that reports through `tracing`
    pub fn new() -> Self {
        Self::with_sink(Arc::new(TracingSink))
    }

    pub fn with_sink(sink: Arc<dyn NotificationSink>) -> Self {
        SchemaRegistry {
            models: RwLock::new(BTreeMap::new()),
            sink,
        }
    }

    /// Registry seeded with the built-in FX Forward model
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.seed_defaults();
        registry
    }

    /// Add the built-in models that are not present yet
    pub fn seed_defaults(&self) -> Vec<SystemModel> {
        let mut seeded = Vec::new();
        for model in default_models() {
            if self.get(&model.id).is_some() {
                continue;
            }
            match self.create(model) {
                Ok(m) => seeded.push(m),
                Err(e) => warn!("Failed to seed default model: {}", e),
            }
        }
        seeded
    }

    /// Put already-persisted models back without restamping them.
    /// Invalid models are skipped and reported.
    pub fn load<I>(&self, models: I) -> usize
    where
        I: IntoIterator<Item = SystemModel>,
    {
        let mut loaded = 0;
        let mut map = self.models.write().unwrap_or_else(|e| e.into_inner());
        for model in models {
            if let Err(e) = check_model(&model) {
                warn!(model = %model.id, "Skipping invalid stored model: {}", e);
                continue;
            }
            map.insert(model.id.clone(), model);
            loaded += 1;
        }
        debug!("Loaded {} system model(s)", loaded);
        loaded
    }

    pub fn create(&self, mut model: SystemModel) -> StoreResult<SystemModel> {
        if let Err(e) = check_model(&model) {
            return Err(self.reject(&model.id, e));
        }

        if model.id.trim().is_empty() {
            model.id = uuid::Uuid::new_v4().to_string();
        }
        let now = Utc::now();
        model.created_at = now;
        model.updated_at = now;

        {
            let mut map = self.models.write().unwrap_or_else(|e| e.into_inner());
            if map.contains_key(&model.id) {
                return Err(StoreError::AlreadyExists {
                    entity: ENTITY,
                    id: model.id,
                });
            }
            map.insert(model.id.clone(), model.clone());
        }

        info!(model = %model.id, version = %model.version, "Created system model '{}'", model.name);
        self.sink.notify(Notification::success(
            subject(&model.id),
            format!("System model '{}' created", model.name),
        ));
        Ok(model)
    }

    /// Replace a model's contents. The id in the payload is ignored.
    pub fn update(&self, id: &str, mut model: SystemModel) -> StoreResult<SystemModel> {
        let created_at = match self.get(id) {
            Some(existing) => existing.created_at,
            None => return Err(not_found(id)),
        };

        if let Err(e) = check_model(&model) {
            return Err(self.reject(id, e));
        }

        model.id = id.to_string();
        model.created_at = created_at;
        model.updated_at = Utc::now();

        {
            let mut map = self.models.write().unwrap_or_else(|e| e.into_inner());
            if !map.contains_key(id) {
                return Err(not_found(id));
            }
            map.insert(model.id.clone(), model.clone());
        }

        info!(model = %model.id, version = %model.version, "Updated system model '{}'", model.name);
        self.sink.notify(Notification::success(
            subject(id),
            format!("System model '{}' updated", model.name),
        ));
        Ok(model)
    }

    /// Remove a model. Mappings that still reference it are not checked here.
    pub fn delete(&self, id: &str) -> StoreResult<SystemModel> {
        let removed = self
            .models
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
            .ok_or_else(|| not_found(id))?;

        info!(model = %id, "Deleted system model '{}'", removed.name);
        self.sink.notify(Notification::success(
            subject(id),
            format!("System model '{}' deleted", removed.name),
        ));
        Ok(removed)
    }

    pub fn get(&self, id: &str) -> Option<SystemModel> {
        self.models
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    /// All models, ordered by id
    pub fn list(&self) -> Vec<SystemModel> {
        self.models
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.models.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn reject(&self, id: &str, error: ValidationError) -> StoreError {
        warn!(model = %id, "Rejected system model: {}", error);
        self.sink.notify(Notification::error(subject(id), error.to_string()));
        StoreError::Validation(error)
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn subject(id: &str) -> String {
    format!("system_model:{}", id)
}

fn not_found(id: &str) -> StoreError {
    StoreError::NotFound {
        entity: ENTITY,
        id: id.to_string(),
    }
}

/// Name plus every field rule; all offending fields are reported together
fn check_model(model: &SystemModel) -> Result<(), ValidationError> {
    let mut errors = Vec::new();
    if model.name.trim().is_empty() {
        errors.push(FieldError::new(
            "name",
            ErrorCode::EmptyName,
            "system model name must not be empty",
        ));
    }
    errors.extend(constraints::validate_field_set(&model.fields));

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::new(errors))
    }
}

// ============================================================================
// BUILT-IN MODELS
// ============================================================================

/// FX Forward trade model shipped with every new registry
pub fn fx_forward_model() -> SystemModel {
    SystemModel::new(
        "FX Forward",
        "1.0.0",
        vec![
            Field::string("tradeId")
                .required()
                .with_description("Unique identifier for the trade"),
            Field::string("baseCurrency")
                .required()
                .with_description("Base currency of the FX pair"),
            Field::string("quoteCurrency")
                .required()
                .with_description("Quote currency of the FX pair"),
            Field::decimal("amount")
                .required()
                .with_description("Amount of base currency"),
            Field::decimal("rate")
                .required()
                .with_description("Exchange rate"),
            Field::date("valueDate", DateFormat::Iso)
                .required()
                .with_description("Value date for the trade"),
            Field::enumeration("direction", ["BUY", "SELL"])
                .required()
                .with_description("Trade direction (BUY or SELL)"),
        ],
    )
    .with_id("fx-forward-v1")
    .with_description("Standard model for FX Forward trades")
}

fn default_models() -> Vec<SystemModel> {
    vec![fx_forward_model()]
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{Level, MemorySink};
    use crate::schema::{FieldType, StringConstraints};

    fn trade() -> SystemModel {
        SystemModel::new(
            "Trade",
            "1.0.0",
            vec![Field::string("tradeId").required(), Field::decimal("amount")],
        )
    }

    #[test]
    fn test_create_assigns_id_and_timestamps() {
        let registry = SchemaRegistry::new();
        let created = registry.create(trade()).unwrap();

        assert!(!created.id.is_empty());
        assert_eq!(created.created_at, created.updated_at);
        assert_eq!(registry.get(&created.id), Some(created.clone()));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_create_keeps_caller_id_and_rejects_duplicates() {
        let registry = SchemaRegistry::new();
        registry.create(trade().with_id("trade-v1")).unwrap();

        let err = registry.create(trade().with_id("trade-v1")).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[test]
    fn test_create_rejects_every_offending_field() {
        let sink = Arc::new(MemorySink::new());
        let registry = SchemaRegistry::with_sink(sink.clone());

        let bad = SystemModel::new(
            "Bad",
            "1",
            vec![
                Field::new(
                    "code",
                    FieldType::String(StringConstraints {
                        min_length: Some(5),
                        max_length: Some(1),
                        format: Some("(".into()),
                    }),
                ),
                Field::enumeration("side", Vec::<String>::new()),
            ],
        );

        let err = registry.create(bad).unwrap_err();
        let validation = err.validation().unwrap();
        assert!(validation.has_code(ErrorCode::MinGtMax));
        assert!(validation.has_code(ErrorCode::InvalidRegex));
        assert!(validation.has_code(ErrorCode::EmptyEnum));
        assert_eq!(registry.count(), 0);

        let events = sink.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].level, Level::Error);
    }

    #[test]
    fn test_update_preserves_created_at_and_refreshes_updated_at() {
        let registry = SchemaRegistry::new();
        let created = registry.create(trade()).unwrap();

        let mut changed = trade().with_id("ignored");
        changed.version = "1.1.0".into();
        changed.fields.push(Field::date("settleDate", DateFormat::Iso));
        let updated = registry.update(&created.id, changed).unwrap();

        assert_eq!(updated.id, created.id);
        assert_eq!(updated.created_at, created.created_at);
        assert!(updated.updated_at >= created.updated_at);
        assert_eq!(registry.get(&created.id).unwrap().fields.len(), 3);
        assert!(registry.get("ignored").is_none());
    }

    #[test]
    fn test_invalid_update_leaves_model_untouched() {
        let registry = SchemaRegistry::new();
        let created = registry.create(trade()).unwrap();

        let mut dup = trade();
        dup.fields.push(Field::string("tradeId"));
        let err = registry.update(&created.id, dup).unwrap_err();

        assert!(err.validation().unwrap().has_code(ErrorCode::DuplicateField));
        assert_eq!(registry.get(&created.id), Some(created));
    }

    #[test]
    fn test_update_and_delete_unknown_id() {
        let registry = SchemaRegistry::new();
        assert!(matches!(registry.update("nope", trade()), Err(StoreError::NotFound { .. })));
        assert!(matches!(registry.delete("nope"), Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn test_delete_and_list() {
        let registry = SchemaRegistry::new();
        let a = registry.create(trade().with_id("a")).unwrap();
        registry.create(trade().with_id("b")).unwrap();

        registry.delete(&a.id).unwrap();
        let ids: Vec<String> = registry.list().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["b".to_string()]);
    }

    #[test]
    fn test_defaults_seed_fx_forward_once() {
        let registry = SchemaRegistry::with_defaults();
        let fx = registry.get("fx-forward-v1").unwrap();
        assert_eq!(fx.fields.len(), 7);
        assert!(fx.field("direction").is_some());

        assert!(registry.seed_defaults().is_empty());
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_load_keeps_timestamps_and_skips_invalid() {
        let registry = SchemaRegistry::new();
        let mut stored = trade().with_id("stored");
        stored.created_at = chrono::DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut broken = trade().with_id("broken");
        broken.name = String::new();

        assert_eq!(registry.load(vec![stored.clone(), broken]), 1);
        assert_eq!(registry.get("stored").unwrap().created_at, stored.created_at);
    }
}
