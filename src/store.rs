// 🗂️ Mapping Definition Store - owns Mappings
// Saves are all-or-nothing: a mapping is stored only when every rule holds
// against the System Model it references at save time.

use crate::error::{StoreError, StoreResult, ValidationError};
use crate::mapping::{dangling_references, validate_mapping, Mapping};
use crate::notify::{Notification, NotificationSink, TracingSink};
use crate::registry::SchemaRegistry;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

const ENTITY: &str = "Mapping";

/// A stored mapping whose references no longer hold
#[derive(Debug, Clone)]
pub struct StaleMapping {
    pub mapping_id: String,
    pub mapping_name: String,
    pub error: ValidationError,
}

pub struct MappingStore {
    mappings: RwLock<BTreeMap<String, Mapping>>,
    registry: Arc<SchemaRegistry>,
    sink: Arc<dyn NotificationSink>,
}

impl MappingStore {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self::with_sink(registry, Arc::new(TracingSink))
    }

    pub fn with_sink(registry: Arc<SchemaRegistry>, sink: Arc<dyn NotificationSink>) -> Self {
        MappingStore {
            mappings: RwLock::new(BTreeMap::new()),
            registry,
            sink,
        }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Check a mapping against the current registry without storing it
    pub fn validate(&self, mapping: &Mapping) -> Result<(), ValidationError> {
        let model = self.registry.get(&mapping.system_model_id);
        validate_mapping(mapping, model.as_ref())
    }

    /// Put already-persisted mappings back as they were stored.
    /// They are not revalidated here; dangling references surface on the
    /// next save or test run.
    pub fn load<I>(&self, mappings: I) -> usize
    where
        I: IntoIterator<Item = Mapping>,
    {
        let mut map = self.mappings.write().unwrap_or_else(|e| e.into_inner());
        let mut loaded = 0;
        for mapping in mappings {
            map.insert(mapping.id.clone(), mapping);
            loaded += 1;
        }
        debug!("Loaded {} mapping(s)", loaded);
        loaded
    }

    pub fn create(&self, mut mapping: Mapping) -> StoreResult<Mapping> {
        self.stamp_model(&mut mapping)?;

        if mapping.id.trim().is_empty() {
            mapping.id = uuid::Uuid::new_v4().to_string();
        }
        let now = Utc::now();
        mapping.created_at = now;
        mapping.updated_at = now;

        {
            let mut map = self.mappings.write().unwrap_or_else(|e| e.into_inner());
            if map.contains_key(&mapping.id) {
                return Err(StoreError::AlreadyExists {
                    entity: ENTITY,
                    id: mapping.id,
                });
            }
            map.insert(mapping.id.clone(), mapping.clone());
        }

        info!(
            mapping = %mapping.id,
            bank = %mapping.bank_id,
            model = %mapping.system_model_id,
            "Created mapping '{}' with {} field mapping(s)",
            mapping.name,
            mapping.mappings.len()
        );
        self.sink.notify(Notification::success(
            subject(&mapping.id),
            format!("Mapping '{}' created", mapping.name),
        ));
        Ok(mapping)
    }

    /// Replace a mapping's contents. The id in the payload is ignored.
    pub fn update(&self, id: &str, mut mapping: Mapping) -> StoreResult<Mapping> {
        let created_at = match self.get(id) {
            Some(existing) => existing.created_at,
            None => return Err(not_found(id)),
        };

        mapping.id = id.to_string();
        self.stamp_model(&mut mapping)?;
        mapping.created_at = created_at;
        mapping.updated_at = Utc::now();

        {
            let mut map = self.mappings.write().unwrap_or_else(|e| e.into_inner());
            if !map.contains_key(id) {
                return Err(not_found(id));
            }
            map.insert(mapping.id.clone(), mapping.clone());
        }

        info!(mapping = %id, "Updated mapping '{}'", mapping.name);
        self.sink.notify(Notification::success(
            subject(id),
            format!("Mapping '{}' updated", mapping.name),
        ));
        Ok(mapping)
    }

    pub fn delete(&self, id: &str) -> StoreResult<Mapping> {
        let removed = self
            .mappings
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
            .ok_or_else(|| not_found(id))?;

        info!(mapping = %id, "Deleted mapping '{}'", removed.name);
        self.sink.notify(Notification::success(
            subject(id),
            format!("Mapping '{}' deleted", removed.name),
        ));
        Ok(removed)
    }

    pub fn get(&self, id: &str) -> Option<Mapping> {
        self.mappings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    /// All mappings, ordered by id
    pub fn list(&self) -> Vec<Mapping> {
        self.mappings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn list_by_bank(&self, bank_id: &str) -> Vec<Mapping> {
        self.list()
            .into_iter()
            .filter(|m| m.bank_id == bank_id)
            .collect()
    }

    pub fn count(&self) -> usize {
        self.mappings.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Mappings on `model_id` whose field references no longer resolve.
    /// Reports only; nothing is changed.
    pub fn revalidate_against(&self, model_id: &str) -> Vec<StaleMapping> {
        let model = self.registry.get(model_id);
        let mut stale = Vec::new();

        for mapping in self.list().into_iter().filter(|m| m.system_model_id == model_id) {
            let result = match &model {
                Some(model) => {
                    let errors = dangling_references(&mapping, model);
                    if errors.is_empty() {
                        Ok(())
                    } else {
                        Err(ValidationError::new(errors))
                    }
                }
                None => validate_mapping(&mapping, None),
            };
            if let Err(error) = result {
                warn!(mapping = %mapping.id, model = %model_id, "Stale mapping: {}", error);
                stale.push(StaleMapping {
                    mapping_id: mapping.id.clone(),
                    mapping_name: mapping.name.clone(),
                    error,
                });
            }
        }

        stale
    }

    /// Validate and record the model version/fingerprint the mapping was checked against
    fn stamp_model(&self, mapping: &mut Mapping) -> StoreResult<()> {
        let model = self.registry.get(&mapping.system_model_id);
        if let Err(error) = validate_mapping(mapping, model.as_ref()) {
            warn!(mapping = %mapping.id, "Rejected mapping '{}': {}", mapping.name, error);
            self.sink
                .notify(Notification::error(subject(&mapping.id), error.to_string()));
            return Err(StoreError::Validation(error));
        }
        if let Some(model) = model {
            mapping.system_model_version = model.version.clone();
            mapping.system_model_fingerprint = model.fingerprint();
        }
        Ok(())
    }
}

fn subject(id: &str) -> String {
    format!("mapping:{}", id)
}

fn not_found(id: &str) -> StoreError {
    StoreError::NotFound {
        entity: ENTITY,
        id: id.to_string(),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::mapping::{FieldMapping, Transformation};
    use crate::notify::{Level, MemorySink};
    use crate::schema::{DateFormat, Field, SystemModel};

    fn setup() -> (Arc<SchemaRegistry>, MappingStore) {
        let registry = Arc::new(SchemaRegistry::new());
        registry
            .create(
                SystemModel::new(
                    "Trade",
                    "1.0.0",
                    vec![
                        Field::string("tradeId").required(),
                        Field::decimal("amount"),
                        Field::date("settleDate", DateFormat::Iso),
                    ],
                )
                .with_id("trade-v1"),
            )
            .unwrap();
        let store = MappingStore::new(registry.clone());
        (registry, store)
    }

    fn mapping() -> Mapping {
        Mapping::new(
            "Bank A",
            "bank-a",
            "trade-v1",
            vec![Field::string("TRADE_ID"), Field::decimal("AMT"), Field::string("VAL_DATE")],
            vec![
                FieldMapping::direct("TRADE_ID", "tradeId"),
                FieldMapping::direct("AMT", "amount"),
                FieldMapping::with_transformation(
                    "VAL_DATE",
                    "settleDate",
                    Transformation::format_date(DateFormat::DayMonthYearSlash, None),
                ),
            ],
        )
    }

    #[test]
    fn test_create_stamps_model_version_and_fingerprint() {
        let (registry, store) = setup();
        let saved = store.create(mapping()).unwrap();

        let model = registry.get("trade-v1").unwrap();
        assert_eq!(saved.system_model_version, "1.0.0");
        assert_eq!(saved.system_model_fingerprint, model.fingerprint());
        assert_eq!(store.get(&saved.id), Some(saved));
    }

    #[test]
    fn test_create_rejects_duplicate_target_without_storing() {
        let sink = Arc::new(MemorySink::new());
        let (registry, _) = setup();
        let store = MappingStore::with_sink(registry, sink.clone());

        let mut m = mapping();
        m.source_fields.push(Field::string("REF"));
        m.mappings.push(FieldMapping::direct("REF", "tradeId"));

        let err = store.create(m).unwrap_err();
        assert!(err.validation().unwrap().has_code(ErrorCode::DuplicateTarget));
        assert_eq!(store.count(), 0);
        assert_eq!(sink.drain()[0].level, Level::Error);
    }

    #[test]
    fn test_create_rejects_unknown_model() {
        let (_, store) = setup();
        let mut m = mapping();
        m.system_model_id = "missing".into();

        let err = store.create(m).unwrap_err();
        assert_eq!(err.validation().unwrap().codes(), vec![ErrorCode::UnknownSystemModel]);
    }

    #[test]
    fn test_update_rejects_dangling_source_reference() {
        let (_, store) = setup();
        let saved = store.create(mapping()).unwrap();

        // dropping a referenced source field leaves a dangling FieldMapping
        let mut edited = saved.clone();
        edited.source_fields.retain(|f| f.name != "AMT");
        let err = store.update(&saved.id, edited).unwrap_err();

        assert!(err.validation().unwrap().is_referential());
        assert_eq!(store.get(&saved.id), Some(saved));
    }

    #[test]
    fn test_update_preserves_created_at() {
        let (_, store) = setup();
        let saved = store.create(mapping()).unwrap();

        let mut edited = mapping();
        edited.name = "Bank A v2".into();
        let updated = store.update(&saved.id, edited).unwrap();

        assert_eq!(updated.id, saved.id);
        assert_eq!(updated.created_at, saved.created_at);
        assert_eq!(store.get(&saved.id).unwrap().name, "Bank A v2");
    }

    #[test]
    fn test_delete_list_and_filter_by_bank() {
        let (_, store) = setup();
        let a = store.create(mapping()).unwrap();
        let mut other = mapping();
        other.bank_id = "bank-b".into();
        store.create(other).unwrap();

        assert_eq!(store.list_by_bank("bank-b").len(), 1);
        store.delete(&a.id).unwrap();
        assert_eq!(store.count(), 1);
        assert!(matches!(store.delete(&a.id), Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn test_revalidate_reports_mappings_broken_by_model_change() {
        let (registry, store) = setup();
        let saved = store.create(mapping()).unwrap();
        assert!(store.revalidate_against("trade-v1").is_empty());

        let mut model = registry.get("trade-v1").unwrap();
        model.fields.retain(|f| f.name != "amount");
        registry.update("trade-v1", model).unwrap();

        let stale = store.revalidate_against("trade-v1");
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].mapping_id, saved.id);
        assert!(stale[0].error.has_code(ErrorCode::UnknownTargetField));

        registry.delete("trade-v1").unwrap();
        let stale = store.revalidate_against("trade-v1");
        assert!(stale[0].error.has_code(ErrorCode::UnknownSystemModel));
    }
}
