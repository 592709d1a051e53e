// 🧪 Execution / Test Runner - apply a Mapping to one input record
// Per-field failures become diagnostics; only structural faults abort a run.
// Nothing is persisted.

use crate::engine;
use crate::error::{StructuralError, TransformErrorKind, TransformationError};
use crate::mapping::{dangling_references, FieldMapping, Mapping, Transformation};
use crate::registry::SchemaRegistry;
use crate::schema::SystemModel;
use crate::store::MappingStore;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::panic;
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

// ============================================================================
// RESULT TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    Transformation(TransformErrorKind),
    /// The FieldMapping names a field that no longer exists
    DanglingReference,
}

impl DiagnosticKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticKind::Transformation(kind) => kind.as_str(),
            DiagnosticKind::DanglingReference => "DanglingReference",
        }
    }
}

impl Serialize for DiagnosticKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One per-field failure
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub field: String,
    pub source_field: String,
    pub target_field: String,
    pub error_kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    fn from_error(fm: &FieldMapping, error: TransformationError) -> Self {
        Diagnostic {
            field: fm.target_field.clone(),
            source_field: fm.source_field.clone(),
            target_field: fm.target_field.clone(),
            error_kind: DiagnosticKind::Transformation(error.kind),
            message: error.message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestResult {
    pub input: Value,
    pub output: Map<String, Value>,
    pub diagnostics: Vec<Diagnostic>,
}

impl TestResult {
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

// ============================================================================
// RUNNER
// ============================================================================

pub struct TestRunner {
    registry: Arc<SchemaRegistry>,
    /// Treat dangling references as fatal instead of per-field diagnostics
    fail_on_drift: bool,
}

impl TestRunner {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        TestRunner {
            registry,
            fail_on_drift: false,
        }
    }

    /// Builder: make schema drift fatal
    pub fn fail_on_drift(mut self, enabled: bool) -> Self {
        self.fail_on_drift = enabled;
        self
    }

    /// Run a stored mapping by id
    pub fn run_stored(
        &self,
        store: &MappingStore,
        mapping_id: &str,
        input: &Value,
    ) -> Result<TestResult, StructuralError> {
        let mapping = store
            .get(mapping_id)
            .ok_or_else(|| StructuralError::UnknownMapping(mapping_id.to_string()))?;
        self.run(&mapping, input)
    }

    /// Apply every FieldMapping of `mapping` to one input record
    pub fn run(&self, mapping: &Mapping, input: &Value) -> Result<TestResult, StructuralError> {
        let model = self.resolve(mapping)?;
        let result = evaluate(mapping, &model, input)?;

        info!(
            mapping = %mapping.id,
            outputs = result.output.len(),
            diagnostics = result.diagnostics.len(),
            "Test run finished"
        );
        Ok(result)
    }

    /// Evaluate many records against one mapping on scoped worker threads.
    /// Results keep input order.
    pub fn run_batch(
        &self,
        mapping: &Mapping,
        records: &[Value],
    ) -> Result<Vec<Result<TestResult, StructuralError>>, StructuralError> {
        let model = self.resolve(mapping)?;
        let model = &model;
        let results = map_in_order(records, |record| evaluate(mapping, model, record));

        info!(mapping = %mapping.id, records = results.len(), "Batch run finished");
        Ok(results)
    }

    fn resolve(&self, mapping: &Mapping) -> Result<SystemModel, StructuralError> {
        let model = self
            .registry
            .get(&mapping.system_model_id)
            .ok_or_else(|| StructuralError::UnknownSystemModel(mapping.system_model_id.clone()))?;

        if !mapping.system_model_fingerprint.is_empty()
            && mapping.system_model_fingerprint != model.fingerprint()
        {
            warn!(
                mapping = %mapping.id,
                model = %model.id,
                saved_version = %mapping.system_model_version,
                current_version = %model.version,
                "System model fields changed since the mapping was saved"
            );
        }

        if self.fail_on_drift {
            let dangling = dangling_references(mapping, &model);
            if !dangling.is_empty() {
                let details = dangling
                    .iter()
                    .map(|e| e.message.clone())
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(StructuralError::SchemaDrift {
                    mapping: mapping.id.clone(),
                    model: model.id.clone(),
                    details,
                });
            }
        }

        Ok(model)
    }
}

/// Apply `f` to every item on scoped worker threads, keeping input order.
/// A panic in any worker is re-raised on the calling thread.
fn map_in_order<T, R, F>(items: &[T], f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync,
{
    if items.is_empty() {
        return Vec::new();
    }

    let workers = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(items.len());
    let chunk_size = items.len().div_ceil(workers);

    thread::scope(|scope| {
        let f = &f;
        let handles: Vec<_> = items
            .chunks(chunk_size)
            .map(|chunk| scope.spawn(move || chunk.iter().map(f).collect::<Vec<_>>()))
            .collect();

        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap_or_else(|e| panic::resume_unwind(e)))
            .collect()
    })
}

/// Pure evaluation of one record once the model is resolved
pub fn evaluate(
    mapping: &Mapping,
    model: &SystemModel,
    input: &Value,
) -> Result<TestResult, StructuralError> {
    let record = match input {
        Value::Object(map) => map,
        other => return Err(StructuralError::MalformedInput(json_type(other).to_string())),
    };

    let direct = Transformation::Direct;
    let mut output = Map::new();
    let mut diagnostics = Vec::new();
    let mut covered = HashSet::new();

    for fm in &mapping.mappings {
        covered.insert(fm.target_field.as_str());

        let target = match model.field(&fm.target_field) {
            Some(t) => t,
            None => {
                diagnostics.push(dangling(fm, format!(
                    "target field '{}' is not in system model '{}'",
                    fm.target_field, model.id
                )));
                continue;
            }
        };
        if mapping.source_field(&fm.source_field).is_none() {
            diagnostics.push(dangling(fm, format!(
                "source field '{}' is not in the source field set",
                fm.source_field
            )));
            continue;
        }

        let raw = record.get(&fm.source_field).cloned().unwrap_or(Value::Null);
        let transformation = fm.transformation.as_ref().unwrap_or(&direct);

        match engine::apply(transformation, &raw, target) {
            Ok(value) => {
                debug!(source = %fm.source_field, target = %fm.target_field, "Mapped value");
                output.insert(fm.target_field.clone(), value.to_json());
            }
            Err(error) => diagnostics.push(Diagnostic::from_error(fm, error)),
        }
    }

    // Required model fields no FieldMapping produces
    for field in model.fields.iter().filter(|f| f.required) {
        if !covered.contains(field.name.as_str()) {
            diagnostics.push(Diagnostic {
                field: field.name.clone(),
                source_field: String::new(),
                target_field: field.name.clone(),
                error_kind: DiagnosticKind::Transformation(TransformErrorKind::MissingRequiredField),
                message: format!("Required field '{}' is not mapped", field.name),
            });
        }
    }

    Ok(TestResult {
        input: input.clone(),
        output,
        diagnostics,
    })
}

fn dangling(fm: &FieldMapping, message: String) -> Diagnostic {
    Diagnostic {
        field: fm.target_field.clone(),
        source_field: fm.source_field.clone(),
        target_field: fm.target_field.clone(),
        error_kind: DiagnosticKind::DanglingReference,
        message,
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// TESTS
// ============================================================================
