// 🧭 Mapping Builder - authoring workflow for a draft Mapping
// Field add/edit and source→target pairing are explicit states, so an
// out-of-order action is an error instead of a silent no-op.

use crate::constraints;
use crate::error::{ErrorCode, FieldError, ValidationError};
use crate::mapping::{validate_mapping, FieldMapping, Mapping, Transformation};
use crate::notify::{Level, Notification, NotificationSink, TracingSink};
use crate::schema::{Field, SystemModel};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuilderState {
    Idle,
    AddingField,
    EditingField(usize),
    /// A source→target pair is half chosen
    AwaitingMappingPair {
        source: Option<String>,
        target: Option<String>,
    },
}

impl BuilderState {
    pub fn title(&self) -> &str {
        match self {
            BuilderState::Idle => "idle",
            BuilderState::AddingField => "adding a field",
            BuilderState::EditingField(_) => "editing a field",
            BuilderState::AwaitingMappingPair { .. } => "choosing a mapping pair",
        }
    }
}

impl fmt::Display for BuilderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuilderError {
    #[error("cannot {action} while {state}")]
    InvalidTransition { action: &'static str, state: String },

    #[error("{what} index {index} is out of range")]
    OutOfRange { what: &'static str, index: usize },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

pub type BuilderResult<T> = Result<T, BuilderError>;

/// Draft mapping plus the authoring state around it
pub struct MappingBuilder {
    draft: Mapping,
    model: SystemModel,
    state: BuilderState,
    sink: Arc<dyn NotificationSink>,
}

impl MappingBuilder {
    /// Start an empty draft against `model`
    pub fn new(name: impl Into<String>, bank_id: impl Into<String>, model: SystemModel) -> Self {
        let draft = Mapping::new(name, bank_id, model.id.clone(), Vec::new(), Vec::new());
        Self::from_mapping(draft, model)
    }

    /// Edit an existing mapping
    pub fn from_mapping(draft: Mapping, model: SystemModel) -> Self {
        MappingBuilder {
            draft,
            model,
            state: BuilderState::Idle,
            sink: Arc::new(TracingSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn state(&self) -> &BuilderState {
        &self.state
    }

    pub fn draft(&self) -> &Mapping {
        &self.draft
    }

    pub fn model(&self) -> &SystemModel {
        &self.model
    }

    // ------------------------------------------------------------------
    // Source fields
    // ------------------------------------------------------------------

    pub fn begin_add_field(&mut self) -> BuilderResult<()> {
        self.require_idle("add a field")?;
        self.state = BuilderState::AddingField;
        Ok(())
    }

    pub fn begin_edit_field(&mut self, index: usize) -> BuilderResult<()> {
        self.require_idle("edit a field")?;
        if index >= self.draft.source_fields.len() {
            return Err(BuilderError::OutOfRange { what: "source field", index });
        }
        self.state = BuilderState::EditingField(index);
        Ok(())
    }

    /// Finish an add or edit. A rejected field leaves the state unchanged.
    pub fn commit_field(&mut self, field: Field) -> BuilderResult<()> {
        let editing = match self.state {
            BuilderState::AddingField => None,
            BuilderState::EditingField(i) => Some(i),
            _ => return Err(self.invalid("commit a field")),
        };

        let mut errors = Vec::new();
        if field.name.trim().is_empty() {
            errors.push(FieldError::new(
                "name",
                ErrorCode::EmptyFieldName,
                "field name must not be empty",
            ));
        }
        let clash = self
            .draft
            .source_fields
            .iter()
            .enumerate()
            .any(|(i, f)| Some(i) != editing && f.name == field.name);
        if clash {
            errors.push(FieldError::new(
                &field.name,
                ErrorCode::DuplicateField,
                format!("source field '{}' already exists", field.name),
            ));
        }
        if let Some(i) = editing {
            let old = &self.draft.source_fields[i].name;
            if *old != field.name && self.draft.is_source_referenced(old) {
                errors.push(in_use(old));
            }
        }
        errors.extend(constraints::validate(&field));
        if !errors.is_empty() {
            return Err(ValidationError::new(errors).into());
        }

        debug!(field = %field.name, "Committed source field");
        match editing {
            Some(i) => self.draft.source_fields[i] = field,
            None => self.draft.source_fields.push(field),
        }
        self.state = BuilderState::Idle;
        Ok(())
    }

    /// Abandon the current add, edit or half-chosen pair
    pub fn cancel(&mut self) {
        self.state = BuilderState::Idle;
    }

    pub fn remove_source_field(&mut self, name: &str) -> BuilderResult<Field> {
        self.require_idle("remove a field")?;
        if self.draft.is_source_referenced(name) {
            let error = ValidationError::single(in_use(name));
            self.emit(Level::Warning, error.to_string());
            return Err(error.into());
        }
        let index = self
            .draft
            .source_fields
            .iter()
            .position(|f| f.name == name)
            .ok_or_else(|| {
                ValidationError::single(FieldError::new(
                    name,
                    ErrorCode::UnknownSourceField,
                    format!("source field '{}' does not exist", name),
                ))
            })?;
        Ok(self.draft.source_fields.remove(index))
    }

    // ------------------------------------------------------------------
    // Field mappings
    // ------------------------------------------------------------------

    /// Choose the source side. Returns the new FieldMapping index once both
    /// sides are chosen.
    pub fn select_source(&mut self, name: &str) -> BuilderResult<Option<usize>> {
        let target = self.pair_in_progress("select a source field")?.1;

        if self.draft.source_field(name).is_none() {
            return Err(reference_error(name, ErrorCode::UnknownSourceField, "source field does not exist"));
        }
        if self.draft.is_source_referenced(name) {
            return Err(reference_error(name, ErrorCode::DuplicateSource, "source field is already mapped"));
        }

        self.advance_pair(Some(name.to_string()), target)
    }

    /// Choose the target side. Returns the new FieldMapping index once both
    /// sides are chosen.
    pub fn select_target(&mut self, name: &str) -> BuilderResult<Option<usize>> {
        let source = self.pair_in_progress("select a target field")?.0;

        if !self.model.has_field(name) {
            return Err(reference_error(name, ErrorCode::UnknownTargetField, "target field is not in the system model"));
        }
        if self.draft.mappings.iter().any(|m| m.target_field == name) {
            return Err(reference_error(name, ErrorCode::DuplicateTarget, "target field is already mapped"));
        }

        self.advance_pair(source, Some(name.to_string()))
    }

    /// Set or clear (None = direct) the transformation of one FieldMapping
    pub fn set_transformation(
        &mut self,
        index: usize,
        transformation: Option<Transformation>,
    ) -> BuilderResult<()> {
        self.require_idle("set a transformation")?;
        let fm = self
            .draft
            .mappings
            .get(index)
            .ok_or(BuilderError::OutOfRange { what: "mapping", index })?;

        if let (Some(t), Some(target)) = (&transformation, self.model.field(&fm.target_field)) {
            let label = format!("mappings[{}]", index);
            if !t.kind().compatible_with(target.data_type()) {
                return Err(ValidationError::single(FieldError::new(
                    label,
                    ErrorCode::IncompatibleTransformation,
                    format!(
                        "{} cannot produce a value for {} field '{}'",
                        t.kind(),
                        target.data_type(),
                        target.name
                    ),
                ))
                .into());
            }
            if let Some(problem) = t.problems().into_iter().next() {
                return Err(ValidationError::single(FieldError::new(
                    label,
                    ErrorCode::InvalidTransformation,
                    problem,
                ))
                .into());
            }
        }

        self.draft.mappings[index].transformation = transformation;
        Ok(())
    }

    pub fn remove_mapping(&mut self, index: usize) -> BuilderResult<FieldMapping> {
        self.require_idle("remove a mapping")?;
        if index >= self.draft.mappings.len() {
            return Err(BuilderError::OutOfRange { what: "mapping", index });
        }
        Ok(self.draft.mappings.remove(index))
    }

    pub fn unmapped_sources(&self) -> Vec<&Field> {
        self.draft
            .source_fields
            .iter()
            .filter(|f| !self.draft.is_source_referenced(&f.name))
            .collect()
    }

    pub fn unmapped_targets(&self) -> Vec<&Field> {
        self.model
            .fields
            .iter()
            .filter(|f| !self.draft.mappings.iter().any(|m| m.target_field == f.name))
            .collect()
    }

    /// Validate the whole draft. Only a fully valid draft comes back.
    pub fn build(&self) -> BuilderResult<Mapping> {
        self.require_idle("build the mapping")?;
        match validate_mapping(&self.draft, Some(&self.model)) {
            Ok(()) => {
                self.emit(
                    Level::Success,
                    format!("Mapping '{}' is ready to save", self.draft.name),
                );
                Ok(self.draft.clone())
            }
            Err(error) => {
                self.emit(Level::Error, error.to_string());
                Err(error.into())
            }
        }
    }

    fn pair_in_progress(&self, action: &'static str) -> BuilderResult<(Option<String>, Option<String>)> {
        match &self.state {
            BuilderState::Idle => Ok((None, None)),
            BuilderState::AwaitingMappingPair { source, target } => Ok((source.clone(), target.clone())),
            _ => Err(self.invalid(action)),
        }
    }

    fn advance_pair(&mut self, source: Option<String>, target: Option<String>) -> BuilderResult<Option<usize>> {
        match (source, target) {
            (Some(source), Some(target)) => {
                self.emit(Level::Info, format!("Mapped '{}' → '{}'", source, target));
                self.draft.mappings.push(FieldMapping::direct(source, target));
                self.state = BuilderState::Idle;
                Ok(Some(self.draft.mappings.len() - 1))
            }
            (source, target) => {
                self.state = BuilderState::AwaitingMappingPair { source, target };
                Ok(None)
            }
        }
    }

    fn require_idle(&self, action: &'static str) -> BuilderResult<()> {
        if self.state == BuilderState::Idle {
            Ok(())
        } else {
            Err(self.invalid(action))
        }
    }

    fn invalid(&self, action: &'static str) -> BuilderError {
        BuilderError::InvalidTransition {
            action,
            state: self.state.to_string(),
        }
    }

    fn emit(&self, level: Level, message: String) {
        let subject = if self.draft.id.is_empty() {
            "mapping:draft".to_string()
        } else {
            format!("mapping:{}", self.draft.id)
        };
        self.sink.notify(Notification::new(level, subject, message));
    }
}

fn in_use(name: &str) -> FieldError {
    FieldError::new(
        name,
        ErrorCode::FieldInUse,
        format!("source field '{}' is referenced by a mapping", name),
    )
}

fn reference_error(name: &str, code: ErrorCode, message: &str) -> BuilderError {
    ValidationError::single(FieldError::new(name, code, message)).into()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::CaseType;
    use crate::notify::MemorySink;
    use crate::schema::DateFormat;

    fn model() -> SystemModel {
        SystemModel::new(
            "Trade",
            "1.0.0",
            vec![
                Field::string("tradeId").required(),
                Field::decimal("amount"),
                Field::date("settleDate", DateFormat::Iso),
            ],
        )
        .with_id("trade-v1")
    }

    fn builder_with_fields() -> MappingBuilder {
        let mut b = MappingBuilder::new("Bank A", "bank-a", model());
        for field in [Field::string("TRADE_ID"), Field::decimal("AMT"), Field::string("VAL_DATE")] {
            b.begin_add_field().unwrap();
            b.commit_field(field).unwrap();
        }
        b
    }

    fn codes(err: BuilderError) -> Vec<ErrorCode> {
        match err {
            BuilderError::Validation(v) => v.codes(),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_add_and_edit_fields() {
        let mut b = builder_with_fields();
        assert_eq!(b.draft().source_fields.len(), 3);

        b.begin_edit_field(1).unwrap();
        assert_eq!(b.state(), &BuilderState::EditingField(1));
        b.commit_field(Field::decimal("AMOUNT")).unwrap();
        assert_eq!(b.draft().source_fields[1].name, "AMOUNT");
        assert_eq!(b.state(), &BuilderState::Idle);
    }

    #[test]
    fn test_commit_rejects_duplicate_and_keeps_state() {
        let mut b = builder_with_fields();
        b.begin_add_field().unwrap();

        let err = b.commit_field(Field::string("AMT")).unwrap_err();
        assert_eq!(codes(err), vec![ErrorCode::DuplicateField]);
        assert_eq!(b.state(), &BuilderState::AddingField);

        b.cancel();
        assert_eq!(b.state(), &BuilderState::Idle);
    }

    #[test]
    fn test_out_of_order_actions_are_invalid_transitions() {
        let mut b = builder_with_fields();
        assert!(matches!(
            b.commit_field(Field::string("X")),
            Err(BuilderError::InvalidTransition { .. })
        ));

        b.begin_add_field().unwrap();
        assert!(matches!(b.select_source("AMT"), Err(BuilderError::InvalidTransition { .. })));
        assert!(matches!(b.build(), Err(BuilderError::InvalidTransition { .. })));
        assert!(matches!(b.begin_edit_field(9), Err(BuilderError::InvalidTransition { .. })));
    }

    #[test]
    fn test_pairing_in_either_order() {
        let mut b = builder_with_fields();

        assert_eq!(b.select_source("TRADE_ID").unwrap(), None);
        assert_eq!(
            b.state(),
            &BuilderState::AwaitingMappingPair { source: Some("TRADE_ID".into()), target: None }
        );
        assert_eq!(b.select_target("tradeId").unwrap(), Some(0));

        assert_eq!(b.select_target("amount").unwrap(), None);
        assert_eq!(b.select_source("AMT").unwrap(), Some(1));
        assert_eq!(b.state(), &BuilderState::Idle);

        let unmapped: Vec<&str> = b.unmapped_targets().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(unmapped, vec!["settleDate"]);
        assert_eq!(b.unmapped_sources()[0].name, "VAL_DATE");
    }

    #[test]
    fn test_pairing_rejects_mapped_and_unknown_names() {
        let mut b = builder_with_fields();
        b.select_source("TRADE_ID").unwrap();
        b.select_target("tradeId").unwrap();

        assert_eq!(codes(b.select_source("TRADE_ID").unwrap_err()), vec![ErrorCode::DuplicateSource]);
        assert_eq!(codes(b.select_target("tradeId").unwrap_err()), vec![ErrorCode::DuplicateTarget]);
        assert_eq!(codes(b.select_target("desk").unwrap_err()), vec![ErrorCode::UnknownTargetField]);
        assert_eq!(codes(b.select_source("NOPE").unwrap_err()), vec![ErrorCode::UnknownSourceField]);
    }

    #[test]
    fn test_referenced_field_cannot_be_removed() {
        let sink = Arc::new(MemorySink::new());
        let mut b = builder_with_fields().with_sink(sink.clone());
        b.select_source("AMT").unwrap();
        b.select_target("amount").unwrap();

        assert_eq!(codes(b.remove_source_field("AMT").unwrap_err()), vec![ErrorCode::FieldInUse]);
        assert!(sink.drain().iter().any(|n| n.level == Level::Warning));

        b.remove_mapping(0).unwrap();
        assert_eq!(b.remove_source_field("AMT").unwrap().name, "AMT");
    }

    #[test]
    fn test_set_transformation_checks_target_type() {
        let mut b = builder_with_fields();
        b.select_source("VAL_DATE").unwrap();
        let idx = b.select_target("settleDate").unwrap().unwrap();

        let err = b.set_transformation(idx, Some(Transformation::case(CaseType::Upper))).unwrap_err();
        assert_eq!(codes(err), vec![ErrorCode::IncompatibleTransformation]);

        b.set_transformation(idx, Some(Transformation::format_date(DateFormat::DayMonthYearSlash, None)))
            .unwrap();
        assert!(b.draft().mappings[idx].transformation.is_some());
        assert!(matches!(
            b.set_transformation(7, None),
            Err(BuilderError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_build_only_when_valid() {
        let sink = Arc::new(MemorySink::new());
        let mut b = MappingBuilder::new("Bank A", "bank-a", model()).with_sink(sink.clone());

        let err = b.build().unwrap_err();
        assert_eq!(codes(err), vec![ErrorCode::EmptySourceFields]);

        b.begin_add_field().unwrap();
        b.commit_field(Field::string("TRADE_ID")).unwrap();
        b.select_source("TRADE_ID").unwrap();
        b.select_target("tradeId").unwrap();

        let mapping = b.build().unwrap();
        assert_eq!(mapping.mappings.len(), 1);
        assert_eq!(mapping.system_model_id, "trade-v1");
        assert_eq!(sink.drain().last().unwrap().level, Level::Success);
    }
}
