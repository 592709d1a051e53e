// Source Mapper - Core Library
// Schema registry, mapping validation, transformation engine and test runner.
// Exposes all modules for use in the CLI and tests.

pub mod error;       // Error codes and error types
pub mod schema;      // System Models, Fields, Field Types
pub mod constraints; // Constraint Validator
pub mod mapping;     // Mappings, Field Mappings, Transformations, validation
pub mod engine;      // Transformation Engine
pub mod notify;      // Notification events
pub mod registry;    // Schema Registry
pub mod store;       // Mapping Definition Store
pub mod runner;      // Execution / Test Runner
pub mod builder;     // Mapping authoring state machine
pub mod provider;    // Source field sets from sample files
pub mod db;          // SQLite persistence + audit trail
pub mod config;      // Layered application configuration

// Re-export commonly used types
pub use error::{
    ErrorCode, FieldError, StoreError, StoreResult, StructuralError,
    TransformErrorKind, TransformationError, ValidationError,
};
pub use schema::{
    DataType, DateConstraints, DateFormat, EnumConstraints, Field, FieldType,
    NumericConstraints, StringConstraints, SystemModel,
};
pub use mapping::{
    validate_mapping, CaseType, FieldMapping, Mapping, Transformation, TransformationKind,
};
pub use engine::{apply, TypedValue};
pub use notify::{Level, MemorySink, Notification, NotificationSink, TracingSink};
pub use registry::{fx_forward_model, SchemaRegistry};
pub use store::{MappingStore, StaleMapping};
pub use runner::{Diagnostic, DiagnosticKind, TestResult, TestRunner};
pub use builder::{BuilderError, BuilderState, MappingBuilder};
pub use provider::{CsvHeaderProvider, FieldSetProvider};
pub use db::{
    Event, open_database, setup_database, insert_event, get_events_for_entity,
    upsert_system_model, get_system_model, list_system_models, delete_system_model,
    upsert_mapping, get_mapping, list_mappings, delete_mapping,
};
pub use config::AppConfig;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
