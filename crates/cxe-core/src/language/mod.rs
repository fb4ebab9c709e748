//! Per-language harness generation behind a common adapter interface.
//!
//! Each adapter knows how to turn a submission into on-disk sources (the
//! user solution plus a generated driver), and which commands compile and
//! run them. The rest of the pipeline is language-agnostic: adding a
//! language means adding an adapter, not editing the orchestrator.

pub mod java;
pub mod python;
pub mod shape;

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Result;

use crate::model::SubmissionRequest;

/// One generated source artifact, relative to the submission's working
/// directory.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub relative_path: PathBuf,
    pub contents: String,
}

/// Adapter interface for language support.
///
/// Object-safe so adapters can be stored as `Box<dyn LanguageAdapter>` in
/// the [`LanguageRegistry`].
pub trait LanguageAdapter: Send + Sync {
    /// Language key as used in submission requests (e.g. "java").
    fn name(&self) -> &str;

    /// Sandbox image carrying this language's toolchain.
    fn image(&self) -> &str;

    /// Emit the solution and driver sources for a submission.
    fn generate(&self, submission: &SubmissionRequest) -> Result<Vec<SourceFile>>;

    /// Compile command, relative to the working directory. `None` for
    /// interpreted languages (the compile phase becomes a no-op).
    fn compile_argv(&self, submission: &SubmissionRequest) -> Option<Vec<String>>;

    /// Run command for the generated driver entry point.
    fn run_argv(&self, submission: &SubmissionRequest) -> Vec<String>;
}

// Compile-time assertion: the adapter trait must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn LanguageAdapter) {}
};

/// A collection of registered [`LanguageAdapter`]s, keyed by name.
#[derive(Default)]
pub struct LanguageRegistry {
    adapters: HashMap<String, Box<dyn LanguageAdapter>>,
}

impl LanguageRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in adapters (java, python).
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(java::JavaAdapter::new());
        registry.register(python::PythonAdapter::new());
        registry
    }

    /// Register an adapter under the name it reports. An existing adapter
    /// with the same name is replaced and returned.
    pub fn register(
        &mut self,
        adapter: impl LanguageAdapter + 'static,
    ) -> Option<Box<dyn LanguageAdapter>> {
        let name = adapter.name().to_string();
        self.adapters.insert(name, Box::new(adapter))
    }

    /// Look up an adapter by language name.
    pub fn get(&self, name: &str) -> Option<&dyn LanguageAdapter> {
        self.adapters.get(name).map(|b| b.as_ref())
    }

    /// Names of all registered languages.
    pub fn list(&self) -> Vec<&str> {
        self.adapters.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl std::fmt::Debug for LanguageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanguageRegistry")
            .field("languages", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}
