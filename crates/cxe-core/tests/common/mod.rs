//! Shared helpers for the integration suites.

use std::collections::HashMap;

use anyhow::Result;

use cxe_core::language::{LanguageAdapter, SourceFile};
use cxe_core::model::{
    ParameterSpec, QuestionMetadata, QuestionType, SubmissionRequest, TestCase,
};

/// Language adapter backed by shell scripts, so the full pipeline can be
/// exercised without a real toolchain. The "solution" is ignored; the
/// driver is whatever script the test supplies.
pub struct ScriptAdapter {
    run_script: String,
    compile_script: Option<String>,
}

impl ScriptAdapter {
    pub fn new(run_script: impl Into<String>) -> Self {
        Self {
            run_script: run_script.into(),
            compile_script: None,
        }
    }

    pub fn with_compile(mut self, compile_script: impl Into<String>) -> Self {
        self.compile_script = Some(compile_script.into());
        self
    }
}

impl LanguageAdapter for ScriptAdapter {
    fn name(&self) -> &str {
        "script"
    }

    fn image(&self) -> &str {
        "script:latest"
    }

    fn generate(&self, _submission: &SubmissionRequest) -> Result<Vec<SourceFile>> {
        let mut files = vec![SourceFile {
            relative_path: "run.sh".into(),
            contents: self.run_script.clone(),
        }];
        if let Some(compile) = &self.compile_script {
            files.push(SourceFile {
                relative_path: "compile.sh".into(),
                contents: compile.clone(),
            });
        }
        Ok(files)
    }

    fn compile_argv(&self, _submission: &SubmissionRequest) -> Option<Vec<String>> {
        self.compile_script
            .as_ref()
            .map(|_| vec!["sh".to_string(), "compile.sh".to_string()])
    }

    fn run_argv(&self, _submission: &SubmissionRequest) -> Vec<String> {
        vec!["sh".to_string(), "run.sh".to_string()]
    }
}

/// A submission for the "script" language with `case_count` empty test
/// cases.
pub fn script_submission(id: &str, case_count: usize) -> SubmissionRequest {
    SubmissionRequest {
        submission_id: Some(id.to_string()),
        user_id: "u1".to_string(),
        question_id: "q1".to_string(),
        language: "script".to_string(),
        code: "ignored".to_string(),
        metadata: QuestionMetadata {
            package_or_namespace: String::new(),
            function_name: "f".to_string(),
            return_type: "int".to_string(),
            parameters: vec![ParameterSpec {
                name: "a".to_string(),
                type_name: "int".to_string(),
            }],
            custom_data_structures: HashMap::new(),
            question_type: QuestionType::Algorithm,
            mutation_target: None,
            serialization_strategy: None,
        },
        test_cases: (0..case_count)
            .map(|_| TestCase {
                input: serde_json::Map::new(),
            })
            .collect(),
        client_ip: None,
        user_agent: None,
    }
}

/// A `printf` line emitting one wire-exact marker from a shell script.
/// `\037` is the unit separator.
pub fn marker_line(index: usize, output: &str, duration_ms: u64, error: &str) -> String {
    format!("printf 'TEST_CASE_RESULT: {index}\\037{output}\\037{duration_ms}\\037{error}\\n'")
}
