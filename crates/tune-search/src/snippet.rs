//! Python reproduction snippet for a measured trial.

use serde::Serialize;
use std::path::Path;

use tune_core::{EnvCombination, ExecutionProvider, OptimizationLevel, TrialSpec};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodeSnippet {
    pub execution_provider: ExecutionProvider,
    pub environment_variables: EnvCombination,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_optimizer: Option<String>,
    pub code: String,
}

impl CodeSnippet {
    pub fn for_trial(
        trial: &TrialSpec,
        level: OptimizationLevel,
        graph_optimizer: Option<&str>,
    ) -> Self {
        Self {
            execution_provider: trial.provider,
            environment_variables: trial.env.clone(),
            graph_optimizer: graph_optimizer.map(str::to_string),
            code: session_code(trial, level, &trial.model),
        }
    }
}

fn provider_name(trial: &TrialSpec) -> String {
    match trial.arg_value("-e") {
        Some(selector) => format!("{}ExecutionProvider", selector.to_uppercase()),
        None => "CPUExecutionProvider".to_string(),
    }
}

fn session_code(trial: &TrialSpec, level: OptimizationLevel, model: &Path) -> String {
    let mode = if trial.has_flag("-P") {
        "ORT_PARALLEL"
    } else {
        "ORT_SEQUENTIAL"
    };

    let mut lines = vec![
        "import onnxruntime as ort".to_string(),
        "so = ort.SessionOptions()".to_string(),
        format!(
            "so.graph_optimization_level = ort.GraphOptimizationLevel.{}",
            level.graph_optimization_level()
        ),
        format!("so.execution_mode = ort.ExecutionMode.{mode}"),
    ];
    if let Some(n) = trial.arg_value("-x") {
        lines.push(format!("so.intra_op_num_threads = {n}"));
    }
    if let Some(n) = trial.arg_value("-y") {
        lines.push(format!("so.inter_op_num_threads = {n}"));
    }
    lines.push(format!(
        "session = ort.InferenceSession(\"{}\", so, providers=[\"{}\"])",
        model.display(),
        provider_name(trial)
    ));

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::template;
    use tune_core::ThreadSetting;

    #[test]
    fn test_parallel_snippet() {
        let mut trial = template(ExecutionProvider::Dnnl, "dnnl_parallel_4_OMP_threads_3_inter_threads");
        trial.args.extend(["-P".into(), "-y".into(), "3".into()]);
        ThreadSetting::NativePool.apply(&mut trial, 4);

        let snippet = CodeSnippet::for_trial(&trial, OptimizationLevel::All, Some("dnnl_optimizer"));
        assert!(snippet.code.contains("GraphOptimizationLevel.ORT_ENABLE_ALL"));
        assert!(snippet.code.contains("ExecutionMode.ORT_PARALLEL"));
        assert!(snippet.code.contains("so.intra_op_num_threads = 1"));
        assert!(snippet.code.contains("so.inter_op_num_threads = 3"));
        assert!(snippet.code.contains("providers=[\"DNNLExecutionProvider\"]"));
        assert_eq!(snippet.environment_variables.get("OMP_NUM_THREADS"), Some("4"));

        let json = serde_json::to_value(&snippet).unwrap();
        assert_eq!(json["execution_provider"], "dnnl");
        assert_eq!(json["graph_optimizer"], "dnnl_optimizer");
        assert_eq!(json["environment_variables"]["OMP_NUM_THREADS"], "4");
    }

    #[test]
    fn test_default_provider_without_selector() {
        let trial = template(ExecutionProvider::Mklml, "mklml");
        let snippet = CodeSnippet::for_trial(&trial, OptimizationLevel::Basic, None);
        assert!(snippet.code.contains("ORT_ENABLE_BASIC"));
        assert!(snippet.code.contains("ORT_SEQUENTIAL"));
        assert!(snippet.code.contains("CPUExecutionProvider"));
        assert!(!snippet.code.contains("intra_op_num_threads"));

        let json = serde_json::to_value(&snippet).unwrap();
        assert!(json.get("graph_optimizer").is_none());
    }
}
