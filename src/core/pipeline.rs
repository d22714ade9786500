//! Pipeline definitions and loading.
//!
//! A pipeline is an ordered list of stages. Each stage holds one or more
//! actions that consume and produce named artifacts. Definitions are YAML:
//!
//! ```yaml
//! name: etl-deploy
//! stages:
//!   - name: Source
//!     actions:
//!       - name: Source
//!         category: source
//!         branch: master
//!         output_artifacts: [SourceCode]
//!   - name: Deploy
//!     actions:
//!       - name: Deploy
//!         category: invoke
//!         function_name: etl-launcher
//!         user_parameters:
//!           job_name: etl-deploy
//!           execution_role: etl-job-role
//!         input_artifacts: [SourceCode]
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::SOURCE_ARTIFACT;

use super::artifact_store::validate_name;

/// Name of the standard first stage
pub const SOURCE_STAGE: &str = "Source";

/// Name of the standard deployment stage
pub const DEPLOY_STAGE: &str = "Deploy";

/// A complete pipeline definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDefinition {
    /// Pipeline name
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Stages in execution order
    pub stages: Vec<StageDeclaration>,
}

impl PipelineDefinition {
    /// Load a pipeline from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline file: {}", path.display()))?;

        Self::from_yaml(&content)
    }

    /// Parse a pipeline from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse pipeline YAML")
    }

    /// The two-stage Source → Deploy pipeline
    pub fn source_and_deploy(
        name: impl Into<String>,
        branch: impl Into<String>,
        function_name: impl Into<String>,
        user_parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: "Deploy the ETL job on every commit to the tracked branch".to_string(),
            stages: vec![
                StageDeclaration {
                    name: SOURCE_STAGE.to_string(),
                    actions: vec![ActionDeclaration {
                        name: SOURCE_STAGE.to_string(),
                        kind: ActionKind::Source {
                            branch: branch.into(),
                        },
                        input_artifacts: Vec::new(),
                        output_artifacts: vec![SOURCE_ARTIFACT.to_string()],
                        timeout_seconds: None,
                    }],
                },
                StageDeclaration {
                    name: DEPLOY_STAGE.to_string(),
                    actions: vec![ActionDeclaration {
                        name: DEPLOY_STAGE.to_string(),
                        kind: ActionKind::Invoke {
                            function_name: function_name.into(),
                            user_parameters,
                        },
                        input_artifacts: vec![SOURCE_ARTIFACT.to_string()],
                        output_artifacts: Vec::new(),
                        timeout_seconds: None,
                    }],
                },
            ],
        }
    }

    /// Validate the pipeline definition
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            anyhow::bail!("Pipeline name cannot be empty");
        }

        if self.stages.is_empty() {
            anyhow::bail!("Pipeline must have at least one stage");
        }

        let mut stage_names = HashSet::new();
        let mut action_names = HashSet::new();
        // Artifacts produced by stages before the one being checked
        let mut available: HashSet<&str> = HashSet::new();

        for (i, stage) in self.stages.iter().enumerate() {
            if stage.name.is_empty() {
                anyhow::bail!("Stage {} has an empty name", i);
            }
            if !stage_names.insert(stage.name.as_str()) {
                anyhow::bail!("Duplicate stage name '{}'", stage.name);
            }
            if stage.actions.is_empty() {
                anyhow::bail!("Stage '{}' has no actions", stage.name);
            }

            let mut produced_here = Vec::new();

            for action in &stage.actions {
                if action.name.is_empty() {
                    anyhow::bail!("Stage '{}' has an action with an empty name", stage.name);
                }
                if !action_names.insert(action.name.as_str()) {
                    anyhow::bail!("Duplicate action name '{}'", action.name);
                }

                let is_source = matches!(action.kind, ActionKind::Source { .. });
                if is_source != (i == 0) {
                    anyhow::bail!(
                        "Action '{}': source actions must be in the first stage, and only there",
                        action.name
                    );
                }
                if is_source && !action.input_artifacts.is_empty() {
                    anyhow::bail!("Source action '{}' cannot consume artifacts", action.name);
                }

                for input in &action.input_artifacts {
                    if !available.contains(input.as_str()) {
                        anyhow::bail!(
                            "Action '{}' consumes artifact '{}' which no earlier stage produces",
                            action.name,
                            input
                        );
                    }
                }

                for output in &action.output_artifacts {
                    validate_name(output)
                        .with_context(|| format!("Action '{}' declares an unusable output", action.name))?;
                    if available.contains(output.as_str()) || produced_here.contains(&output.as_str()) {
                        anyhow::bail!("Artifact '{}' is produced more than once", output);
                    }
                    produced_here.push(output.as_str());
                }
            }

            available.extend(produced_here);
        }

        Ok(())
    }

    /// Get a stage by name
    pub fn stage(&self, name: &str) -> Option<&StageDeclaration> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Branch tracked by the source action, if any
    pub fn tracked_branch(&self) -> Option<&str> {
        self.stages
            .iter()
            .flat_map(|s| &s.actions)
            .find_map(|a| match &a.kind {
                ActionKind::Source { branch } => Some(branch.as_str()),
                ActionKind::Invoke { .. } => None,
            })
    }
}

/// A stage in a pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDeclaration {
    /// Stage name (unique within pipeline)
    pub name: String,

    /// Actions run concurrently within the stage
    pub actions: Vec<ActionDeclaration>,
}

/// A single action in a stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDeclaration {
    /// Action name (unique within pipeline)
    pub name: String,

    /// What the action does
    #[serde(flatten)]
    pub kind: ActionKind,

    /// Artifacts that must exist before the action starts
    #[serde(default)]
    pub input_artifacts: Vec<String>,

    /// Artifacts the action writes
    #[serde(default)]
    pub output_artifacts: Vec<String>,

    /// Override of the controller's action timeout
    pub timeout_seconds: Option<u64>,
}

impl ActionDeclaration {
    /// Get the effective timeout for this action
    pub fn timeout(&self, default: Duration) -> Duration {
        self.timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(default)
    }
}

/// Supported action categories
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum ActionKind {
    /// Snapshot the repository at the execution's revision
    Source {
        /// Branch resolved when the trigger carries no commit
        branch: String,
    },

    /// Invoke a launcher function
    Invoke {
        function_name: String,

        /// Passed to the function as a JSON string
        #[serde(default)]
        user_parameters: serde_json::Value,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_PIPELINE_YAML: &str = r#"
name: etl-deploy
description: Test pipeline

stages:
  - name: Source
    actions:
      - name: Source
        category: source
        branch: master
        output_artifacts: [SourceCode]

  - name: Deploy
    actions:
      - name: Deploy
        category: invoke
        function_name: etl-launcher
        user_parameters:
          job_name: myjob
          execution_role: etl-role
        input_artifacts: [SourceCode]
        timeout_seconds: 30
"#;

    #[test]
    fn test_pipeline_parsing() {
        let pipeline = PipelineDefinition::from_yaml(TEST_PIPELINE_YAML).unwrap();

        assert_eq!(pipeline.name, "etl-deploy");
        assert_eq!(pipeline.stages.len(), 2);
        assert_eq!(pipeline.tracked_branch(), Some("master"));

        let deploy = &pipeline.stage("Deploy").unwrap().actions[0];
        assert_eq!(deploy.timeout(Duration::from_secs(300)), Duration::from_secs(30));
        match &deploy.kind {
            ActionKind::Invoke { user_parameters, .. } => {
                assert_eq!(user_parameters["job_name"], "myjob");
            }
            other => panic!("unexpected action kind: {other:?}"),
        }
    }

    #[test]
    fn test_pipeline_validation() {
        let pipeline = PipelineDefinition::from_yaml(TEST_PIPELINE_YAML).unwrap();
        assert!(pipeline.validate().is_ok());

        let standard = PipelineDefinition::source_and_deploy(
            "etl",
            "master",
            "etl-launcher",
            serde_json::json!({"job_name": "etl", "execution_role": "role"}),
        );
        assert!(standard.validate().is_ok());
    }

    #[test]
    fn test_bundled_pipeline_is_valid() {
        let pipeline =
            PipelineDefinition::from_yaml(include_str!("../../pipelines/etl-deploy.yaml")).unwrap();
        assert!(pipeline.validate().is_ok());
        assert_eq!(pipeline.tracked_branch(), Some("master"));
    }

    #[test]
    fn test_input_must_come_from_earlier_stage() {
        let yaml = r#"
name: invalid
stages:
  - name: Source
    actions:
      - name: Source
        category: source
        branch: master
        output_artifacts: [SourceCode]
  - name: Deploy
    actions:
      - name: Deploy
        category: invoke
        function_name: launcher
        input_artifacts: [BuildOutput]
"#;
        let pipeline = PipelineDefinition::from_yaml(yaml).unwrap();
        let err = pipeline.validate().unwrap_err();
        assert!(err.to_string().contains("BuildOutput"));
    }

    #[test]
    fn test_same_stage_outputs_are_not_inputs() {
        let yaml = r#"
name: invalid
stages:
  - name: Source
    actions:
      - name: Source
        category: source
        branch: master
        output_artifacts: [SourceCode]
  - name: Deploy
    actions:
      - name: Package
        category: invoke
        function_name: packer
        input_artifacts: [SourceCode]
        output_artifacts: [Bundle]
      - name: Deploy
        category: invoke
        function_name: launcher
        input_artifacts: [Bundle]
"#;
        let pipeline = PipelineDefinition::from_yaml(yaml).unwrap();
        assert!(pipeline.validate().is_err());
    }

    #[test]
    fn test_source_action_only_in_first_stage() {
        let yaml = r#"
name: invalid
stages:
  - name: Deploy
    actions:
      - name: Deploy
        category: invoke
        function_name: launcher
"#;
        let pipeline = PipelineDefinition::from_yaml(yaml).unwrap();
        assert!(pipeline.validate().is_err());
    }

    #[test]
    fn test_artifact_names_must_be_storable() {
        let yaml = r#"
name: invalid
stages:
  - name: Source
    actions:
      - name: Source
        category: source
        branch: master
        output_artifacts: [Source.Code]
"#;
        let pipeline = PipelineDefinition::from_yaml(yaml).unwrap();
        let err = pipeline.validate().unwrap_err();
        assert!(format!("{err:#}").contains("Invalid artifact name 'Source.Code'"));
    }
}
