//! Configuration for etl-deploy.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (ETL_DEPLOY_HOME, ETL_DEPLOY_REPO)
//! 2. Config file (.etl-deploy/config.yaml)
//! 3. Defaults (~/.etl-deploy, current directory as repository)
//!
//! Config file discovery:
//! - Searches current directory and parents for .etl-deploy/config.yaml
//! - `paths.home` is relative to the .etl-deploy/ directory
//! - Other paths are relative to the project root (parent of .etl-deploy/)
//!
//! The resolved configuration is a plain value; callers pass it where needed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::launcher::{LauncherSettings, DEFAULT_ENTRY_POINT};
use crate::core::pipeline::PipelineDefinition;
use crate::core::retention::RetentionPolicy;
use crate::core::rule::EventRule;

/// Directory holding the config file
pub const CONFIG_DIR: &str = ".etl-deploy";

const DEFAULT_BRANCH: &str = "master";
const DEFAULT_FUNCTION: &str = "etl-launcher";
const DEFAULT_INTERPRETER: &str = "python3";
const DEFAULT_TIMEOUT_SECONDS: u64 = 300;
const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub job: JobConfig,
    #[serde(default)]
    pub launcher: LauncherConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to .etl-deploy/)
    pub home: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepositoryConfig {
    pub name: Option<String>,
    /// Local clone (relative to project root)
    pub path: Option<String>,
    pub arn: Option<String>,
    pub branch: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineConfig {
    pub name: Option<String>,
    /// Pipeline YAML replacing the standard Source → Deploy definition
    pub definition: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobConfig {
    pub name: Option<String>,
    pub execution_role: Option<String>,
    pub interpreter: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LauncherConfig {
    pub function_name: Option<String>,
    pub entry_point: Option<String>,
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub passable_roles: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetentionConfig {
    pub days: Option<u32>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Engine state (executions, jobs)
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub repository: RepositorySettings,
    pub pipeline_name: String,
    /// Explicit pipeline definition file
    pub pipeline_file: Option<PathBuf>,
    pub job: JobSettings,
    pub function_name: String,
    pub launcher: LauncherSettings,
    pub action_timeout: Duration,
    pub retention_days: u32,
}

#[derive(Debug, Clone)]
pub struct RepositorySettings {
    pub name: String,
    pub path: PathBuf,
    pub arn: String,
    pub branch: String,
}

#[derive(Debug, Clone)]
pub struct JobSettings {
    pub name: String,
    pub execution_role: String,
    pub interpreter: String,
}

impl ResolvedConfig {
    /// Load configuration from the process environment and working directory
    pub fn load() -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to determine current directory")?;
        let config_file = find_config_file(&cwd);
        let default_home = dirs::home_dir()
            .context("Failed to determine home directory")?
            .join(CONFIG_DIR);

        Self::resolve(&cwd, config_file, default_home, |key| std::env::var(key).ok())
    }

    /// Resolve configuration from explicit sources
    pub fn resolve(
        cwd: &Path,
        config_file: Option<PathBuf>,
        default_home: PathBuf,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let raw = match &config_file {
            Some(path) => Some(load_config_file(path)?),
            None => None,
        };

        // .etl-deploy/ and its parent, or the working directory without a file
        let (config_dir, base_dir) = match &config_file {
            Some(path) => {
                let config_dir = path.parent().unwrap_or(cwd).to_path_buf();
                let base_dir = config_dir.parent().unwrap_or(cwd).to_path_buf();
                (config_dir, base_dir)
            }
            None => (cwd.to_path_buf(), cwd.to_path_buf()),
        };

        let paths = raw.as_ref().map(|c| c.paths.clone()).unwrap_or_default();
        let repo = raw.as_ref().map(|c| c.repository.clone()).unwrap_or_default();
        let pipeline = raw.as_ref().map(|c| c.pipeline.clone()).unwrap_or_default();
        let job = raw.as_ref().map(|c| c.job.clone()).unwrap_or_default();
        let launcher = raw.as_ref().map(|c| c.launcher.clone()).unwrap_or_default();
        let retention = raw.as_ref().map(|c| c.retention.clone()).unwrap_or_default();

        let home = if let Some(env_home) = env("ETL_DEPLOY_HOME") {
            PathBuf::from(env_home)
        } else if let Some(ref home_path) = paths.home {
            resolve_path(&config_dir, home_path)
        } else {
            default_home
        };

        let repo_path = if let Some(env_repo) = env("ETL_DEPLOY_REPO") {
            PathBuf::from(env_repo)
        } else if let Some(ref path) = repo.path {
            resolve_path(&base_dir, path)
        } else {
            base_dir.clone()
        };

        let repo_name = repo.name.unwrap_or_else(|| {
            repo_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "repository".to_string())
        });
        let arn = repo
            .arn
            .unwrap_or_else(|| format!("arn:aws:codecommit:local:000000000000:{}", repo_name));

        let pipeline_name = pipeline
            .name
            .unwrap_or_else(|| format!("{}-deploy", repo_name));
        let pipeline_file = pipeline.definition.map(|p| resolve_path(&base_dir, &p));

        let job = JobSettings {
            name: job.name.unwrap_or_else(|| pipeline_name.clone()),
            execution_role: job
                .execution_role
                .unwrap_or_else(|| format!("{}-job-role", repo_name)),
            interpreter: job
                .interpreter
                .unwrap_or_else(|| DEFAULT_INTERPRETER.to_string()),
        };

        Ok(Self {
            home,
            config_file,
            repository: RepositorySettings {
                name: repo_name,
                path: repo_path,
                arn,
                branch: repo.branch.unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
            },
            pipeline_name,
            pipeline_file,
            job,
            function_name: launcher
                .function_name
                .unwrap_or_else(|| DEFAULT_FUNCTION.to_string()),
            launcher: LauncherSettings {
                entry_point: launcher
                    .entry_point
                    .unwrap_or_else(|| DEFAULT_ENTRY_POINT.to_string()),
                passable_roles: launcher.passable_roles,
            },
            action_timeout: Duration::from_secs(
                launcher.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS),
            ),
            retention_days: retention.days.unwrap_or(DEFAULT_RETENTION_DAYS),
        })
    }

    /// Execution logs and artifacts ($ETL_DEPLOY_HOME/executions)
    pub fn executions_dir(&self) -> PathBuf {
        self.home.join("executions")
    }

    /// Job definitions and runs ($ETL_DEPLOY_HOME/jobs)
    pub fn jobs_dir(&self) -> PathBuf {
        self.home.join("jobs")
    }

    /// Pipeline to run: the configured file, or Source → Deploy
    pub fn pipeline_definition(&self) -> Result<PipelineDefinition> {
        let definition = match &self.pipeline_file {
            Some(path) => PipelineDefinition::from_file(path)?,
            None => PipelineDefinition::source_and_deploy(
                self.pipeline_name.clone(),
                self.repository.branch.clone(),
                self.function_name.clone(),
                serde_json::json!({
                    "job_name": self.job.name,
                    "execution_role": self.job.execution_role,
                }),
            ),
        };
        definition.validate()?;
        Ok(definition)
    }

    pub fn event_rule(&self) -> EventRule {
        EventRule::new(self.repository.arn.clone(), self.repository.branch.clone())
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy::days(self.retention_days)
    }
}

/// Find config file by searching a directory and its parents
pub fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_DIR).join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to a base directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(&path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults_without_file() {
        let cwd = PathBuf::from("/work/etl");
        let config =
            ResolvedConfig::resolve(&cwd, None, PathBuf::from("/home/u/.etl-deploy"), no_env)
                .unwrap();

        assert_eq!(config.home, PathBuf::from("/home/u/.etl-deploy"));
        assert_eq!(config.executions_dir(), PathBuf::from("/home/u/.etl-deploy/executions"));
        assert_eq!(config.repository.path, cwd);
        assert_eq!(config.repository.name, "etl");
        assert_eq!(config.repository.branch, "master");
        assert_eq!(config.launcher.entry_point, "etl.py");
        assert_eq!(config.action_timeout, Duration::from_secs(300));
        assert!(config.config_file.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let config = ResolvedConfig::resolve(
            Path::new("/work/etl"),
            None,
            PathBuf::from("/home/u/.etl-deploy"),
            |key| match key {
                "ETL_DEPLOY_HOME" => Some("/var/lib/etl-deploy".to_string()),
                "ETL_DEPLOY_REPO" => Some("/srv/git/warehouse.git".to_string()),
                _ => None,
            },
        )
        .unwrap();

        assert_eq!(config.home, PathBuf::from("/var/lib/etl-deploy"));
        assert_eq!(config.repository.path, PathBuf::from("/srv/git/warehouse.git"));
        assert_eq!(config.repository.name, "warehouse.git");
    }

    #[test]
    fn test_config_file() {
        let temp = TempDir::new().unwrap();
        let config_dir = temp.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&config_dir).unwrap();

        let config_path = config_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1.0"
paths:
  home: /var/lib/etl-deploy
repository:
  name: etl
  arn: arn:aws:codecommit:eu-west-1:123456789012:etl
  branch: main
job:
  name: myjob
  execution_role: etl-role
launcher:
  timeout_seconds: 60
  passable_roles: [etl-role]
retention:
  days: 7
"#
        )
        .unwrap();

        let nested = temp.path().join("jobs").join("sql");
        std::fs::create_dir_all(&nested).unwrap();
        let found = find_config_file(&nested).unwrap();
        assert_eq!(found, config_path);

        let config =
            ResolvedConfig::resolve(&nested, Some(found), PathBuf::from("/unused"), no_env)
                .unwrap();

        assert_eq!(config.home, PathBuf::from("/var/lib/etl-deploy"));
        assert_eq!(config.repository.branch, "main");
        assert_eq!(config.job.name, "myjob");
        assert_eq!(config.job.interpreter, "python3");
        assert_eq!(config.launcher.passable_roles, vec!["etl-role".to_string()]);
        assert_eq!(config.action_timeout, Duration::from_secs(60));
        assert_eq!(config.retention_days, 7);

        let rule = config.event_rule();
        assert_eq!(rule.branch, "main");
        assert_eq!(rule.repository_arn, "arn:aws:codecommit:eu-west-1:123456789012:etl");
    }

    #[test]
    fn test_default_pipeline_definition() {
        let config = ResolvedConfig::resolve(
            Path::new("/work/etl"),
            None,
            PathBuf::from("/tmp/.etl-deploy"),
            no_env,
        )
        .unwrap();

        let definition = config.pipeline_definition().unwrap();
        assert_eq!(definition.name, "etl-deploy");
        assert_eq!(definition.stages.len(), 2);
        assert_eq!(definition.tracked_branch(), Some("master"));
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/./subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
