//! Runtime configuration.
//!
//! Everything is read once at startup, from command-line flags with
//! environment variable fallbacks, into a [`Settings`] value that is passed
//! down explicitly. Nothing below this module reads the environment, except
//! that an HTTP endpoint names the variable holding its own bearer token.

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

pub const DEFAULT_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
pub const DEFAULT_MODEL: &str = "qwen-plus";

/// Connection settings for the OpenAI-compatible model endpoint.
#[derive(Clone)]
pub struct ModelSettings {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    /// Per-HTTP-request timeout.
    pub timeout: Duration,
    /// Retries on 429 and 5xx responses.
    pub max_retries: u32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            temperature: 0.0,
            timeout: Duration::from_secs(120),
            max_retries: 2,
        }
    }
}

impl std::fmt::Debug for ModelSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSettings")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("temperature", &self.temperature)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

/// Bounds and timeouts for one orchestrated task.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Model calls allowed before the task fails with a step-limit failure.
    pub max_steps: usize,
    /// Turns a single capability name may stay unresolvable.
    pub max_unresolved_attempts: usize,
    /// Providers loaded concurrently in one resolving phase.
    pub load_concurrency: usize,
    /// Invocations executed concurrently in one executing phase.
    pub execution_concurrency: usize,
    pub model_timeout: Duration,
    pub load_timeout: Duration,
    pub execution_timeout: Duration,
    /// Whole-task deadline.
    pub task_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_steps: 25,
            max_unresolved_attempts: 5,
            load_concurrency: 4,
            execution_concurrency: 4,
            model_timeout: Duration::from_secs(120),
            load_timeout: Duration::from_secs(60),
            execution_timeout: Duration::from_secs(60),
            task_timeout: Duration::from_secs(600),
        }
    }
}

/// Command-line interface of the `skillgate` binary.
#[derive(Debug, Parser)]
#[command(name = "skillgate", version, about = "Run a task against lazily loaded capability providers")]
pub struct Cli {
    /// The task to perform.
    pub task: String,

    /// Provider manifest roots, separated like PATH. Earlier roots win on id clashes.
    #[arg(long = "skills-dir", env = "SKILLS_DIR", default_value = "./skills")]
    pub skills_dir: OsString,

    #[arg(long = "base-url", env = "LLM_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    #[arg(long, env = "LLM_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    #[arg(long = "api-key", env = "LLM_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long, env = "LLM_TEMPERATURE", default_value_t = 0.0)]
    pub temperature: f32,

    /// Register the built-in file, shell and clock capabilities.
    #[arg(long, env = "SKILLGATE_BUILTINS", default_value_t = true, action = clap::ArgAction::Set)]
    pub builtins: bool,

    #[arg(long = "max-steps", default_value_t = 25)]
    pub max_steps: usize,

    #[arg(long = "max-unresolved-attempts", default_value_t = 5)]
    pub max_unresolved_attempts: usize,

    /// Whole-task timeout in seconds.
    #[arg(long = "task-timeout", default_value_t = 600)]
    pub task_timeout: u64,

    /// Print the full conversation history as JSON to stderr.
    #[arg(long)]
    pub transcript: bool,
}

/// Resolved settings for one run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub task: String,
    pub skill_roots: Vec<PathBuf>,
    pub model: ModelSettings,
    pub orchestrator: OrchestratorConfig,
    pub builtins: bool,
    pub transcript: bool,
}

impl Settings {
    pub fn from_cli(cli: Cli) -> Self {
        let skill_roots = std::env::split_paths(&cli.skills_dir)
            .filter(|p| !p.as_os_str().is_empty())
            .collect();
        let orchestrator = OrchestratorConfig {
            max_steps: cli.max_steps,
            max_unresolved_attempts: cli.max_unresolved_attempts,
            task_timeout: Duration::from_secs(cli.task_timeout),
            ..OrchestratorConfig::default()
        };
        let model = ModelSettings {
            base_url: cli.base_url,
            model: cli.model,
            api_key: cli.api_key.filter(|k| !k.trim().is_empty()),
            temperature: cli.temperature,
            timeout: orchestrator.model_timeout,
            ..ModelSettings::default()
        };
        Self {
            task: cli.task,
            skill_roots,
            model,
            orchestrator,
            builtins: cli.builtins,
            transcript: cli.transcript,
        }
    }
}
