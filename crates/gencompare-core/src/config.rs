//! Run configuration.
//!
//! One typed struct, filled from (lowest to highest precedence) built-in
//! defaults, an optional `gencompare.toml`, and command-line flags, then
//! validated once before anything touches the repository.
//!
//! Defaults describe the Slice compiler suite this tool was first written
//! for, so a bare invocation inside such a checkout needs no file at all.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::error::ConfigError;
use crate::domain::revision::RevisionSpec;
use crate::domain::tool::ToolSpec;

/// File name looked up at the repository root.
pub const CONFIG_FILE_NAME: &str = "gencompare.toml";

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Revisions to visit. Never read from the file; set by the caller.
    #[serde(skip, default = "default_revision_spec")]
    pub revisions: RevisionSpec,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub inputs: InputsConfig,

    #[serde(default)]
    pub build: BuildConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_revision_spec() -> RevisionSpec {
    RevisionSpec::Explicit(vec!["HEAD".to_string()])
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            revisions: default_revision_spec(),
            tools: ToolsConfig::default(),
            inputs: InputsConfig::default(),
            build: BuildConfig::default(),
            generation: GenerationConfig::default(),
            history: HistoryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Target platform of the build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Unix,
    Windows,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Unix
        }
    }

    /// Suffix appended to tool names to find their binaries.
    pub fn binary_suffix(&self) -> &'static str {
        match self {
            Platform::Unix => "",
            Platform::Windows => ".exe",
        }
    }
}

impl Default for Platform {
    fn default() -> Self {
        Platform::current()
    }
}

/// Which generator tools to build and run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Tool names, in the order they run.
    #[serde(default = "default_tool_names")]
    pub names: Vec<String>,

    /// Tools that must never run concurrently with themselves.
    #[serde(default = "default_serial_tools")]
    pub serial: Vec<String>,
}

fn default_tool_names() -> Vec<String> {
    let mut names = vec![
        "slice2cpp",
        "slice2cs",
        "slice2java",
        "slice2js",
        "slice2matlab",
        "slice2php",
        "slice2py",
        "slice2rb",
        "slice2swift",
    ];
    // slice2swift is not built on Windows.
    if Platform::current() == Platform::Windows {
        names.retain(|n| *n != "slice2swift");
    }
    names.into_iter().map(String::from).collect()
}

fn default_serial_tools() -> Vec<String> {
    ["slice2java", "slice2py", "slice2matlab"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            names: default_tool_names(),
            serial: default_serial_tools(),
        }
    }
}

impl ToolsConfig {
    /// Tool specs in run order.
    /// One spec per distinct name, in first-seen order.
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = Vec::with_capacity(self.names.len());
        for name in &self.names {
            if specs.iter().all(|spec| &spec.name != name) {
                specs.push(ToolSpec::new(name.clone(), !self.serial.contains(name)));
            }
        }
        specs
    }
}

/// Which files are fed to the tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputsConfig {
    /// Files or directories, relative to the invocation directory.
    /// Empty means the invocation directory itself.
    #[serde(default)]
    pub paths: Vec<PathBuf>,

    /// Source extension searched for inside directories (without the dot).
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Repository-relative prefixes dropped after expansion. Configured
    /// prefixes are added to the built-in ones.
    #[serde(
        default = "default_exclude_prefixes",
        deserialize_with = "with_default_excludes"
    )]
    pub exclude_prefixes: Vec<String>,

    /// Repository-relative include root passed to every invocation.
    #[serde(default = "default_include_root")]
    pub include_root: String,
}

fn default_extension() -> String {
    "ice".to_string()
}

fn default_exclude_prefixes() -> Vec<String> {
    ["cpp/test/Slice/", "java/test/Ice/", "java-compat/test/Ice/"]
        .iter()
        .map(|p| p.to_string())
        .collect()
}

fn with_default_excludes<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let mut prefixes = default_exclude_prefixes();
    for prefix in Vec::<String>::deserialize(deserializer)? {
        if !prefixes.contains(&prefix) {
            prefixes.push(prefix);
        }
    }
    Ok(prefixes)
}

fn default_include_root() -> String {
    "slice".to_string()
}

impl Default for InputsConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            extension: default_extension(),
            exclude_prefixes: default_exclude_prefixes(),
            include_root: default_include_root(),
        }
    }
}

/// Build backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuildBackend {
    /// `make -C <dir of project> [-j] <tools>...`
    Make,
    /// `msbuild [/m] <project> /target:BuildDist ...`
    Msbuild,
    /// Arbitrary argv; tool names are appended.
    Custom { command: Vec<String> },
}

impl BuildBackend {
    fn for_platform(platform: Platform) -> Self {
        match platform {
            Platform::Unix => BuildBackend::Make,
            Platform::Windows => BuildBackend::Msbuild,
        }
    }
}

/// How the tools are built and where their binaries end up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    #[serde(default)]
    pub platform: Platform,

    /// Defaults to `make` on Unix and `msbuild` on Windows.
    #[serde(default)]
    pub backend: Option<BuildBackend>,

    /// Build file, relative to the repository root unless absolute.
    #[serde(default)]
    pub project_path: Option<PathBuf>,

    /// Directory holding built binaries, relative to the repository root
    /// unless absolute.
    #[serde(default)]
    pub tool_dir: Option<PathBuf>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            platform: Platform::current(),
            backend: None,
            project_path: None,
            tool_dir: None,
        }
    }
}

impl BuildConfig {
    pub fn backend(&self) -> BuildBackend {
        self.backend
            .clone()
            .unwrap_or_else(|| BuildBackend::for_platform(self.platform))
    }

    /// Build file, resolved against `repo_root`.
    pub fn project_path(&self, repo_root: &Path) -> PathBuf {
        let rel = self.project_path.clone().unwrap_or_else(|| match self.platform {
            Platform::Unix => PathBuf::from("cpp").join("Makefile"),
            Platform::Windows => PathBuf::from("cpp").join("msbuild").join("ice.proj"),
        });
        repo_root.join(rel)
    }

    /// Binary directory, resolved against `repo_root`.
    pub fn tool_dir(&self, repo_root: &Path) -> PathBuf {
        let rel = self.tool_dir.clone().unwrap_or_else(|| match self.platform {
            Platform::Unix => PathBuf::from("cpp").join("bin"),
            Platform::Windows => PathBuf::from("cpp").join("bin").join("x64").join("Debug"),
        });
        repo_root.join(rel)
    }
}

/// How generator invocations are dispatched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Run the build and concurrency-safe tools in parallel.
    #[serde(default)]
    pub parallel: bool,

    /// Worker bound when parallel; defaults to the available parallelism.
    #[serde(default)]
    pub max_workers: Option<usize>,

    /// Per-invocation timeout in seconds (0 = none).
    #[serde(default)]
    pub invocation_timeout_secs: u64,

    #[serde(default = "default_output_flag")]
    pub output_flag: String,

    #[serde(default = "default_include_flag")]
    pub include_flag: String,
}

fn default_output_flag() -> String {
    "--output-dir".to_string()
}

fn default_include_flag() -> String {
    "-I".to_string()
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            parallel: false,
            max_workers: None,
            invocation_timeout_secs: 0,
            output_flag: default_output_flag(),
            include_flag: default_include_flag(),
        }
    }
}

impl GenerationConfig {
    /// Effective worker bound.
    pub fn worker_bound(&self) -> usize {
        if !self.parallel {
            return 1;
        }
        self.max_workers
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(4)
            })
            .max(1)
    }
}

/// Where and how history is kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Store directory, relative to the repository root unless absolute.
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    #[serde(default = "default_identity_name")]
    pub identity_name: String,

    #[serde(default = "default_identity_email")]
    pub identity_email: String,

    /// Compact the store after this many processed revisions.
    #[serde(default = "default_compact_every")]
    pub compact_every: usize,

    /// Prefix used to neutralize `#` cross-references in copied messages.
    #[serde(default = "default_cross_ref_prefix")]
    pub cross_ref_prefix: String,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("_gen_compare_")
}

fn default_identity_name() -> String {
    "gencompare".to_string()
}

fn default_identity_email() -> String {
    "gencompare@localhost".to_string()
}

fn default_compact_every() -> usize {
    100
}

fn default_cross_ref_prefix() -> String {
    "upstream".to_string()
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            identity_name: default_identity_name(),
            identity_email: default_identity_email(),
            compact_every: default_compact_every(),
            cross_ref_prefix: default_cross_ref_prefix(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is unset: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON log lines instead of text
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl RunConfig {
    /// Validate the entire configuration, reporting every problem at once.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.tools.names.is_empty() {
            errors.push("at least one generator tool is required".to_string());
        }
        for (i, name) in self.tools.names.iter().enumerate() {
            if name.trim().is_empty() || name.contains(['/', '\\']) {
                errors.push(format!("tool name {name:?} must be a bare name"));
            }
            if self.tools.names[..i].contains(name) {
                errors.push(format!("tool {name:?} is listed more than once"));
            }
        }
        for name in &self.tools.serial {
            if !self.tools.names.contains(name) {
                errors.push(format!("serial tool {name:?} is not in the tool list"));
            }
        }
        if self.inputs.extension.trim().is_empty() {
            errors.push("input extension must not be empty".to_string());
        }
        if let Some(BuildBackend::Custom { command }) = &self.build.backend {
            if command.is_empty() {
                errors.push("custom build command must not be empty".to_string());
            }
        }
        if self.generation.output_flag.trim().is_empty() {
            errors.push("output flag must not be empty".to_string());
        }
        if self.generation.max_workers == Some(0) {
            errors.push("max_workers must be at least 1".to_string());
        }
        if self.history.compact_every == 0 {
            errors.push("compact_every must be at least 1".to_string());
        }
        if self.history.store_path.as_os_str().is_empty() {
            errors.push("store path must not be empty".to_string());
        }
        if self.history.identity_name.trim().is_empty()
            || self.history.identity_email.trim().is_empty()
        {
            errors.push("store identity name and email must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors.join("; ")))
        }
    }
}

/// Loads `RunConfig` from TOML.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load a specific file.
    pub fn load_from_file(path: &Path) -> std::result::Result<RunConfig, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::File {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::load_from_str(&text).map_err(|e| match e {
            ConfigError::Invalid(reason) => ConfigError::File {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })
    }

    /// Parse TOML text.
    pub fn load_from_str(text: &str) -> std::result::Result<RunConfig, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Load `gencompare.toml` from the repository root, or defaults if absent.
    pub fn load(repo_root: &Path) -> std::result::Result<RunConfig, ConfigError> {
        let path = repo_root.join(CONFIG_FILE_NAME);
        if path.is_file() {
            Self::load_from_file(&path)
        } else {
            Ok(RunConfig::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RunConfig::default();
        config.validate().unwrap();
        assert_eq!(config.inputs.extension, "ice");
        assert_eq!(config.history.compact_every, 100);
        assert_eq!(config.revisions, RevisionSpec::Explicit(vec!["HEAD".into()]));
        assert_eq!(
            config.inputs.exclude_prefixes,
            vec!["cpp/test/Slice/", "java/test/Ice/", "java-compat/test/Ice/"]
        );
    }

    #[test]
    fn test_configured_excludes_extend_defaults() {
        let config = ConfigLoader::load_from_str(
            r#"
            [inputs]
            exclude_prefixes = ["slice/Ice/", "java/test/Ice/"]
            "#,
        )
        .unwrap();
        assert_eq!(
            config.inputs.exclude_prefixes,
            vec![
                "cpp/test/Slice/",
                "java/test/Ice/",
                "java-compat/test/Ice/",
                "slice/Ice/"
            ]
        );
    }

    #[test]
    fn test_validate_rejects_duplicate_tool_names() {
        let mut config = RunConfig::default();
        config.tools.names = vec!["serial".to_string(), "serial".to_string()];
        config.tools.serial = vec!["serial".to_string()];
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("\"serial\" is listed more than once"), "{err}");

        let specs = config.tools.specs();
        assert_eq!(specs.len(), 1);
        assert!(!specs[0].concurrency_safe);
    }

    #[test]
    fn test_default_serial_tools_are_not_concurrency_safe() {
        let specs = ToolsConfig::default().specs();
        let java = specs.iter().find(|s| s.name == "slice2java").unwrap();
        let cpp = specs.iter().find(|s| s.name == "slice2cpp").unwrap();
        assert!(!java.concurrency_safe);
        assert!(cpp.concurrency_safe);
    }

    #[test]
    fn test_load_from_str_overrides_and_keeps_defaults() {
        let config = ConfigLoader::load_from_str(
            r#"
            [tools]
            names = ["gen-a", "gen-b"]
            serial = ["gen-b"]

            [build]
            tool_dir = "out/bin"
            backend = { kind = "custom", command = ["./build.sh"] }

            [history]
            compact_every = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.tools.names, vec!["gen-a", "gen-b"]);
        assert_eq!(
            config.build.backend(),
            BuildBackend::Custom {
                command: vec!["./build.sh".to_string()]
            }
        );
        assert_eq!(config.history.compact_every, 5);
        assert_eq!(config.history.identity_name, "gencompare");
        assert_eq!(config.inputs.include_root, "slice");
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let mut config = RunConfig::default();
        config.tools.names = vec![];
        config.history.compact_every = 0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("at least one generator tool"));
        assert!(err.contains("compact_every"));
    }

    #[test]
    fn test_validate_rejects_unknown_serial_tool() {
        let mut config = RunConfig::default();
        config.tools.names = vec!["gen-a".to_string()];
        config.tools.serial = vec!["gen-z".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_build_paths_follow_platform() {
        let root = Path::new("/repo");
        let unix = BuildConfig {
            platform: Platform::Unix,
            ..BuildConfig::default()
        };
        assert_eq!(unix.project_path(root), PathBuf::from("/repo/cpp/Makefile"));
        assert_eq!(unix.tool_dir(root), PathBuf::from("/repo/cpp/bin"));
        assert_eq!(unix.backend(), BuildBackend::Make);

        let windows = BuildConfig {
            platform: Platform::Windows,
            ..BuildConfig::default()
        };
        assert_eq!(windows.backend(), BuildBackend::Msbuild);
        assert!(windows.tool_dir(root).ends_with("Debug"));
        assert_eq!(Platform::Windows.binary_suffix(), ".exe");
    }

    #[test]
    fn test_worker_bound() {
        let mut generation = GenerationConfig::default();
        assert_eq!(generation.worker_bound(), 1);
        generation.parallel = true;
        generation.max_workers = Some(3);
        assert_eq!(generation.worker_bound(), 3);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigLoader::load(dir.path()).unwrap();
        assert_eq!(config.tools.names, ToolsConfig::default().names);
    }
}
