//! Generation engine.
//!
//! Runs every generator tool over every input file of one revision. Tools
//! marked concurrency-safe fan out one task per (tool, input) pair; every
//! other tool gets a single sequential lane. Pool tasks and lanes share one
//! semaphore, so the worker bound holds across all of them.
//!
//! A failing invocation is recorded and never stops the others. Results are
//! reassembled in (tool, input) order so the diagnostic log does not depend
//! on completion order.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::context::RunContext;
use crate::domain::tool::GeneratorTool;
use crate::inputs::InputFile;
use crate::process::run_captured;

/// Result of one (tool, input) invocation.
#[derive(Debug, Clone, Serialize)]
pub struct InvocationRecord {
    pub tool: String,
    pub input: InputFile,
    pub exit_code: i32,
    /// Combined stdout/stderr of the tool.
    pub output: String,
    pub success: bool,
}

/// Everything one revision's generation phase produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerationResult {
    /// In (tool order, input order).
    pub invocations: Vec<InvocationRecord>,
    /// Set when an interrupt stopped dispatch before every pair ran.
    pub interrupted: bool,
}

impl GenerationResult {
    pub fn failed_count(&self) -> usize {
        self.invocations.iter().filter(|r| !r.success).count()
    }

    /// Diagnostic log in deterministic order.
    pub fn log(&self) -> String {
        let mut log = String::new();
        for record in &self.invocations {
            if !record.success {
                log.push_str(&format!(
                    "{} ./{}: exited with code {}\n",
                    record.tool, record.input, record.exit_code
                ));
            }
            if !record.output.is_empty() {
                log.push_str(&record.output);
                log.push('\n');
            }
        }
        log
    }
}

/// Runs generator tools over an input set.
#[derive(Debug, Clone)]
pub struct GenerationEngine {
    repo_root: PathBuf,
    output_flag: String,
    include_flag: String,
    include_root: String,
    workers: usize,
    timeout_secs: u64,
}

impl GenerationEngine {
    pub fn new(ctx: &RunContext) -> Self {
        let config = ctx.config();
        Self {
            repo_root: ctx.repo_root().to_path_buf(),
            output_flag: config.generation.output_flag.clone(),
            include_flag: config.generation.include_flag.clone(),
            include_root: config.inputs.include_root.clone(),
            workers: config.generation.worker_bound(),
            timeout_secs: config.generation.invocation_timeout_secs,
        }
    }

    /// Output directory for `tool` applied to `input`.
    pub fn output_dir(out_root: &Path, tool: &str, input: &InputFile) -> PathBuf {
        let mut dir = out_root.join(tool);
        for part in input.parent().split('/').filter(|p| !p.is_empty()) {
            dir.push(part);
        }
        dir
    }

    /// argv for one invocation, run from the repository root.
    pub fn arguments(&self, tool: &GeneratorTool, input: &InputFile, out_dir: &Path) -> Vec<String> {
        let parent = input.parent();
        let grandparent = match parent.rfind('/') {
            Some(i) => &parent[..i],
            None => "",
        };
        vec![
            tool.binary.to_string_lossy().to_string(),
            self.output_flag.clone(),
            out_dir.to_string_lossy().to_string(),
            format!("{}{}", self.include_flag, dotted(&self.include_root)),
            format!("{}{}", self.include_flag, dotted(parent)),
            format!("{}{}", self.include_flag, dotted(grandparent)),
            format!("./{input}"),
        ]
    }

    /// Run every tool over every input, writing under `out_root`.
    ///
    /// Returns once all dispatched invocations have finished. When `cancel`
    /// turns `true`, pending pairs are skipped and `interrupted` is set.
    /// A tool listed twice runs once, in its first position.
    pub async fn generate(
        &self,
        tools: &[GeneratorTool],
        inputs: &[InputFile],
        out_root: &Path,
        cancel: watch::Receiver<bool>,
    ) -> GenerationResult {
        let tools = unique_by_name(tools);
        let results: Arc<Mutex<Vec<(usize, InvocationRecord)>>> =
            Arc::new(Mutex::new(Vec::new()));
        let sem = Arc::new(Semaphore::new(self.workers));
        let total = tools.len() * inputs.len();
        let mut tasks: Vec<(Vec<usize>, JoinHandle<()>)> = Vec::new();

        info!(
            tools = tools.len(),
            inputs = inputs.len(),
            workers = self.workers,
            "running generators"
        );

        for (t, tool) in tools.iter().enumerate() {
            if tool.concurrency_safe {
                for (i, input) in inputs.iter().enumerate() {
                    let slot = t * inputs.len() + i;
                    let engine = self.clone();
                    let tool = tool.clone();
                    let input = input.clone();
                    let out_root = out_root.to_path_buf();
                    let sem = Arc::clone(&sem);
                    let results = Arc::clone(&results);
                    let cancel = cancel.clone();

                    let handle = tokio::spawn(async move {
                        let _permit = sem.acquire_owned().await.ok();
                        if *cancel.borrow() {
                            return;
                        }
                        let record = engine.invoke(&tool, &input, &out_root).await;
                        results.lock().await.push((slot, record));
                    });
                    tasks.push((vec![slot], handle));
                }
            } else {
                // Sequential lane: one invocation of this tool at a time.
                let engine = self.clone();
                let tool = tool.clone();
                let lane_inputs = inputs.to_vec();
                let out_root = out_root.to_path_buf();
                let sem = Arc::clone(&sem);
                let results = Arc::clone(&results);
                let cancel = cancel.clone();
                let base = t * inputs.len();

                let handle = tokio::spawn(async move {
                    for (i, input) in lane_inputs.iter().enumerate() {
                        let _permit = Arc::clone(&sem).acquire_owned().await.ok();
                        if *cancel.borrow() {
                            return;
                        }
                        let record = engine.invoke(&tool, input, &out_root).await;
                        results.lock().await.push((base + i, record));
                    }
                });
                tasks.push(((base..base + inputs.len()).collect(), handle));
            }
        }

        join_tasks(tasks, &tools, inputs, &results, &cancel).await;

        let mut collected = std::mem::take(&mut *results.lock().await);
        collected.sort_by_key(|(slot, _)| *slot);
        let invocations: Vec<InvocationRecord> =
            collected.into_iter().map(|(_, record)| record).collect();
        let interrupted = invocations.len() < total;

        let result = GenerationResult {
            invocations,
            interrupted,
        };
        info!(
            invocations = result.invocations.len(),
            failed = result.failed_count(),
            interrupted,
            "generation finished"
        );
        result
    }

    async fn invoke(&self, tool: &GeneratorTool, input: &InputFile, out_root: &Path) -> InvocationRecord {
        let out_dir = Self::output_dir(out_root, &tool.name, input);
        if let Err(e) = tokio::fs::create_dir_all(&out_dir).await {
            return InvocationRecord {
                tool: tool.name.clone(),
                input: input.clone(),
                exit_code: -1,
                output: format!("cannot create {}: {e}", out_dir.display()),
                success: false,
            };
        }

        let argv = self.arguments(tool, input, &out_dir);
        debug!(tool = %tool.name, input = %input, "invoking generator");
        let output = run_captured(&argv, &self.repo_root, self.timeout_secs).await;
        if !output.success {
            debug!(tool = %tool.name, input = %input, exit_code = output.exit_code, "generator failed");
        }

        InvocationRecord {
            tool: tool.name.clone(),
            input: input.clone(),
            exit_code: output.exit_code,
            output: output.combined(),
            success: output.success,
        }
    }
}

/// First occurrence of each tool name, in order.
fn unique_by_name(tools: &[GeneratorTool]) -> Vec<GeneratorTool> {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(tools.len());
    for tool in tools {
        if seen.insert(tool.name.as_str()) {
            unique.push(tool.clone());
        } else {
            warn!(tool = %tool.name, "tool listed more than once, running it once");
        }
    }
    unique
}

/// Wait for every task. The slots of a task that panicked and never
/// produced a record are recorded as failed invocations of their own pair,
/// unless the run was cancelled, in which case they stay missing.
async fn join_tasks(
    tasks: Vec<(Vec<usize>, JoinHandle<()>)>,
    tools: &[GeneratorTool],
    inputs: &[InputFile],
    results: &Mutex<Vec<(usize, InvocationRecord)>>,
    cancel: &watch::Receiver<bool>,
) {
    for (slots, handle) in tasks {
        let Err(e) = handle.await else {
            continue;
        };
        warn!(error = %e, "generator task panicked");
        if *cancel.borrow() || inputs.is_empty() {
            continue;
        }
        let mut results = results.lock().await;
        for slot in slots {
            if results.iter().any(|(done, _)| *done == slot) {
                continue;
            }
            let tool = &tools[slot / inputs.len()];
            results.push((
                slot,
                InvocationRecord {
                    tool: tool.name.clone(),
                    input: inputs[slot % inputs.len()].clone(),
                    exit_code: -1,
                    output: format!("generator task panicked: {e}"),
                    success: false,
                },
            ));
        }
    }
}

/// `./<rel>`, or `.` for the repository root.
fn dotted(rel: &str) -> String {
    if rel.is_empty() {
        ".".to_string()
    } else {
        format!("./{rel}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;

    fn engine(root: &Path, parallel: bool) -> GenerationEngine {
        let mut config = RunConfig::default();
        config.generation.parallel = parallel;
        config.generation.max_workers = Some(4);
        let ctx = RunContext::new(root, root, config).unwrap();
        GenerationEngine::new(&ctx)
    }

    fn tool(name: &str, binary: &str, safe: bool) -> GeneratorTool {
        GeneratorTool {
            name: name.to_string(),
            binary: PathBuf::from(binary),
            concurrency_safe: safe,
        }
    }

    #[test]
    fn test_argument_layout() {
        let engine = engine(Path::new("/repo"), false);
        let input = InputFile::new("cpp/test/Ice/Test.ice");
        let out = GenerationEngine::output_dir(Path::new("/out"), "gen", &input);
        assert_eq!(out, PathBuf::from("/out/gen/cpp/test/Ice"));

        let argv = engine.arguments(&tool("gen", "/bin/gen", true), &input, &out);
        assert_eq!(
            argv,
            vec![
                "/bin/gen",
                "--output-dir",
                "/out/gen/cpp/test/Ice",
                "-I./slice",
                "-I./cpp/test/Ice",
                "-I./cpp/test",
                "./cpp/test/Ice/Test.ice",
            ]
        );
    }

    #[test]
    fn test_argument_layout_at_root() {
        let engine = engine(Path::new("/repo"), false);
        let input = InputFile::new("Top.ice");
        let argv = engine.arguments(&tool("gen", "/bin/gen", true), &input, Path::new("/out/gen"));
        assert_eq!(argv[4], "-I.");
        assert_eq!(argv[5], "-I.");
        assert_eq!(argv[6], "./Top.ice");
    }

    #[test]
    fn test_log_is_ordered_and_marks_failures() {
        let result = GenerationResult {
            invocations: vec![
                InvocationRecord {
                    tool: "a".to_string(),
                    input: InputFile::new("x.ice"),
                    exit_code: 0,
                    output: String::new(),
                    success: true,
                },
                InvocationRecord {
                    tool: "b".to_string(),
                    input: InputFile::new("x.ice"),
                    exit_code: 1,
                    output: "x.ice:1: syntax error".to_string(),
                    success: false,
                },
            ],
            interrupted: false,
        };
        assert_eq!(
            result.log(),
            "b ./x.ice: exited with code 1\nx.ice:1: syntax error\n"
        );
        assert_eq!(result.failed_count(), 1);
    }

    #[test]
    fn test_repeated_tool_names_collapse() {
        let tools = [
            tool("serial", "/bin/a", false),
            tool("gen", "/bin/gen", true),
            tool("serial", "/bin/b", false),
        ];
        let unique = unique_by_name(&tools);
        let names: Vec<&str> = unique.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["serial", "gen"]);
        assert_eq!(unique[0].binary, PathBuf::from("/bin/a"));
    }

    #[tokio::test]
    async fn test_panicked_task_is_recorded_as_failure() {
        let tools = [tool("lane", "/bin/lane", false)];
        let inputs = [InputFile::new("a.ice"), InputFile::new("b.ice")];
        let done = InvocationRecord {
            tool: "lane".to_string(),
            input: inputs[0].clone(),
            exit_code: 0,
            output: String::new(),
            success: true,
        };
        let results = Mutex::new(vec![(0, done)]);
        let handle = tokio::spawn(async { panic!("lane crashed"); });
        let (_tx, rx) = watch::channel(false);

        join_tasks(vec![(vec![0, 1], handle)], &tools, &inputs, &results, &rx).await;

        let results = results.into_inner();
        assert_eq!(results.len(), 2);
        let (slot, record) = &results[1];
        assert_eq!(*slot, 1);
        assert_eq!(record.input, InputFile::new("b.ice"));
        assert!(!record.success);
        assert_eq!(record.exit_code, -1);
        assert!(record.output.starts_with("generator task panicked"));
    }

    #[tokio::test]
    async fn test_panicked_task_after_cancel_stays_missing() {
        let tools = [tool("gen", "/bin/gen", true)];
        let inputs = [InputFile::new("a.ice")];
        let results = Mutex::new(Vec::new());
        let handle = tokio::spawn(async { panic!("gen crashed"); });
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        join_tasks(vec![(vec![0], handle)], &tools, &inputs, &results, &rx).await;
        assert!(results.into_inner().is_empty());
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        /// Write an executable shell script standing in for a generator.
        pub(super) fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
            let path = dir.join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn inputs(root: &Path, names: &[&str]) -> Vec<InputFile> {
            for name in names {
                let path = root.join(name);
                std::fs::create_dir_all(path.parent().unwrap()).unwrap();
                std::fs::write(path, name).unwrap();
            }
            names.iter().map(|n| InputFile::new(*n)).collect()
        }

        // Copies the input (last argument) into the output dir (third).
        const COPY: &str = r#"out="$2"; for last; do :; done; cp "$last" "$out/"; echo "generated $last""#;

        #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
        async fn test_failure_is_isolated() {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path();
            let good = script(root, "good", COPY);
            let bad = script(root, "bad", "echo broken >&2; exit 1");
            let inputs = inputs(root, &["s/a.ice", "s/b.ice"]);
            let out = root.join("_gen_out");
            let (_tx, rx) = watch::channel(false);

            let result = engine(root, true)
                .generate(
                    &[
                        tool("bad", bad.to_str().unwrap(), true),
                        tool("good", good.to_str().unwrap(), true),
                    ],
                    &inputs,
                    &out,
                    rx,
                )
                .await;

            assert_eq!(result.invocations.len(), 4);
            assert_eq!(result.failed_count(), 2);
            assert!(!result.interrupted);
            assert!(out.join("good/s/a.ice").exists());
            assert!(out.join("good/s/b.ice").exists());
            assert_eq!(result.invocations[0].tool, "bad");
            assert_eq!(result.invocations[3].input, InputFile::new("s/b.ice"));
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
        async fn test_unsafe_tool_never_overlaps_itself() {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path();
            // Fails if another instance holds the lock directory.
            let body = r#"mkdir "$2/../.lock" 2>/dev/null || exit 9
sleep 0.05
rmdir "$2/../.lock""#;
            let serial = script(root, "serial", body);
            let names: Vec<String> = (0..6).map(|i| format!("f{i}.ice")).collect();
            let refs: Vec<&str> = names.iter().map(String::as_str).collect();
            let inputs = inputs(root, &refs);
            let out = root.join("_gen_out");
            let (_tx, rx) = watch::channel(false);

            let result = engine(root, true)
                .generate(&[tool("serial", serial.to_str().unwrap(), false)], &inputs, &out, rx)
                .await;

            assert_eq!(result.invocations.len(), 6);
            assert_eq!(result.failed_count(), 0, "log: {}", result.log());
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
        async fn test_tool_listed_twice_keeps_one_lane() {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path();
            let body = r#"mkdir "$2/../.lock" 2>/dev/null || exit 9
sleep 0.05
rmdir "$2/../.lock""#;
            let serial = script(root, "serial", body);
            let inputs = inputs(root, &["f0.ice", "f1.ice", "f2.ice", "f3.ice"]);
            let out = root.join("_gen_out");
            let (_tx, rx) = watch::channel(false);
            let serial = tool("serial", serial.to_str().unwrap(), false);

            let result = engine(root, true)
                .generate(&[serial.clone(), serial], &inputs, &out, rx)
                .await;

            assert_eq!(result.invocations.len(), 4);
            assert_eq!(result.failed_count(), 0, "log: {}", result.log());
            assert!(!result.interrupted);
        }

        #[tokio::test]
        async fn test_repeated_runs_produce_identical_logs() {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path();
            let good = script(root, "good", COPY);
            let inputs = inputs(root, &["a.ice", "b.ice", "c.ice"]);
            let tools = [tool("good", good.to_str().unwrap(), true)];
            let (_tx, rx) = watch::channel(false);

            let first = engine(root, true)
                .generate(&tools, &inputs, &root.join("_gen_1"), rx.clone())
                .await;
            let second = engine(root, true)
                .generate(&tools, &inputs, &root.join("_gen_1"), rx)
                .await;
            assert_eq!(first.log(), second.log());
        }

        #[tokio::test]
        async fn test_cancelled_before_dispatch() {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path();
            let good = script(root, "good", COPY);
            let inputs = inputs(root, &["a.ice"]);
            let (tx, rx) = watch::channel(false);
            tx.send(true).unwrap();

            let result = engine(root, false)
                .generate(
                    &[
                        tool("good", good.to_str().unwrap(), true),
                        tool("lane", good.to_str().unwrap(), false),
                    ],
                    &inputs,
                    &root.join("_gen_out"),
                    rx,
                )
                .await;
            assert!(result.interrupted);
            assert!(result.invocations.is_empty());
        }
    }
}
