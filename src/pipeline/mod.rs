//! The default build pipeline.
//!
//! ```text
//! bundle ──┬── transpile ──┬── write-banner ─────────────────────────────────┐
//!          │               └── generate-entries ── patch-deprecated-symbols  │
//!          │                                         └── validate-docs ──────┴── generate-docs
//!          └── minify
//! ```
//!
//! The bundle task also refreshes the version marker inside the source tree,
//! which is why transpiling waits for it.

mod entries;

use std::fs;
use std::sync::Arc;

use anyhow::Context;

use crate::artifact::{ArtifactWriter, version_marker};
use crate::banner::BannerProvider;
use crate::config::PipelineConfig;
use crate::engine::{Completion, RunReport, Scheduler, TaskGraph};
use crate::error::ConfigurationError;
use crate::tool::{self, AsciiValidator, CommandTool, ExternalTool, ToolCommand, ToolInput};

pub use crate::pipeline::entries::{dangling_aliases, patch_entry, read_symbols};

pub const BUNDLE: &str = "bundle";
pub const TRANSPILE: &str = "transpile";
pub const WRITE_BANNER: &str = "write-banner";
pub const GENERATE_ENTRIES: &str = "generate-entries";
pub const PATCH_DEPRECATED: &str = "patch-deprecated-symbols";
pub const MINIFY: &str = "minify";
pub const VALIDATE_DOCS: &str = "validate-docs";
pub const GENERATE_DOCS: &str = "generate-docs";

/// Tasks re-run on every change in watch mode.
pub const WATCH_SUBSET: [&str; 3] = [BUNDLE, TRANSPILE, PATCH_DEPRECATED];

/// The external tools used by the pipeline.
#[derive(Clone)]
pub struct Toolset {
    pub bundler: Arc<dyn ExternalTool>,
    pub transpiler: Arc<dyn ExternalTool>,
    pub minifier: Arc<dyn ExternalTool>,
    pub entries: Arc<dyn ExternalTool>,
    pub docs: Arc<dyn ExternalTool>,
    pub validator: Arc<dyn ExternalTool>,
}

impl Toolset {
    /// Builds the tools named in the config, all running in the project root.
    pub fn from_config(config: &PipelineConfig) -> Self {
        let tools = &config.tools;
        let spawn = |name: &str, command: ToolCommand| -> Arc<dyn ExternalTool> {
            Arc::new(CommandTool::new(name, command, config.root.clone()))
        };

        let validator: Arc<dyn ExternalTool> = match &tools.validator {
            Some(validator) => spawn("validator", validator.clone()),
            None => Arc::new(AsciiValidator::default()),
        };

        Self {
            bundler: spawn("bundler", tools.bundler.clone()),
            transpiler: spawn("transpiler", tools.transpiler.clone()),
            minifier: spawn("minifier", tools.minifier.clone()),
            entries: spawn("entries", tools.entries.clone()),
            docs: spawn("docs", tools.docs.clone()),
            validator,
        }
    }
}

/// State shared by every task of the pipeline.
struct Shared {
    config: PipelineConfig,
    tools: Toolset,
    writer: ArtifactWriter,
    banner: BannerProvider,
}

/// The task graph of a build, together with the config it was made from.
pub struct Pipeline {
    shared: Arc<Shared>,
    graph: TaskGraph,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, ConfigurationError> {
        let tools = Toolset::from_config(&config);
        Self::with_tools(config, tools)
    }

    pub fn with_tools(config: PipelineConfig, tools: Toolset) -> Result<Self, ConfigurationError> {
        let shared = Arc::new(Shared {
            writer: ArtifactWriter::new(config.root.clone()),
            banner: BannerProvider::new(
                config.path(&config.banner_template),
                config.path(&config.manifest),
            ),
            config,
            tools,
        });

        let graph = register(&shared)?;
        Ok(Self { shared, graph })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.shared.config
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    /// Runs every task once.
    pub fn run_once(&self, scheduler: &Scheduler) -> Result<RunReport, ConfigurationError> {
        let plan = self.graph.compute_plan()?;
        tracing::debug!("plan:\n{}", plan);
        Ok(scheduler.run(&self.graph, &plan))
    }

    /// Runs every task once, then keeps re-running the watch subset on
    /// changes until the scheduler's cancel token is triggered.
    #[cfg(feature = "live")]
    pub fn watch<F>(&self, scheduler: Scheduler, mut on_report: F) -> Result<(), crate::KumitateError>
    where
        F: FnMut(&RunReport),
    {
        use crate::engine::watch::{WatchController, WatchOptions, WatchSession};

        let plan = self.graph.plan_for(WATCH_SUBSET)?;

        tracing::info!("running initial build...");
        let report = self.run_once(&scheduler)?;
        on_report(&report);

        if scheduler.cancel_token().is_cancelled() {
            return Ok(());
        }

        let config = self.config();
        let options = WatchOptions {
            root: config.root.clone(),
            watch: config.watch.paths.clone(),
            exclude: config.watch_exclusions(),
            debounce: config.debounce(),
        };

        let session = WatchSession::start(&options, plan)?;
        tracing::info!("initial build completed, now watching for changes...");

        let mut controller = WatchController::new(scheduler, session);
        controller.run(&self.graph, on_report)?;
        controller.into_session().stop();

        Ok(())
    }
}

fn register(shared: &Arc<Shared>) -> Result<TaskGraph, ConfigurationError> {
    let config = &shared.config;
    let paths = &config.paths;
    let mut graph = TaskGraph::new();

    let cx = shared.clone();
    graph
        .task(BUNDLE)
        .outputs([config.path(&paths.bundle), config.path(&config.version_marker)])
        .run(move |ctx| {
            let banner = cx.banner.banner()?;
            cx.writer
                .write(&cx.config.version_marker, version_marker(&banner.version))?;

            let input = ToolInput::new(
                [cx.config.path(&cx.config.entry)],
                cx.config.path(&cx.config.paths.bundle),
            )
            .with("banner", banner.text);

            tool::complete(cx.tools.bundler.run(&input, ctx.cancel))
        })?;

    let cx = shared.clone();
    graph
        .task(TRANSPILE)
        .depends_on([BUNDLE])
        .outputs([config.path(&paths.package)])
        .run(move |ctx| {
            let input = ToolInput::new(
                [cx.config.path(&cx.config.source_dir)],
                cx.config.path(&cx.config.paths.package),
            );

            tool::complete(cx.tools.transpiler.run(&input, ctx.cancel))
        })?;

    let cx = shared.clone();
    graph
        .task(WRITE_BANNER)
        .depends_on([TRANSPILE])
        .outputs([config.path(&paths.package_banner)])
        .run(move |_| {
            let banner = cx.banner.banner()?;
            cx.writer.write(&cx.config.paths.package_banner, banner.text)?;
            Ok(Completion::Success)
        })?;

    let cx = shared.clone();
    graph
        .task(GENERATE_ENTRIES)
        .depends_on([TRANSPILE])
        .outputs([config.path(&paths.generated_entry), config.path(&paths.symbols)])
        .run(move |ctx| {
            let paths = &cx.config.paths;
            let input = ToolInput::new([cx.config.path(&paths.package)], cx.config.path(&paths.generated_entry))
                .with("symbols", cx.config.path(&paths.symbols).into_string());

            let completion = tool::complete(cx.tools.entries.run(&input, ctx.cancel))?;

            let symbols = read_symbols(&cx.config.path(&paths.symbols))?;
            tracing::info!("{} exported symbol(s)", symbols.len());

            Ok(completion)
        })?;

    let cx = shared.clone();
    graph
        .task(PATCH_DEPRECATED)
        .depends_on([GENERATE_ENTRIES])
        .outputs([config.path(&paths.patched_entry)])
        .run(move |_| {
            let paths = &cx.config.paths;
            let aliases = &cx.config.deprecated;

            let entry = cx.config.path(&paths.generated_entry);
            let source = fs::read_to_string(&entry)
                .with_context(|| format!("Couldn't read generated entry '{entry}'"))?;

            cx.writer.write(&paths.patched_entry, patch_entry(&source, aliases))?;

            let warnings = match read_symbols(&cx.config.path(&paths.symbols)) {
                Ok(symbols) => dangling_aliases(aliases, &symbols),
                Err(e) => vec![format!("{e:#}")],
            };

            Ok(Completion::from_warnings(warnings))
        })?;

    let cx = shared.clone();
    graph
        .task(MINIFY)
        .depends_on([BUNDLE])
        .outputs([config.path(&paths.minified), config.path(&paths.source_map)])
        .run(move |ctx| {
            let paths = &cx.config.paths;
            let banner = cx.banner.banner()?;

            let map_name = paths.source_map.file_name().unwrap_or_default().to_string();

            // the banner goes in as a preamble so the source map accounts for it
            let input = ToolInput::new([cx.config.path(&paths.bundle)], cx.config.path(&paths.minified))
                .with("banner", banner.text)
                .with("map", cx.config.path(&paths.source_map).into_string())
                .with("map_name", map_name);

            tool::complete(cx.tools.minifier.run(&input, ctx.cancel))
        })?;

    let cx = shared.clone();
    graph
        .task(VALIDATE_DOCS)
        .depends_on([PATCH_DEPRECATED])
        .run(move |ctx| {
            let paths = &cx.config.paths;
            let validator = &cx.tools.validator;
            tracing::debug!("validating with {} ({:?})", validator.name(), validator.isolation());

            let input = ToolInput::new(
                [cx.config.path(&paths.package), cx.config.path(&paths.patched_entry)],
                cx.config.path(&paths.package),
            );

            tool::complete(validator.run(&input, ctx.cancel))
        })?;

    let cx = shared.clone();
    graph
        .task(GENERATE_DOCS)
        .depends_on([VALIDATE_DOCS, WRITE_BANNER])
        .outputs([config.path(&paths.docs)])
        .run(move |ctx| {
            let paths = &cx.config.paths;
            let symbols = read_symbols(&cx.config.path(&paths.symbols))?;

            let input = ToolInput::new([cx.config.path(&paths.package)], cx.config.path(&paths.docs))
                .with("symbols", cx.config.path(&paths.symbols).into_string());

            match tool::complete(cx.tools.docs.run(&input, ctx.cancel))? {
                Completion::Success if symbols.is_empty() => Ok(Completion::Warning(vec![
                    String::from("no exported symbols to document"),
                ])),
                completion => Ok(completion),
            }
        })?;

    Ok(graph)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use camino::{Utf8Path, Utf8PathBuf};

    use super::*;
    use crate::banner::today;
    use crate::config::DeprecatedAlias;
    use crate::engine::{CancelToken, Outcome, RunStatus};
    use crate::error::ToolError;
    use crate::tool::ToolReport;

    /// Stands in for an external tool by writing a fixed output.
    struct Fake {
        name: &'static str,
        fail: bool,
        calls: Mutex<Vec<ToolInput>>,
    }

    impl Fake {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                fail: false,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn failing(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                fail: true,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    impl ExternalTool for Fake {
        fn name(&self) -> &str {
            self.name
        }

        fn run(&self, input: &ToolInput, _: &CancelToken) -> Result<ToolReport, ToolError> {
            self.calls.lock().unwrap().push(input.clone());
            if self.fail {
                return Err(ToolError::new(self.name).with_error("src/a.js:1:1 unexpected token"));
            }

            let write = |path: &Utf8Path, text: &str| {
                fs::create_dir_all(path.parent().unwrap()).unwrap();
                fs::write(path, text).unwrap();
            };

            match self.name {
                "transpiler" | "docs" => write(&input.output.join("index.js"), "module.exports = {};"),
                "entries" => {
                    write(&input.output, "export { add } from './add.js';\n");
                    write(Utf8Path::new(&input.extra["symbols"]), r#"["add"]"#);
                }
                "minifier" => {
                    let preamble = input.extra.get("banner").map_or("", String::as_str);
                    write(&input.output, &format!("{preamble}/* code */"));
                    write(Utf8Path::new(&input.extra["map"]), "{\"mappings\":\"AAAA\"}");
                }
                _ => write(&input.output, "/* code */"),
            }

            Ok(ToolReport {
                artifacts: vec![input.output.clone()],
                warnings: vec![],
            })
        }
    }

    fn project() -> (tempfile::TempDir, PipelineConfig) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();

        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("package.json"), r#"{ "name": "lib", "version": "9.9.9" }"#).unwrap();
        fs::write(
            root.join("src/header.js"),
            "/**\n * library @@version\n * @date @@date\n */\n",
        )
        .unwrap();

        let config = PipelineConfig {
            root,
            deprecated: vec![DeprecatedAlias {
                old: "plus".into(),
                new: "add".into(),
            }],
            ..PipelineConfig::default()
        };

        (dir, config)
    }

    fn toolset(transpiler: Arc<Fake>) -> Toolset {
        Toolset {
            bundler: Fake::new("bundler"),
            transpiler,
            minifier: Fake::new("minifier"),
            entries: Fake::new("entries"),
            docs: Fake::new("docs"),
            validator: Arc::new(AsciiValidator::default()),
        }
    }

    #[test]
    fn test_default_plan() {
        let (_dir, config) = project();
        let pipeline = Pipeline::with_tools(config, toolset(Fake::new("transpiler"))).unwrap();

        let plan = pipeline.graph().compute_plan().unwrap();
        let order: Vec<_> = plan.order().collect();
        assert_eq!(
            order,
            vec![
                BUNDLE,
                TRANSPILE,
                MINIFY,
                WRITE_BANNER,
                GENERATE_ENTRIES,
                PATCH_DEPRECATED,
                VALIDATE_DOCS,
                GENERATE_DOCS,
            ]
        );
        assert!(pipeline.graph().plan_for(WATCH_SUBSET).is_ok());
    }

    #[test]
    fn test_run_once_end_to_end() {
        let (_dir, config) = project();
        let root = config.root.clone();
        let pipeline = Pipeline::with_tools(config, toolset(Fake::new("transpiler"))).unwrap();

        let report = pipeline.run_once(&Scheduler::new()).unwrap();
        assert_eq!(report.status(), RunStatus::Success, "{report}");

        let banner = fs::read_to_string(root.join("lib/cjs/header.js")).unwrap();
        assert!(banner.contains("library 9.9.9"));
        assert!(banner.contains(&format!("@date {}", today())));

        let marker = fs::read_to_string(root.join("src/version.js")).unwrap();
        assert_eq!(marker, "export const VERSION = \"9.9.9\";\n");

        let minified = fs::read_to_string(root.join("dist/library.min.js")).unwrap();
        assert!(minified.starts_with("/**\n * library 9.9.9"));
        assert!(minified.ends_with("/* code */"));

        let patched = fs::read_to_string(root.join("lib/entry/index.js")).unwrap();
        assert!(patched.contains("export { add as plus };"));
    }

    #[test]
    fn test_bundler_receives_banner() {
        let (_dir, config) = project();
        let bundler = Fake::new("bundler");
        let tools = Toolset {
            bundler: bundler.clone(),
            ..toolset(Fake::new("transpiler"))
        };
        let pipeline = Pipeline::with_tools(config, tools).unwrap();
        pipeline.run_once(&Scheduler::new()).unwrap();

        let calls = bundler.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].extra["banner"].contains("library 9.9.9"));
        assert!(calls[0].inputs[0].ends_with("src/index.js"));
    }

    #[test]
    fn test_minifier_owns_banner_and_map() {
        let (_dir, config) = project();
        let root = config.root.clone();
        let minifier = Fake::new("minifier");
        let tools = Toolset {
            minifier: minifier.clone(),
            ..toolset(Fake::new("transpiler"))
        };
        let pipeline = Pipeline::with_tools(config, tools).unwrap();
        pipeline.run_once(&Scheduler::new()).unwrap();

        let calls = minifier.calls.lock().unwrap();
        let banner = &calls[0].extra["banner"];
        assert!(banner.contains("library 9.9.9"));
        assert!(calls[0].extra["map"].ends_with("dist/library.min.js.map"));

        // the files are exactly what the minifier wrote
        let minified = fs::read_to_string(root.join("dist/library.min.js")).unwrap();
        assert_eq!(minified, format!("{banner}/* code */"));
        let map = fs::read_to_string(root.join("dist/library.min.js.map")).unwrap();
        assert_eq!(map, r#"{"mappings":"AAAA"}"#);
    }

    #[cfg(feature = "live")]
    #[test]
    fn test_watch_returns_once_cancelled() {
        let (_dir, config) = project();
        let pipeline = Pipeline::with_tools(config, toolset(Fake::new("transpiler"))).unwrap();

        let scheduler = Scheduler::new();
        let cancel = scheduler.cancel_token().clone();
        let mut statuses = Vec::new();

        pipeline
            .watch(scheduler, |report| {
                statuses.push(report.status());
                cancel.cancel();
            })
            .unwrap();

        assert_eq!(statuses, vec![RunStatus::Success]);
    }

    #[test]
    fn test_transpile_failure_skips_dependents() {
        let (_dir, config) = project();
        let root = config.root.clone();
        let pipeline = Pipeline::with_tools(config, toolset(Fake::failing("transpiler"))).unwrap();

        let report = pipeline.run_once(&Scheduler::new()).unwrap();
        assert_eq!(report.status(), RunStatus::Failure);

        match report.outcome(TRANSPILE) {
            Some(Outcome::Failure(e)) => {
                let e = e.downcast_ref::<ToolError>().unwrap();
                assert_eq!(e.errors, vec!["src/a.js:1:1 unexpected token".to_string()]);
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        for name in [WRITE_BANNER, GENERATE_ENTRIES, PATCH_DEPRECATED, VALIDATE_DOCS, GENERATE_DOCS] {
            assert!(
                matches!(report.outcome(name), Some(Outcome::Skipped(cause)) if cause == TRANSPILE),
                "{name} should be skipped"
            );
        }

        assert!(matches!(report.outcome(BUNDLE), Some(Outcome::Success)));
        assert!(matches!(report.outcome(MINIFY), Some(Outcome::Success)));
        assert!(root.join("dist/library.min.js").is_file());
    }

    #[test]
    fn test_manifest_error_fails_bundle() {
        let (_dir, config) = project();
        fs::write(config.path("package.json"), "not json").unwrap();
        let pipeline = Pipeline::with_tools(config, toolset(Fake::new("transpiler"))).unwrap();

        let report = pipeline.run_once(&Scheduler::new()).unwrap();
        match report.outcome(BUNDLE) {
            Some(Outcome::Failure(e)) => assert!(e.to_string().contains("not valid JSON")),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(matches!(report.outcome(MINIFY), Some(Outcome::Skipped(_))));
    }

    #[test]
    fn test_non_ascii_output_fails_validation() {
        let (_dir, config) = project();
        let root = config.root.clone();
        fs::create_dir_all(root.join("lib/cjs")).unwrap();
        fs::write(root.join("lib/cjs/unicode.js"), "// caf\u{e9}\n").unwrap();

        let pipeline = Pipeline::with_tools(config, toolset(Fake::new("transpiler"))).unwrap();
        let report = pipeline.run_once(&Scheduler::new()).unwrap();

        assert!(matches!(report.outcome(VALIDATE_DOCS), Some(Outcome::Failure(_))));
        assert!(matches!(report.outcome(GENERATE_DOCS), Some(Outcome::Skipped(_))));
        assert!(matches!(report.outcome(WRITE_BANNER), Some(Outcome::Success)));
    }
}
