//! Pipeline configuration, read from a JSON file. Every field has a default,
//! so an empty object (or no file at all) describes the conventional layout.

use std::fs;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::KumitateError;
use crate::tool::ToolCommand;

/// Name of the config file looked up in the project root.
pub const CONFIG_FILE: &str = "kumitate.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Project root, every other path is relative to it.
    pub root: Utf8PathBuf,
    /// JSON manifest holding the `version` field.
    pub manifest: Utf8PathBuf,
    /// Banner template with `@@version` and `@@date` tokens.
    pub banner_template: Utf8PathBuf,
    pub source_dir: Utf8PathBuf,
    /// Entry module handed to the bundler.
    pub entry: Utf8PathBuf,
    /// Generated module exporting the version string.
    pub version_marker: Utf8PathBuf,
    pub paths: OutputPaths,
    pub tools: Tools,
    pub watch: WatchConfig,
    /// Renamed exports kept available under their old names.
    pub deprecated: Vec<DeprecatedAlias>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputPaths {
    pub bundle: Utf8PathBuf,
    pub minified: Utf8PathBuf,
    pub source_map: Utf8PathBuf,
    /// Root of the transpiled package.
    pub package: Utf8PathBuf,
    /// Banner file written into the transpiled package.
    pub package_banner: Utf8PathBuf,
    /// Entry file written by the entry generator.
    pub generated_entry: Utf8PathBuf,
    /// Exported symbol names written by the entry generator.
    pub symbols: Utf8PathBuf,
    /// Entry file with the deprecated re-exports appended.
    pub patched_entry: Utf8PathBuf,
    pub docs: Utf8PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Tools {
    pub bundler: ToolCommand,
    pub transpiler: ToolCommand,
    pub minifier: ToolCommand,
    pub entries: ToolCommand,
    pub docs: ToolCommand,
    /// Runs validation in a separate process. When unset, the built-in
    /// ASCII validator runs in process.
    pub validator: Option<ToolCommand>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchConfig {
    /// Globs which trigger a rebuild.
    pub paths: Vec<String>,
    /// Globs which never trigger a rebuild, in addition to the version marker.
    pub exclude: Vec<String>,
    pub debounce_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeprecatedAlias {
    /// Name the symbol used to be exported under.
    pub old: String,
    /// Name it is exported under now.
    pub new: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            root: Utf8PathBuf::from("."),
            manifest: "package.json".into(),
            banner_template: "src/header.js".into(),
            source_dir: "src".into(),
            entry: "src/index.js".into(),
            version_marker: "src/version.js".into(),
            paths: OutputPaths::default(),
            tools: Tools::default(),
            watch: WatchConfig::default(),
            deprecated: Vec::new(),
        }
    }
}

impl Default for OutputPaths {
    fn default() -> Self {
        Self {
            bundle: "dist/library.js".into(),
            minified: "dist/library.min.js".into(),
            source_map: "dist/library.min.js.map".into(),
            package: "lib/cjs".into(),
            package_banner: "lib/cjs/header.js".into(),
            generated_entry: "lib/entry/generated.js".into(),
            symbols: "lib/entry/symbols.json".into(),
            patched_entry: "lib/entry/index.js".into(),
            docs: "docs/reference".into(),
        }
    }
}

impl Default for Tools {
    fn default() -> Self {
        Self {
            bundler: ToolCommand::new(
                "npx",
                [
                    "esbuild",
                    "{input}",
                    "--bundle",
                    "--format=iife",
                    "--global-name=library",
                    "--banner:js={banner}",
                    "--outfile={output}",
                ],
            ),
            transpiler: ToolCommand::new(
                "npx",
                ["babel", "{input}", "--out-dir", "{output}", "--source-maps"],
            ),
            minifier: ToolCommand::new(
                "npx",
                [
                    "terser",
                    "{input}",
                    "--compress",
                    "--mangle",
                    "--preamble",
                    "{banner}",
                    "--source-map",
                    "filename='{map}',url='{map_name}'",
                    "--output",
                    "{output}",
                ],
            ),
            entries: ToolCommand::new(
                "node",
                ["tools/entries.js", "{input}", "{output}", "{symbols}"],
            ),
            docs: ToolCommand::new("node", ["tools/docs.js", "{input}", "{output}", "{symbols}"]),
            validator: None,
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            paths: vec!["package.json".into(), "src/**/*".into()],
            exclude: Vec::new(),
            debounce_ms: 100,
        }
    }
}

impl PipelineConfig {
    /// Reads a config file. The `root` it names is taken relative to the
    /// directory holding the file.
    pub fn load(path: &Utf8Path) -> Result<Self, KumitateError> {
        let text = fs::read_to_string(path).map_err(|source| KumitateError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config: Self =
            serde_json::from_str(&text).map_err(|source| KumitateError::ConfigFormat {
                path: path.to_path_buf(),
                source,
            })?;

        if let Some(dir) = path.parent() {
            config.root = dir.join(&config.root);
        }

        Ok(config)
    }

    /// Loads `kumitate.json` from `root` if it exists, defaults otherwise.
    pub fn discover(root: &Utf8Path) -> Result<Self, KumitateError> {
        let path = root.join(CONFIG_FILE);
        if path.is_file() {
            tracing::info!("using config {}", path);
            Self::load(&path)
        } else {
            Ok(Self {
                root: root.to_path_buf(),
                ..Self::default()
            })
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.watch.debounce_ms)
    }

    /// Resolves a path against the project root.
    pub fn path(&self, path: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        self.root.join(path)
    }

    /// Exclusion globs for watch mode, always including the version marker.
    pub fn watch_exclusions(&self) -> Vec<String> {
        let marker = self.version_marker.to_string();
        let mut exclude = self.watch.exclude.clone();
        if !exclude.contains(&marker) {
            exclude.push(marker);
        }
        exclude
    }
}
