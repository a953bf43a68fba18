//! License banner rendering and version lookup.

use std::fs;
use std::sync::OnceLock;

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};

use crate::error::ManifestReadError;

/// Token replaced with the package version.
pub const VERSION_TOKEN: &str = "@@version";
/// Token replaced with the build date.
pub const DATE_TOKEN: &str = "@@date";

/// Substitutes the first occurrence of each token. A template lacking
/// either token is returned with only the other one replaced.
pub fn render(template: &str, version: &str, date: &str) -> String {
    template
        .replacen(VERSION_TOKEN, version, 1)
        .replacen(DATE_TOKEN, date, 1)
}

/// Reads the `version` field of a JSON manifest.
pub fn current_version(manifest: &Utf8Path) -> Result<String, ManifestReadError> {
    let text = fs::read_to_string(manifest).map_err(|source| ManifestReadError::Io {
        path: manifest.to_path_buf(),
        source,
    })?;

    let value: serde_json::Value =
        serde_json::from_str(&text).map_err(|source| ManifestReadError::Malformed {
            path: manifest.to_path_buf(),
            source,
        })?;

    value
        .get("version")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ManifestReadError::MissingVersion(manifest.to_path_buf()))
}

/// Today's local date as `yyyy-mm-dd`.
pub fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

/// A rendered banner together with the version it was rendered for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Banner {
    pub version: String,
    pub date: String,
    pub text: String,
}

/// Renders the banner from a template file and the manifest version. The
/// template is read once and cached, the manifest is read on every call so
/// that watch mode picks up version bumps.
#[derive(Debug)]
pub struct BannerProvider {
    template_path: Utf8PathBuf,
    manifest_path: Utf8PathBuf,
    template: OnceLock<String>,
}

impl BannerProvider {
    pub fn new(template_path: impl Into<Utf8PathBuf>, manifest_path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            template_path: template_path.into(),
            manifest_path: manifest_path.into(),
            template: OnceLock::new(),
        }
    }

    pub fn version(&self) -> Result<String, ManifestReadError> {
        current_version(&self.manifest_path)
    }

    pub fn template(&self) -> anyhow::Result<&str> {
        if let Some(template) = self.template.get() {
            return Ok(template);
        }

        let text = fs::read_to_string(&self.template_path)
            .with_context(|| format!("Couldn't read banner template '{}'", self.template_path))?;

        Ok(self.template.get_or_init(|| text))
    }

    pub fn banner(&self) -> anyhow::Result<Banner> {
        let version = self.version()?;
        let date = today();
        let text = render(self.template()?, &version, &date);

        Ok(Banner {
            version,
            date,
            text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = "/**\n * library v@@version\n * built @@date\n */\n";

    #[test]
    fn test_render_substitutes_both_tokens() {
        let text = render(TEMPLATE, "1.2.3", "2024-01-01");
        assert_eq!(text, "/**\n * library v1.2.3\n * built 2024-01-01\n */\n");
    }

    #[test]
    fn test_render_order_independent() {
        let swapped = "@@date / @@version";
        assert_eq!(render(swapped, "1.2.3", "2024-01-01"), "2024-01-01 / 1.2.3");
    }

    #[test]
    fn test_render_is_noop_on_rendered_text() {
        let once = render(TEMPLATE, "1.2.3", "2024-01-01");
        assert_eq!(render(&once, "9.9.9", "2030-12-31"), once);
    }

    #[test]
    fn test_render_missing_token() {
        assert_eq!(render("v@@version", "1.2.3", "2024-01-01"), "v1.2.3");
        assert_eq!(render("no tokens", "1.2.3", "2024-01-01"), "no tokens");
    }

    #[test]
    fn test_current_version() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let manifest = root.join("package.json");

        fs::write(&manifest, r#"{ "name": "lib", "version": "9.9.9" }"#).unwrap();
        assert_eq!(current_version(&manifest).unwrap(), "9.9.9");

        fs::write(&manifest, r#"{ "name": "lib" }"#).unwrap();
        assert!(matches!(
            current_version(&manifest),
            Err(ManifestReadError::MissingVersion(_))
        ));

        fs::write(&manifest, r#"{ "version": 3 }"#).unwrap();
        assert!(matches!(
            current_version(&manifest),
            Err(ManifestReadError::MissingVersion(_))
        ));

        fs::write(&manifest, "version: 1").unwrap();
        assert!(matches!(
            current_version(&manifest),
            Err(ManifestReadError::Malformed { .. })
        ));

        assert!(matches!(
            current_version(&root.join("missing.json")),
            Err(ManifestReadError::Io { .. })
        ));
    }

    #[test]
    fn test_today_format() {
        let date = today();
        assert_eq!(date.len(), 10);
        assert!(chrono::NaiveDate::parse_from_str(&date, "%Y-%m-%d").is_ok());
    }

    #[test]
    fn test_provider_caches_template() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        fs::write(root.join("header.js"), TEMPLATE).unwrap();
        fs::write(root.join("package.json"), r#"{ "version": "2.0.0" }"#).unwrap();

        let provider = BannerProvider::new(root.join("header.js"), root.join("package.json"));
        let banner = provider.banner().unwrap();
        assert_eq!(banner.version, "2.0.0");
        assert!(banner.text.contains("v2.0.0"));
        assert!(banner.text.contains(&banner.date));

        // the template stays cached, the manifest does not
        fs::write(root.join("header.js"), "changed").unwrap();
        fs::write(root.join("package.json"), r#"{ "version": "2.0.1" }"#).unwrap();
        let banner = provider.banner().unwrap();
        assert!(banner.text.contains("v2.0.1"));
    }
}
