//! Entry file helpers: the symbol manifest written by the entry generator,
//! and the re-exports kept for renamed symbols.

use std::fs;

use anyhow::Context;
use camino::Utf8Path;

use crate::config::DeprecatedAlias;

const DEPRECATED_HEADER: &str = "// deprecated aliases";

/// Reads the JSON array of exported names written next to the entry file.
pub fn read_symbols(path: &Utf8Path) -> anyhow::Result<Vec<String>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Couldn't read symbol manifest '{path}'"))?;

    serde_json::from_str(&text)
        .with_context(|| format!("Symbol manifest '{path}' is not a JSON array of names"))
}

fn alias_line(alias: &DeprecatedAlias) -> String {
    format!("export {{ {} as {} }};", alias.new, alias.old)
}

/// Appends a re-export for every alias which the entry does not carry yet.
/// Patching an already patched entry returns it unchanged.
pub fn patch_entry(source: &str, aliases: &[DeprecatedAlias]) -> String {
    let missing: Vec<String> = aliases
        .iter()
        .map(alias_line)
        .filter(|line| !source.lines().any(|l| l.trim() == line))
        .collect();

    if missing.is_empty() {
        return source.to_string();
    }

    let mut patched = source.trim_end().to_string();
    patched.push('\n');

    if !source.contains(DEPRECATED_HEADER) {
        patched.push('\n');
        patched.push_str(DEPRECATED_HEADER);
        patched.push('\n');
    }

    for line in missing {
        patched.push_str(&line);
        patched.push('\n');
    }

    patched
}

/// Aliases pointing at names the entry no longer exports.
pub fn dangling_aliases(aliases: &[DeprecatedAlias], symbols: &[String]) -> Vec<String> {
    aliases
        .iter()
        .filter(|alias| !symbols.contains(&alias.new))
        .map(|alias| format!("deprecated alias '{}' points at unknown symbol '{}'", alias.old, alias.new))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aliases() -> Vec<DeprecatedAlias> {
        vec![
            DeprecatedAlias {
                old: "typeof".into(),
                new: "typeOf".into(),
            },
            DeprecatedAlias {
                old: "var".into(),
                new: "variance".into(),
            },
        ]
    }

    const ENTRY: &str = "export { typeOf } from './typeOf.js';\nexport { variance } from './variance.js';\n";

    #[test]
    fn test_patch_appends_aliases() {
        let patched = patch_entry(ENTRY, &aliases());

        assert!(patched.starts_with(ENTRY));
        assert!(patched.contains("// deprecated aliases\n"));
        assert!(patched.contains("export { typeOf as typeof };\n"));
        assert!(patched.contains("export { variance as var };\n"));
    }

    #[test]
    fn test_patch_is_idempotent() {
        let once = patch_entry(ENTRY, &aliases());
        assert_eq!(patch_entry(&once, &aliases()), once);
    }

    #[test]
    fn test_patch_adds_only_new_aliases() {
        let once = patch_entry(ENTRY, &aliases()[..1]);
        let twice = patch_entry(&once, &aliases());

        assert_eq!(twice.matches(DEPRECATED_HEADER).count(), 1);
        assert_eq!(twice.matches("typeOf as typeof").count(), 1);
        assert!(twice.ends_with("export { variance as var };\n"));
    }

    #[test]
    fn test_no_aliases_keeps_entry() {
        assert_eq!(patch_entry(ENTRY, &[]), ENTRY);
    }

    #[test]
    fn test_dangling_aliases() {
        let symbols = vec!["typeOf".to_string()];
        let dangling = dangling_aliases(&aliases(), &symbols);
        assert_eq!(dangling.len(), 1);
        assert!(dangling[0].contains("'variance'"));
    }

    #[test]
    fn test_read_symbols() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8Path::from_path(dir.path()).unwrap().join("symbols.json");

        fs::write(&path, r#"["add", "multiply"]"#).unwrap();
        assert_eq!(read_symbols(&path).unwrap(), vec!["add", "multiply"]);

        fs::write(&path, r#"{"add": true}"#).unwrap();
        assert!(read_symbols(&path).is_err());
    }
}
