use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

/// Manifest compiled into the binary, used when no override exists on disk.
pub(crate) const EMBEDDED_MANIFEST: &str = include_str!("../templates/manifest.toml");

/// Location of the host-wide override, relative to `--root`.
pub const HOST_MANIFEST_PATH: &str = "etc/aisec/manifest.toml";

/// Where the manifest in use was loaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestSource {
    Embedded,
    File(PathBuf),
}

impl fmt::Display for ManifestSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestSource::Embedded => write!(f, "<embedded>"),
            ManifestSource::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Complete provisioning manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub packages: PackagesConfig,
    pub runtime: RuntimeConfig,
    pub python: PythonConfig,
    #[serde(default)]
    pub wrappers: Vec<WrapperDefinition>,
    #[serde(default)]
    pub desktop: Vec<DesktopEntryDefinition>,
    pub menu: MenuDefinition,
}

/// Absolute host paths; prefixed with `--root` at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_base_dir")]
    pub base_dir: String,
    #[serde(default = "default_bin_dir")]
    pub bin_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            bin_dir: default_bin_dir(),
        }
    }
}

fn default_base_dir() -> String {
    "/opt/aisec".to_string()
}

fn default_bin_dir() -> String {
    "/usr/local/bin".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagesConfig {
    /// Desktop applications purged from the host.
    #[serde(default)]
    pub remove: Vec<String>,
    /// Build and runtime dependencies installed on the host.
    #[serde(default)]
    pub install: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Distribution package providing the runtime (e.g. `nodejs`).
    pub package: String,
    /// Minimum compatible major version.
    pub major: u32,
    /// Vendor setup stream piped into `bash`.
    pub setup_url: String,
    /// Optional pin for the setup stream, `sha256:<hex>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_sha256: Option<String>,
    /// npm package installed globally once the runtime is present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_tool: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PythonConfig {
    /// Requirement specifiers installed into the venv in one batch.
    #[serde(default)]
    pub libraries: Vec<String>,
    #[serde(default)]
    pub sources: Vec<SourceDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corpus: Option<CorpusDefinition>,
}

/// A package installed from a git checkout under `<base>/src/<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDefinition {
    pub name: String,
    pub url: String,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub editable: bool,
    /// Requirements file relative to the checkout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusDefinition {
    /// Data directory relative to the venv, which NLTK searches by default.
    #[serde(default = "default_corpus_dir")]
    pub dir: String,
    pub ids: Vec<String>,
}

fn default_corpus_dir() -> String {
    "nltk_data".to_string()
}

/// Exposed command `name` forwarding to `<venv>/bin/<target>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrapperDefinition {
    pub name: String,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesktopEntryDefinition {
    /// File name under the applications directory (`garak.desktop`).
    pub file: String,
    pub name: String,
    pub comment: String,
    pub exec: String,
    #[serde(default = "default_icon")]
    pub icon: String,
    #[serde(default)]
    pub terminal: bool,
    /// Extra categories appended after the menu tag.
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,
    /// Marker path relative to the base directory; the entry is only written
    /// while it exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires: Option<String>,
}

fn default_icon() -> String {
    "utilities-terminal".to_string()
}

fn default_categories() -> Vec<String> {
    vec!["Security".to_string()]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuDefinition {
    /// Basename of the `.directory` and `.menu` files.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default = "default_icon")]
    pub icon: String,
    /// Category tag shared by every desktop entry.
    pub tag: String,
}

impl Manifest {
    /// Parse the manifest compiled into the binary.
    pub fn embedded() -> Result<Self> {
        Self::parse(EMBEDDED_MANIFEST).context("Failed to parse embedded manifest")
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let mut manifest: Manifest = toml::from_str(contents)?;
        manifest.expand_paths()?;
        Ok(manifest)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest file {:?}", path))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse manifest file {:?}", path))
    }

    /// Resolve the manifest in effect: an explicit path wins, then the host
    /// override under `root`, then the embedded default.
    pub fn resolve(explicit: Option<&Path>, root: &Path) -> Result<(Self, ManifestSource)> {
        if let Some(path) = explicit {
            return Ok((Self::load(path)?, ManifestSource::File(path.to_path_buf())));
        }

        let host_manifest = root.join(HOST_MANIFEST_PATH);
        if host_manifest.exists() {
            return Ok((
                Self::load(&host_manifest)?,
                ManifestSource::File(host_manifest),
            ));
        }

        Ok((Self::embedded()?, ManifestSource::Embedded))
    }

    fn expand_paths(&mut self) -> Result<()> {
        for value in [&mut self.paths.base_dir, &mut self.paths.bin_dir] {
            let expanded = shellexpand::env(value.as_str())
                .map_err(|err| anyhow::anyhow!("Failed to expand path '{}': {}", value, err))?
                .into_owned();
            *value = expanded;
        }
        Ok(())
    }

    /// Sources that must succeed, in manifest order.
    pub fn required_sources(&self) -> impl Iterator<Item = &SourceDefinition> {
        self.python.sources.iter().filter(|source| source.required)
    }
}

/// Problem found while validating a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestIssue {
    pub section: &'static str,
    pub item: Option<String>,
    pub message: String,
}

impl ManifestIssue {
    fn new(section: &'static str, item: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            section,
            item: item.map(str::to_string),
            message: message.into(),
        }
    }
}

impl fmt::Display for ManifestIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.item {
            Some(item) => write!(f, "[{}] {}: {}", self.section, item, self.message),
            None => write!(f, "[{}] {}", self.section, self.message),
        }
    }
}

/// Check a manifest for mistakes that would make provisioning misbehave.
///
/// Loading never enforces uniqueness, so duplicates are reported here.
pub fn validate_manifest(manifest: &Manifest) -> Vec<ManifestIssue> {
    let mut issues = Vec::new();

    for (key, value) in [
        ("base_dir", &manifest.paths.base_dir),
        ("bin_dir", &manifest.paths.bin_dir),
    ] {
        if !value.starts_with('/') {
            issues.push(ManifestIssue::new(
                "paths",
                Some(key),
                format!("'{value}' must be an absolute path"),
            ));
        }
    }

    check_names(
        &mut issues,
        "packages.remove",
        manifest.packages.remove.iter().map(String::as_str),
    );
    check_names(
        &mut issues,
        "packages.install",
        manifest.packages.install.iter().map(String::as_str),
    );

    for name in &manifest.packages.remove {
        if manifest.packages.install.contains(name) {
            issues.push(ManifestIssue::new(
                "packages",
                Some(name),
                "listed for both removal and installation",
            ));
        }
    }

    let runtime = &manifest.runtime;
    if runtime.package.trim().is_empty() {
        issues.push(ManifestIssue::new("runtime", None, "package must not be empty"));
    }
    if runtime.major == 0 {
        issues.push(ManifestIssue::new("runtime", None, "major must be at least 1"));
    }
    check_url(&mut issues, "runtime", None, &runtime.setup_url);
    if let Some(pin) = &runtime.setup_sha256 {
        if let Err(err) = parse_sha256(pin) {
            issues.push(ManifestIssue::new("runtime", Some("setup_sha256"), err.to_string()));
        }
    }

    check_names(
        &mut issues,
        "python.libraries",
        manifest
            .python
            .libraries
            .iter()
            .map(|spec| requirement_name(spec)),
    );

    check_names(
        &mut issues,
        "python.sources",
        manifest.python.sources.iter().map(|s| s.name.as_str()),
    );
    for source in &manifest.python.sources {
        check_url(&mut issues, "python.sources", Some(&source.name), &source.url);
        if !source.editable && source.requirements.is_none() {
            issues.push(ManifestIssue::new(
                "python.sources",
                Some(&source.name),
                "needs `editable = true` or a `requirements` file",
            ));
        }
    }

    if let Some(corpus) = &manifest.python.corpus {
        check_names(&mut issues, "python.corpus", corpus.ids.iter().map(String::as_str));
    }

    check_names(
        &mut issues,
        "wrappers",
        manifest.wrappers.iter().map(|w| w.name.as_str()),
    );
    for wrapper in &manifest.wrappers {
        if wrapper.target.trim().is_empty() || wrapper.target.contains('/') {
            issues.push(ManifestIssue::new(
                "wrappers",
                Some(&wrapper.name),
                "target must be a bare executable name",
            ));
        }
    }

    check_names(
        &mut issues,
        "desktop",
        manifest.desktop.iter().map(|d| d.file.as_str()),
    );
    for entry in &manifest.desktop {
        if !entry.file.ends_with(".desktop") {
            issues.push(ManifestIssue::new(
                "desktop",
                Some(&entry.file),
                "file name must end with .desktop",
            ));
        }
        if entry.exec.trim().is_empty() {
            issues.push(ManifestIssue::new(
                "desktop",
                Some(&entry.file),
                "exec must not be empty",
            ));
        }
        if entry.name.contains('\n') || entry.exec.contains('\n') || entry.comment.contains('\n') {
            issues.push(ManifestIssue::new(
                "desktop",
                Some(&entry.file),
                "fields must be single-line",
            ));
        }
    }

    let menu = &manifest.menu;
    if menu.id.trim().is_empty() || menu.id.contains('/') {
        issues.push(ManifestIssue::new("menu", None, "id must be a plain file name"));
    }
    if menu.tag.trim().is_empty() {
        issues.push(ManifestIssue::new("menu", None, "tag must not be empty"));
    }

    issues
}

fn check_names<'a>(
    issues: &mut Vec<ManifestIssue>,
    section: &'static str,
    names: impl Iterator<Item = &'a str>,
) {
    let mut seen = HashSet::new();
    for name in names {
        if name.trim().is_empty() {
            issues.push(ManifestIssue::new(section, None, "empty name"));
            continue;
        }
        if !seen.insert(name) {
            issues.push(ManifestIssue::new(section, Some(name), "listed more than once"));
        }
    }
}

fn check_url(
    issues: &mut Vec<ManifestIssue>,
    section: &'static str,
    item: Option<&str>,
    value: &str,
) {
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "https" | "http" | "file") => {}
        Ok(url) => issues.push(ManifestIssue::new(
            section,
            item,
            format!("unsupported URL scheme '{}'", url.scheme()),
        )),
        Err(err) => issues.push(ManifestIssue::new(
            section,
            item,
            format!("invalid URL '{value}': {err}"),
        )),
    }
}

/// Package name of a requirement specifier (`openai>=1.0` -> `openai`).
pub fn requirement_name(spec: &str) -> &str {
    let spec = spec.trim();
    let end = spec
        .find(|c: char| matches!(c, '<' | '>' | '=' | '!' | '~' | ';' | '[' | '@' | ' '))
        .unwrap_or(spec.len());
    &spec[..end]
}

/// Parse a `sha256:<hex>` pin into raw digest bytes.
pub fn parse_sha256(value: &str) -> Result<[u8; 32]> {
    let trimmed = value.trim();
    let digest = trimmed
        .strip_prefix("sha256:")
        .context("Checksum must use `sha256:<hex>` format")?;

    if digest.len() != 64 {
        anyhow::bail!("SHA256 checksum must be exactly 64 hex characters");
    }

    let bytes = hex::decode(digest).context("Failed to decode SHA256 checksum")?;
    let mut array = [0u8; 32];
    array.copy_from_slice(&bytes);
    Ok(array)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serial_test::serial;
    use tempfile::TempDir;

    const MINIMAL: &str = r#"
[runtime]
package = "nodejs"
major = 20
setup_url = "https://deb.nodesource.com/setup_20.x"

[python]
libraries = ["garak"]

[menu]
id = "aisec"
name = "AI Security"
tag = "AISecurity"
"#;

    #[test]
    fn embedded_manifest_is_valid() {
        let manifest = Manifest::embedded().unwrap();
        let issues = validate_manifest(&manifest);
        assert!(issues.is_empty(), "unexpected issues: {issues:?}");
        assert!(manifest.wrappers.iter().any(|w| w.name == "garak"));
        assert!(manifest
            .desktop
            .iter()
            .any(|d| d.file == "modelscan.desktop"));
        assert_eq!(manifest.required_sources().count(), 1);
    }

    #[test]
    fn minimal_manifest_uses_defaults() {
        let manifest = Manifest::parse(MINIMAL).unwrap();
        assert_eq!(manifest.paths.base_dir, "/opt/aisec");
        assert_eq!(manifest.paths.bin_dir, "/usr/local/bin");
        assert!(manifest.packages.remove.is_empty());
        assert!(manifest.wrappers.is_empty());
        assert_eq!(manifest.menu.icon, "utilities-terminal");
    }

    #[test]
    #[serial]
    fn paths_expand_environment_variables() {
        std::env::set_var("AISEC_TEST_BASE", "/srv/tools");
        let contents = format!("[paths]\nbase_dir = \"${{AISEC_TEST_BASE}}/aisec\"\n{MINIMAL}");
        let manifest = Manifest::parse(&contents).unwrap();
        std::env::remove_var("AISEC_TEST_BASE");
        assert_eq!(manifest.paths.base_dir, "/srv/tools/aisec");
    }

    #[test]
    fn resolve_prefers_host_override() {
        let temp = TempDir::new().unwrap();
        let (_, source) = Manifest::resolve(None, temp.path()).unwrap();
        assert_eq!(source, ManifestSource::Embedded);

        let host_manifest = temp.path().join(HOST_MANIFEST_PATH);
        fs::create_dir_all(host_manifest.parent().unwrap()).unwrap();
        fs::write(&host_manifest, MINIMAL).unwrap();

        let (manifest, source) = Manifest::resolve(None, temp.path()).unwrap();
        assert_eq!(source, ManifestSource::File(host_manifest));
        assert_eq!(manifest.python.libraries, vec!["garak"]);
    }

    #[test]
    fn resolve_explicit_path_must_exist() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("nope.toml");
        let err = Manifest::resolve(Some(&missing), temp.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to read manifest file"));
    }

    #[test]
    fn validation_reports_duplicates_and_conflicts() {
        let mut manifest = Manifest::parse(MINIMAL).unwrap();
        manifest.packages.install = vec!["git".into(), "git".into()];
        manifest.packages.remove = vec!["git".into()];
        manifest.python.libraries = vec!["garak".into(), "garak==0.9".into()];

        let issues = validate_manifest(&manifest);
        let rendered: Vec<String> = issues.iter().map(ToString::to_string).collect();
        assert!(rendered.contains(&"[packages.install] git: listed more than once".to_string()));
        assert!(rendered
            .contains(&"[packages] git: listed for both removal and installation".to_string()));
        assert!(rendered.contains(&"[python.libraries] garak: listed more than once".to_string()));
    }

    #[test]
    fn validation_checks_desktop_and_wrappers() {
        let mut manifest = Manifest::parse(MINIMAL).unwrap();
        manifest.wrappers.push(WrapperDefinition {
            name: "garak".into(),
            target: "../garak".into(),
        });
        manifest.desktop.push(DesktopEntryDefinition {
            file: "garak".into(),
            name: "Garak".into(),
            comment: String::new(),
            exec: " ".into(),
            icon: default_icon(),
            terminal: false,
            categories: default_categories(),
            requires: None,
        });

        let issues = validate_manifest(&manifest);
        assert_eq!(issues.len(), 3, "{issues:?}");
        assert!(issues.iter().all(|issue| issue.item.as_deref() == Some("garak")));
    }

    #[test]
    fn validation_rejects_bad_urls_and_pins() {
        let mut manifest = Manifest::parse(MINIMAL).unwrap();
        manifest.runtime.setup_url = "ftp://example.com/setup".into();
        manifest.runtime.setup_sha256 = Some("md5:abc".into());

        let issues = validate_manifest(&manifest);
        assert_eq!(issues.len(), 2, "{issues:?}");
        assert!(issues[0].message.contains("unsupported URL scheme 'ftp'"));
        assert!(issues[1].message.contains("sha256:<hex>"));
    }

    #[rstest]
    #[case("garak", "garak")]
    #[case("openai>=1.0", "openai")]
    #[case("torch==2.2.0", "torch")]
    #[case("llm-guard[onnx]", "llm-guard")]
    #[case("nltk ; python_version > '3.8'", "nltk")]
    #[case("  textattack~=0.3  ", "textattack")]
    fn test_requirement_name(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(requirement_name(input), expected);
    }

    #[test]
    fn test_parse_sha256() {
        let pin = format!("sha256:{}", "ab".repeat(32));
        assert_eq!(parse_sha256(&pin).unwrap(), [0xab; 32]);
        assert!(parse_sha256("sha256:abcd").is_err());
        assert!(parse_sha256(&"ab".repeat(32)).is_err());
    }
}
