//! Source <-> compiled-JavaScript location translation.
//!
//! The build pipeline emits a metadata document describing the libraries of the program,
//! which compiled module (script URL) each one lives in, the source files (including part
//! files) and a table of breakable positions with their compiled locations. Source lines and
//! columns are 1-based; compiled lines and columns are 0-based, as the backend reports them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{ServiceError, ServiceResult};

/// Multiplier separating the line and column parts of a token position.
pub const TOKEN_POS_LINE_STRIDE: i64 = 10_000;

pub fn token_pos(line: u32, column: u32) -> i64 {
    i64::from(line) * TOKEN_POS_LINE_STRIDE + i64::from(column)
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryInfo {
    pub uri: String,
    pub name: String,
    /// URL of the compiled script that holds this library.
    pub module_url: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceInfo {
    pub uri: String,
    /// Owning library. Equal to `uri` for a library's defining file.
    pub library: String,
    #[serde(default)]
    pub file_uri: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

impl SourceInfo {
    pub fn is_part(&self) -> bool {
        self.uri != self.library
    }
}

/// A breakable position in compiled output.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JsLocation {
    pub url: String,
    pub line: u32,
    pub column: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourcePosition {
    pub uri: String,
    pub line: u32,
    pub column: u32,
}

/// Translates between source positions and compiled locations.
pub trait LocationTranslator: Send + Sync {
    /// Libraries in load order; the first one is the root library.
    fn libraries(&self) -> Vec<LibraryInfo>;

    /// Every source file, part files included.
    fn sources(&self) -> Vec<SourceInfo>;

    /// Map an incoming URI (the source URI itself or its `file://` form) to the source URI.
    fn canonical_uri(&self, uri: &str) -> Option<String>;

    /// First compiled location for `line`, or `None` when nothing on the line is executable.
    fn to_backend(&self, uri: &str, line: u32) -> Option<JsLocation>;

    /// Source position for a compiled location. `None` means runtime-only code.
    fn to_source(&self, url: &str, line: u32, column: u32) -> Option<SourcePosition>;

    /// Breakable `(line, column)` positions of a source, sorted.
    fn positions(&self, uri: &str) -> Vec<(u32, u32)>;
}

/// Provides source text for scripts.
#[async_trait]
pub trait AssetReader: Send + Sync {
    async fn source(&self, uri: &str) -> ServiceResult<String>;
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MappingEntry {
    uri: String,
    line: u32,
    #[serde(default = "default_column")]
    column: u32,
    js_line: u32,
    #[serde(default)]
    js_column: u32,
}

fn default_column() -> u32 {
    1
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct MetadataDocument {
    #[serde(default)]
    libraries: Vec<LibraryInfo>,
    #[serde(default)]
    sources: Vec<SourceInfo>,
    #[serde(default)]
    mappings: Vec<MappingEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Mapping {
    source: (u32, u32),
    js: JsLocation,
}

/// Metadata-backed [`LocationTranslator`] and [`AssetReader`].
#[derive(Clone, Debug, Default)]
pub struct ModuleMetadata {
    libraries: Vec<LibraryInfo>,
    sources: Vec<SourceInfo>,
    /// Per source URI, sorted by source position.
    by_source: BTreeMap<String, Vec<Mapping>>,
    /// Per compiled URL, sorted by compiled location.
    by_url: BTreeMap<String, Vec<(JsLocation, SourcePosition)>>,
    base_dir: Option<PathBuf>,
}

impl ModuleMetadata {
    pub fn from_json(text: &str) -> ServiceResult<Self> {
        let doc: MetadataDocument = serde_json::from_str(text)
            .map_err(|err| ServiceError::invalid_argument(format!("invalid metadata: {err}")))?;
        Self::from_document(doc)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> ServiceResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| ServiceError::Asset {
            uri: path.display().to_string(),
            message: err.to_string(),
        })?;
        let mut metadata = Self::from_json(&text)?;
        metadata.base_dir = path.parent().map(Path::to_path_buf);
        Ok(metadata)
    }

    fn from_document(doc: MetadataDocument) -> ServiceResult<Self> {
        let MetadataDocument {
            libraries,
            mut sources,
            mappings,
        } = doc;

        // Libraries without an explicit source entry still get a script.
        for library in &libraries {
            if !sources.iter().any(|s| s.uri == library.uri) {
                sources.push(SourceInfo {
                    uri: library.uri.clone(),
                    library: library.uri.clone(),
                    file_uri: None,
                    text: None,
                });
            }
        }

        let mut by_source: BTreeMap<String, Vec<Mapping>> = BTreeMap::new();
        let mut by_url: BTreeMap<String, Vec<(JsLocation, SourcePosition)>> = BTreeMap::new();
        for entry in mappings {
            let Some(source) = sources.iter().find(|s| s.uri == entry.uri) else {
                return Err(ServiceError::invalid_argument(format!(
                    "invalid metadata: mapping for unknown source {}",
                    entry.uri
                )));
            };
            let Some(library) = libraries.iter().find(|l| l.uri == source.library) else {
                return Err(ServiceError::invalid_argument(format!(
                    "invalid metadata: {} belongs to unknown library {}",
                    source.uri, source.library
                )));
            };

            let js = JsLocation {
                url: library.module_url.clone(),
                line: entry.js_line,
                column: entry.js_column,
            };
            by_url.entry(js.url.clone()).or_default().push((
                js.clone(),
                SourcePosition {
                    uri: entry.uri.clone(),
                    line: entry.line,
                    column: entry.column,
                },
            ));
            by_source.entry(entry.uri).or_default().push(Mapping {
                source: (entry.line, entry.column),
                js,
            });
        }

        for mappings in by_source.values_mut() {
            mappings.sort_by(|a, b| (a.source, &a.js).cmp(&(b.source, &b.js)));
        }
        for mappings in by_url.values_mut() {
            mappings.sort_by(|a, b| a.0.cmp(&b.0));
        }

        Ok(Self {
            libraries,
            sources,
            by_source,
            by_url,
            base_dir: None,
        })
    }

    fn source_info(&self, uri: &str) -> Option<&SourceInfo> {
        self.sources.iter().find(|s| s.uri == uri)
    }
}

impl LocationTranslator for ModuleMetadata {
    fn libraries(&self) -> Vec<LibraryInfo> {
        self.libraries.clone()
    }

    fn sources(&self) -> Vec<SourceInfo> {
        self.sources.clone()
    }

    fn canonical_uri(&self, uri: &str) -> Option<String> {
        self.sources
            .iter()
            .find(|s| s.uri == uri || s.file_uri.as_deref() == Some(uri))
            .map(|s| s.uri.clone())
    }

    fn to_backend(&self, uri: &str, line: u32) -> Option<JsLocation> {
        self.by_source
            .get(uri)?
            .iter()
            .filter(|m| m.source.0 == line)
            .map(|m| &m.js)
            .min()
            .cloned()
    }

    fn to_source(&self, url: &str, line: u32, column: u32) -> Option<SourcePosition> {
        let mappings = self.by_url.get(url)?;
        // Closest mapped location at or before `column` on the same compiled line.
        mappings
            .iter()
            .filter(|(js, _)| js.line == line && js.column <= column)
            .last()
            .or_else(|| mappings.iter().find(|(js, _)| js.line == line))
            .map(|(_, source)| source.clone())
    }

    fn positions(&self, uri: &str) -> Vec<(u32, u32)> {
        let mut positions: Vec<(u32, u32)> = self
            .by_source
            .get(uri)
            .map(|mappings| mappings.iter().map(|m| m.source).collect())
            .unwrap_or_default();
        positions.dedup();
        positions
    }
}

#[async_trait]
impl AssetReader for ModuleMetadata {
    async fn source(&self, uri: &str) -> ServiceResult<String> {
        let Some(info) = self.source_info(uri) else {
            return Err(ServiceError::Asset {
                uri: uri.to_string(),
                message: "unknown source".to_string(),
            });
        };
        if let Some(text) = &info.text {
            return Ok(text.clone());
        }

        let Some(file_uri) = info.file_uri.as_deref() else {
            return Err(ServiceError::Asset {
                uri: uri.to_string(),
                message: "no source text or file available".to_string(),
            });
        };
        let raw = file_uri.strip_prefix("file://").unwrap_or(file_uri);
        let mut path = PathBuf::from(raw);
        if path.is_relative() {
            if let Some(base) = &self.base_dir {
                path = base.join(path);
            }
        }
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|err| ServiceError::Asset {
                uri: uri.to_string(),
                message: format!("{}: {err}", path.display()),
            })
    }
}
