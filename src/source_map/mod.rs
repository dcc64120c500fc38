//! Source-map loading and location translation.
//!
//! Maps are discovered next to the compiled file (`foo.js.map`) or through
//! the `//# sourceMappingURL=` directive (relative path or inline base64
//! data URL). Lookups translate in both directions: paused frames back to
//! authored sources, and user breakpoint requests forward to compiled
//! locations. Missing or unparseable maps yield `None`, never an error.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sourcemap::SourceMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, trace};

const SOURCE_MAPPING_URL: &str = "//# sourceMappingURL=";

/// Position in an authored source file. Lines are 1-based, columns 0-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

/// Position in a compiled artifact. Same conventions as [`SourceLocation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

type MapCell = Arc<OnceCell<Option<Arc<SourceMap>>>>;

/// Per-session cache of parsed source maps.
///
/// Concurrent first loads of the same file coalesce into a single parse: the
/// cache hands out one `OnceCell` per path and every caller awaits the same
/// initialization.
pub struct SourceMapManager {
    cache: RwLock<HashMap<PathBuf, MapCell>>,
}

impl Default for SourceMapManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceMapManager {
    pub fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Load (or fetch from cache) the source map for a compiled file.
    pub async fn load_source_map(&self, js_file: &str) -> Option<Arc<SourceMap>> {
        let key = PathBuf::from(js_file);

        let cell = {
            let mut cache = self.cache.write().await;
            cache.entry(key.clone()).or_default().clone()
        };

        cell.get_or_init(|| async move {
            let map = Self::parse_map_for(&key);
            if map.is_none() {
                debug!("No usable source map for {}", key.display());
            }
            map
        })
        .await
        .clone()
    }

    fn parse_map_for(js_file: &Path) -> Option<Arc<SourceMap>> {
        // Co-located `<file>.map` wins over the inline directive.
        let mut co_located = js_file.as_os_str().to_owned();
        co_located.push(".map");
        let co_located = PathBuf::from(co_located);
        if let Ok(bytes) = std::fs::read(&co_located) {
            trace!("Parsing co-located map {}", co_located.display());
            return Self::parse_bytes(&bytes);
        }

        let content = std::fs::read_to_string(js_file).ok()?;
        let directive = content
            .lines()
            .rev()
            .find_map(|line| line.trim().strip_prefix(SOURCE_MAPPING_URL))?
            .trim();

        if let Some(encoded) = directive
            .strip_prefix("data:application/json;base64,")
            .or_else(|| directive.strip_prefix("data:application/json;charset=utf-8;base64,"))
        {
            let bytes = BASE64.decode(encoded).ok()?;
            return Self::parse_bytes(&bytes);
        }

        let map_path = if Path::new(directive).is_absolute() {
            PathBuf::from(directive)
        } else {
            js_file.parent()?.join(directive)
        };
        let bytes = std::fs::read(map_path).ok()?;
        Self::parse_bytes(&bytes)
    }

    fn parse_bytes(bytes: &[u8]) -> Option<Arc<SourceMap>> {
        match SourceMap::from_slice(bytes) {
            Ok(map) => Some(Arc::new(map)),
            Err(e) => {
                debug!("Source map parse failed: {}", e);
                None
            }
        }
    }

    /// Translate a compiled location back to its authored source.
    pub async fn map_compiled_to_source(
        &self,
        location: &CompiledLocation,
    ) -> Option<SourceLocation> {
        let map = self.load_source_map(&location.file).await?;
        let token = map.lookup_token(location.line.saturating_sub(1), location.column)?;
        let source = token.get_source()?;

        Some(SourceLocation {
            file: Self::resolve_source_path(&location.file, source),
            line: token.get_src_line() + 1,
            column: token.get_src_col(),
        })
    }

    /// Translate an authored location forward to the compiled artifact.
    ///
    /// The compiled file is resolved with the tsc layout heuristic: same
    /// directory, extension swapped to `.js`.
    pub async fn map_source_to_compiled(
        &self,
        location: &SourceLocation,
    ) -> Option<CompiledLocation> {
        let compiled = Self::compiled_candidate(&location.file)?;
        let compiled_str = compiled.to_str()?.to_string();
        let map = self.load_source_map(&compiled_str).await?;

        let target_line = location.line.saturating_sub(1);
        let source_name = Path::new(&location.file).file_name()?.to_str()?;

        // Segment-level maps rarely have a token at the exact position, so
        // take the matching-source token with the nearest source line.
        let mut best: Option<(u32, u32, u32)> = None; // (distance, dst_line, dst_col)
        for token in map.tokens() {
            let Some(source) = token.get_source() else {
                continue;
            };
            if !source.ends_with(source_name) {
                continue;
            }
            let distance = token.get_src_line().abs_diff(target_line);
            let candidate = (distance, token.get_dst_line(), token.get_dst_col());
            match &best {
                Some(current) if *current <= candidate => {}
                _ => best = Some(candidate),
            }
        }

        let (_, dst_line, dst_col) = best?;
        Some(CompiledLocation {
            file: compiled_str,
            line: dst_line + 1,
            column: dst_col,
        })
    }

    /// Original symbol name recorded at a compiled position, if any.
    pub async fn map_variable_name(
        &self,
        js_file: &str,
        _compiled_name: &str,
        line: u32,
        column: u32,
    ) -> Option<String> {
        let map = self.load_source_map(js_file).await?;
        let token = map.lookup_token(line.saturating_sub(1), column)?;
        token.get_name().map(|n| n.to_string())
    }

    /// All original names the map records on a compiled line.
    pub async fn get_variable_names_at_location(
        &self,
        js_file: &str,
        line: u32,
        _column: u32,
    ) -> Vec<String> {
        let Some(map) = self.load_source_map(js_file).await else {
            return Vec::new();
        };

        let dst_line = line.saturating_sub(1);
        let mut names: Vec<String> = Vec::new();
        for token in map.tokens() {
            if token.get_dst_line() != dst_line {
                continue;
            }
            if let Some(name) = token.get_name() {
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
        }
        names
    }

    pub async fn has_source_map(&self, js_file: &str) -> bool {
        self.load_source_map(js_file).await.is_some()
    }

    /// Cached consumer handle, without triggering a load.
    pub async fn get_cached_source_map(&self, js_file: &str) -> Option<Arc<SourceMap>> {
        let cache = self.cache.read().await;
        cache
            .get(Path::new(js_file))
            .and_then(|cell| cell.get())
            .and_then(|slot| slot.clone())
    }

    pub async fn get_cache_size(&self) -> usize {
        self.cache.read().await.len()
    }

    pub async fn clear_cache(&self) {
        self.cache.write().await.clear();
    }

    fn compiled_candidate(source_file: &str) -> Option<PathBuf> {
        let path = Path::new(source_file);
        let ext = path.extension()?.to_str()?;
        match ext {
            "ts" | "tsx" | "jsx" | "mts" => Some(path.with_extension("js")),
            "js" | "mjs" | "cjs" => Some(path.to_path_buf()),
            _ => None,
        }
    }

    fn resolve_source_path(js_file: &str, source: &str) -> String {
        // Bundler pseudo-URLs and absolute paths pass through untouched.
        if source.contains("://") || Path::new(source).is_absolute() {
            return source.to_string();
        }
        match Path::new(js_file).parent() {
            Some(dir) => normalize(&dir.join(source)).to_string_lossy().into_owned(),
            None => source.to_string(),
        }
    }
}

/// Lexical `..`/`.` normalization; the referenced sources are not required
/// to exist on disk.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            std::path::Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}
