//! The atlas: an in-memory table of API modules, classes and methods that
//! approximate names are resolved against.

pub mod detail;
pub mod similarity;

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{DocsError, DocsResult};
use crate::input::{BatchResult, NameQuery};

pub const DEFAULT_THRESHOLD: f64 = 0.5;
pub const DEFAULT_MAX_RESULTS: usize = 5;

/// Which table of the atlas an operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Module,
    Class,
    Method,
}

impl EntityKind {
    pub fn table_name(&self) -> &'static str {
        match self {
            EntityKind::Module => "modules",
            EntityKind::Class => "classes",
            EntityKind::Method => "methods",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Module => "module",
            EntityKind::Class => "class",
            EntityKind::Method => "method",
        };
        f.write_str(name)
    }
}

impl FromStr for EntityKind {
    type Err = DocsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "module" | "modules" => Ok(EntityKind::Module),
            "class" | "classes" => Ok(EntityKind::Class),
            "method" | "methods" | "function" | "functions" => Ok(EntityKind::Method),
            other => Err(DocsError::InvalidInput(format!(
                "unknown entity kind '{other}', expected module, class or method"
            ))),
        }
    }
}

/// A method or function parameter as recorded in the atlas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(default, alias = "type_annotation", alias = "type")]
    pub type_hint: Option<String>,
    #[serde(default, alias = "default_value")]
    pub default: Option<String>,
}

/// One module, class or method record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub module_name: Option<String>,
    #[serde(default)]
    pub docstring: Option<String>,
    #[serde(default)]
    pub parent_classes: Vec<String>,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub return_type: Option<String>,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub is_classmethod: bool,
    #[serde(default)]
    pub is_property: bool,
}

impl Entity {
    /// Substring of the full name after its last `.`
    pub fn short_name(&self) -> &str {
        match self.full_name.rsplit_once('.') {
            Some((_, short)) => short,
            None => &self.full_name,
        }
    }

    /// Full name with the last segment removed: the owning class of a
    /// method, or the parent module of a module-level function.
    pub fn owner_name(&self) -> Option<&str> {
        self.full_name.rsplit_once('.').map(|(owner, _)| owner)
    }
}

/// The three backing tables, each keyed by storage key in file order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AtlasData {
    #[serde(default)]
    pub modules: Option<IndexMap<String, Entity>>,
    #[serde(default)]
    pub classes: Option<IndexMap<String, Entity>>,
    #[serde(default)]
    pub methods: Option<IndexMap<String, Entity>>,
}

impl AtlasData {
    /// Read an atlas JSON document. Records with an empty `full_name` take
    /// their storage key as the full name.
    pub fn load(path: &Path) -> DocsResult<Self> {
        let file = File::open(path)?;
        let mut data: AtlasData = serde_json::from_reader(BufReader::new(file))?;
        for table in [&mut data.modules, &mut data.classes, &mut data.methods]
            .into_iter()
            .flatten()
        {
            for (key, entity) in table.iter_mut() {
                if entity.full_name.is_empty() {
                    entity.full_name = key.clone();
                }
                if entity.name.is_empty() {
                    entity.name = entity.short_name().to_string();
                }
            }
        }
        Ok(data)
    }

    pub fn table(&self, kind: EntityKind) -> Option<&IndexMap<String, Entity>> {
        match kind {
            EntityKind::Module => self.modules.as_ref(),
            EntityKind::Class => self.classes.as_ref(),
            EntityKind::Method => self.methods.as_ref(),
        }
    }
}

/// A scored resolution result
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchCandidate<'a> {
    pub key: &'a str,
    pub entity: &'a Entity,
    pub score: f64,
}

/// Score a query against every representation of an entity and keep the best.
pub fn candidate_score(query: &str, key: &str, entity: &Entity) -> f64 {
    [
        similarity::score(query, &entity.full_name),
        similarity::score(query, entity.short_name()),
        similarity::score(query, key),
    ]
    .into_iter()
    .fold(0.0, f64::max)
}

/// Fuzzy name resolution over a single atlas table.
///
/// Candidates keep table order on equal scores, so the first inserted record
/// wins a tie.
pub fn resolve_in<'a>(
    table: &'a IndexMap<String, Entity>,
    query: &str,
    threshold: f64,
    max_results: usize,
) -> Vec<MatchCandidate<'a>> {
    let mut candidates: Vec<MatchCandidate<'a>> = table
        .iter()
        .map(|(key, entity)| MatchCandidate {
            key,
            entity,
            score: candidate_score(query, key, entity),
        })
        .filter(|candidate| candidate.score >= threshold)
        .collect();

    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(max_results);
    candidates
}

enum AtlasSource {
    File(PathBuf),
    Preloaded(AtlasData),
}

/// Atlas service handle. The backing document is read on first use and
/// cached for the life of the handle; a failed load is cached too.
pub struct Atlas {
    source: AtlasSource,
    data: OnceLock<Result<Arc<AtlasData>, String>>,
}

impl Atlas {
    /// Atlas backed by a JSON document, loaded lazily
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        Self {
            source: AtlasSource::File(path.as_ref().to_path_buf()),
            data: OnceLock::new(),
        }
    }

    /// Atlas over an already-built table
    pub fn from_data(data: AtlasData) -> Self {
        Self {
            source: AtlasSource::Preloaded(data),
            data: OnceLock::new(),
        }
    }

    /// Loaded atlas data, loading it on the first call.
    pub fn data(&self) -> DocsResult<&AtlasData> {
        let loaded = self.data.get_or_init(|| match &self.source {
            AtlasSource::Preloaded(data) => Ok(Arc::new(data.clone())),
            AtlasSource::File(path) => match AtlasData::load(path) {
                Ok(data) => {
                    tracing::info!(
                        path = %path.display(),
                        modules = data.modules.as_ref().map_or(0, |t| t.len()),
                        classes = data.classes.as_ref().map_or(0, |t| t.len()),
                        methods = data.methods.as_ref().map_or(0, |t| t.len()),
                        "Loaded atlas"
                    );
                    Ok(Arc::new(data))
                }
                Err(e) => {
                    tracing::error!("Failed to load atlas from {}: {}", path.display(), e);
                    Err(format!("atlas at {}: {}", path.display(), e))
                }
            },
        });

        match loaded {
            Ok(data) => Ok(data.as_ref()),
            Err(reason) => Err(DocsError::DataUnavailable(reason.clone())),
        }
    }

    /// Run the first load on the blocking pool; later calls return the cached result.
    pub async fn preload(self: Arc<Self>) -> DocsResult<()> {
        tokio::task::spawn_blocking(move || self.data().map(|_| ()))
            .await
            .map_err(|e| DocsError::DataUnavailable(e.to_string()))?
    }

    /// Backing table for `kind`, or `DataUnavailable` if the atlas or that table is missing
    pub fn table(&self, kind: EntityKind) -> DocsResult<&IndexMap<String, Entity>> {
        self.data()?.table(kind).ok_or_else(|| {
            DocsError::DataUnavailable(format!("atlas has no {} table", kind.table_name()))
        })
    }

    /// Resolve an approximate name to at most `max_results` candidates
    /// scoring at least `threshold`, best first.
    pub fn resolve(
        &self,
        kind: EntityKind,
        query: &str,
        threshold: f64,
        max_results: usize,
    ) -> DocsResult<Vec<MatchCandidate<'_>>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(DocsError::InvalidInput("query must not be empty".to_string()));
        }
        let table = self.table(kind)?;
        let candidates = resolve_in(table, query, threshold, max_results);
        tracing::debug!(
            kind = %kind,
            query,
            matches = candidates.len(),
            "Resolved entity query"
        );
        Ok(candidates)
    }

    /// Single best candidate for `query`, or `NotFound`
    pub fn best_match(&self, kind: EntityKind, query: &str) -> DocsResult<MatchCandidate<'_>> {
        self.resolve(kind, query, DEFAULT_THRESHOLD, 1)?
            .into_iter()
            .next()
            .ok_or_else(|| DocsError::not_found(kind, query.trim()))
    }

    /// Detail record for the best match of `query`
    pub fn entity_detail(&self, kind: EntityKind, query: &str) -> DocsResult<serde_json::Value> {
        let data = self.data()?;
        let candidate = self.best_match(kind, query)?;
        Ok(match kind {
            EntityKind::Module => detail::module_detail(data, candidate),
            EntityKind::Class => detail::class_detail(data, candidate),
            EntityKind::Method => detail::method_detail(data, candidate),
        })
    }

    /// Detail records for every name in `names`; each name succeeds or fails on its own.
    ///
    /// Missing backing data fails the whole batch since no name could succeed.
    pub fn entity_details(
        &self,
        kind: EntityKind,
        names: &NameQuery,
    ) -> DocsResult<BatchResult<serde_json::Value>> {
        self.table(kind)?;
        let mut batch = BatchResult::default();
        for name in names.names() {
            match self.entity_detail(kind, name) {
                Ok(detail) => batch.succeeded.push((name.to_string(), detail)),
                Err(e) => batch.failed.push((name.to_string(), e)),
            }
        }
        Ok(batch)
    }

    /// Every full name in a table, in table order
    pub fn list_entities(&self, kind: EntityKind) -> DocsResult<serde_json::Value> {
        Ok(detail::listing(kind, self.table(kind)?))
    }
}
