//! Figure providers and the data set registry.
//!
//! A provider yields the ground-truth figures of one data set. Providers are
//! restartable: every call to [`FigureProvider::figures`] starts a fresh
//! pass, so the evaluator can walk the data set once for scoring and once
//! more for export.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use crate::error::{Error, Result};
use crate::types::Figure;

pub type FigureIter<'a> = Box<dyn Iterator<Item = Result<Figure>> + Send + 'a>;

/// Source of ground-truth figures for one data set.
pub trait FigureProvider: Send + Sync {
    /// Start a new pass over the data set. Figures that cannot be loaded are
    /// yielded as errors so the caller can skip them.
    fn figures(&self) -> FigureIter<'_>;
}

/// Provider over figures already in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryFigureProvider {
    figures: Vec<Figure>,
}

impl InMemoryFigureProvider {
    pub fn new(figures: Vec<Figure>) -> Self {
        InMemoryFigureProvider { figures }
    }
}

impl FigureProvider for InMemoryFigureProvider {
    fn figures(&self) -> FigureIter<'_> {
        Box::new(self.figures.iter().cloned().map(Ok))
    }
}

/// Provider reading a JSON annotation file.
///
/// The file is either an object mapping image file names to figures (the
/// export format) or a plain array of figures. Figures without an `index`
/// are numbered by their position in the file.
#[derive(Debug, Clone)]
pub struct JsonFigureProvider {
    path: PathBuf,
    /// When set, figures whose image file is missing are reported as errors.
    check_images: bool,
}

/// A figure as stored on disk, where the index may be absent.
#[derive(Deserialize)]
struct FigureEntry {
    #[serde(default)]
    index: Option<u64>,
    #[serde(flatten)]
    figure: Figure,
}

impl FigureEntry {
    fn into_figure(self, position: usize) -> Figure {
        let mut figure = self.figure;
        figure.index = self.index.unwrap_or(position as u64);
        figure
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FigureFile {
    List(Vec<FigureEntry>),
    ByFileName(BTreeMap<String, FigureEntry>),
}

impl JsonFigureProvider {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.is_file() {
            return Err(Error::ResourceNotFound(path));
        }
        Ok(JsonFigureProvider {
            path,
            check_images: false,
        })
    }

    pub fn check_images(mut self, check: bool) -> Self {
        self.check_images = check;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Vec<Figure>> {
        let file = std::fs::File::open(&self.path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::ResourceNotFound(self.path.clone()),
            _ => Error::Io(e),
        })?;
        let reader = std::io::BufReader::new(file);
        let parsed: FigureFile = serde_json::from_reader(reader)?;
        let entries: Vec<FigureEntry> = match parsed {
            FigureFile::List(entries) => entries,
            FigureFile::ByFileName(map) => map.into_values().collect(),
        };
        let figures: Vec<Figure> = entries
            .into_iter()
            .enumerate()
            .map(|(i, entry)| entry.into_figure(i))
            .collect();
        info!(path = %self.path.display(), figures = figures.len(), "loaded figures");
        Ok(figures)
    }
}

impl FigureProvider for JsonFigureProvider {
    fn figures(&self) -> FigureIter<'_> {
        let figures = match self.load() {
            Ok(f) => f,
            Err(e) => return Box::new(std::iter::once(Err(e))),
        };
        let check_images = self.check_images;
        Box::new(figures.into_iter().map(move |figure| {
            if check_images && !Path::new(&figure.image_path).is_file() {
                return Err(Error::ResourceNotFound(PathBuf::from(&figure.image_path)));
            }
            Ok(figure)
        }))
    }
}

/// Named data sets, passed explicitly to whoever needs to resolve them.
#[derive(Clone, Default)]
pub struct DatasetRegistry {
    providers: HashMap<String, Arc<dyn FigureProvider>>,
}

impl DatasetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider, replacing any previous one under the same name.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn FigureProvider>) {
        self.providers.insert(name.into(), provider);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn FigureProvider>> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownDataset(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for DatasetRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatasetRegistry")
            .field("names", &self.names())
            .finish()
    }
}
