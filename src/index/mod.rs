//! Workspace symbol extraction.
//!
//! Walks the workspace, parses every recognized file with tree-sitter, and
//! emits definition/reference tuples for the dependency graph. Results are
//! cached per file by modification time; parsing runs on a small worker
//! pool.

pub mod graph;
pub mod parser;
pub mod rank;
pub mod render;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::SystemTime;

use anyhow::{anyhow, Result};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

/// Directory names never descended into.
const IGNORE_DIRS: &[&str] = &[
    ".git",
    "target",
    "node_modules",
    "vendor",
    "dist",
    "build",
    "__pycache__",
];

/// Supported programming languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Rust,
    JavaScript,
    TypeScript,
    Python,
    Go,
    Unknown,
}

impl Language {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "rs" => Language::Rust,
            "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
            "ts" | "tsx" => Language::TypeScript,
            "py" | "pyi" => Language::Python,
            "go" => Language::Go,
            _ => Language::Unknown,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(Language::Unknown)
    }
}

/// Whether a symbol occurrence declares or uses the name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Definition,
    Reference,
}

/// One extracted symbol occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolRef {
    pub name: String,
    /// Workspace-relative path.
    pub file_path: String,
    /// 1-based.
    pub line: usize,
    pub kind: RefKind,
}

/// A symbol with its file's PageRank score attached.
#[derive(Debug, Clone)]
pub struct RankedSymbol {
    pub file_path: String,
    pub name: String,
    pub line: usize,
    pub signature: String,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractStats {
    pub files_processed: usize,
    pub files_skipped: usize,
    pub cache_hits: usize,
    pub parse_count: usize,
}

struct CacheEntry {
    mtime: SystemTime,
    symbols: Vec<SymbolRef>,
}

#[derive(Default)]
struct ExtractorState {
    cache: HashMap<String, CacheEntry>,
    stats: ExtractStats,
}

/// Extracts symbols from source files, caching per-file results by
/// modification time. The cache is the only shared mutable state; parsing
/// itself runs outside the lock.
#[derive(Default)]
pub struct Extractor {
    state: Mutex<ExtractorState>,
}

struct Job {
    abs: PathBuf,
    rel: String,
    mtime: SystemTime,
    language: Language,
}

impl Extractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walk the workspace and extract symbols from every recognized file.
    /// Returns the combined symbol list and extraction statistics.
    pub fn extract_all(
        &self,
        root: &Path,
        cancel: &CancellationToken,
    ) -> Result<(Vec<SymbolRef>, ExtractStats)> {
        {
            let mut state = self.state.lock().unwrap();
            state.stats = ExtractStats::default();
        }

        let jobs = self.collect_jobs(root, cancel)?;

        let workers = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
            .min(jobs.len().max(1));

        let total = jobs.len();
        let mut slots: Vec<Option<Vec<SymbolRef>>> = Vec::new();
        slots.resize_with(total, || None);

        thread::scope(|s| {
            let (job_tx, job_rx) = mpsc::sync_channel::<(usize, Job)>(workers * 2);
            let (result_tx, result_rx) = mpsc::sync_channel::<(usize, Vec<SymbolRef>)>(workers * 2);
            let job_rx = Arc::new(Mutex::new(job_rx));

            for _ in 0..workers {
                let job_rx = Arc::clone(&job_rx);
                let result_tx = result_tx.clone();
                s.spawn(move || loop {
                    let next = job_rx.lock().unwrap().recv();
                    let (idx, job) = match next {
                        Ok(job) => job,
                        Err(_) => break,
                    };
                    if cancel.is_cancelled() {
                        continue;
                    }
                    let symbols = self.extract_file(&job);
                    let _ = result_tx.send((idx, symbols));
                });
            }
            drop(result_tx);

            s.spawn(move || {
                for (idx, job) in jobs.into_iter().enumerate() {
                    if cancel.is_cancelled() {
                        break;
                    }
                    if job_tx.send((idx, job)).is_err() {
                        break;
                    }
                }
            });

            for (idx, symbols) in result_rx {
                slots[idx] = Some(symbols);
            }
        });

        if cancel.is_cancelled() {
            return Err(anyhow!("extraction cancelled"));
        }

        let symbols: Vec<SymbolRef> = slots.into_iter().flatten().flatten().collect();
        let stats = self.state.lock().unwrap().stats;
        tracing::debug!(
            processed = stats.files_processed,
            skipped = stats.files_skipped,
            cache_hits = stats.cache_hits,
            "extraction complete"
        );

        Ok((symbols, stats))
    }

    /// Walk the tree in a stable order, collecting parse jobs and counting
    /// unrecognized files as skipped. Unreadable entries are skipped too.
    fn collect_jobs(&self, root: &Path, cancel: &CancellationToken) -> Result<Vec<Job>> {
        let mut jobs = Vec::new();

        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                !(e.file_type().is_dir()
                    && e.file_name()
                        .to_str()
                        .map(|name| IGNORE_DIRS.contains(&name))
                        .unwrap_or(false))
            });

        for entry in walker {
            if cancel.is_cancelled() {
                return Err(anyhow!("extraction cancelled"));
            }
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let language = Language::from_path(entry.path());
            if language == Language::Unknown {
                self.state.lock().unwrap().stats.files_skipped += 1;
                continue;
            }

            let mtime = match entry.metadata().ok().and_then(|m| m.modified().ok()) {
                Some(t) => t,
                None => {
                    self.state.lock().unwrap().stats.files_skipped += 1;
                    continue;
                }
            };

            let rel = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .to_string();

            jobs.push(Job {
                abs: entry.path().to_path_buf(),
                rel,
                mtime,
                language,
            });
        }

        Ok(jobs)
    }

    /// Extract one file, consulting the mtime cache first. A stored entry is
    /// valid only when the recorded mtime equals the current one, so
    /// backdated writes invalidate too.
    fn extract_file(&self, job: &Job) -> Vec<SymbolRef> {
        {
            let mut state = self.state.lock().unwrap();
            if let Some(entry) = state.cache.get(&job.rel) {
                if entry.mtime == job.mtime {
                    let symbols = entry.symbols.clone();
                    state.stats.cache_hits += 1;
                    state.stats.files_processed += 1;
                    return symbols;
                }
            }
        }

        let content = match fs::read_to_string(&job.abs) {
            Ok(c) => c,
            Err(_) => {
                self.state.lock().unwrap().stats.files_skipped += 1;
                return Vec::new();
            }
        };

        let symbols = match parser::parse_symbols(&content, &job.rel, job.language) {
            Ok(symbols) => symbols,
            Err(err) => {
                tracing::warn!(file = %job.rel, error = %err, "skipping unparseable file");
                self.state.lock().unwrap().stats.files_skipped += 1;
                return Vec::new();
            }
        };

        let mut state = self.state.lock().unwrap();
        state.stats.parse_count += 1;
        state.stats.files_processed += 1;
        state.cache.insert(
            job.rel.clone(),
            CacheEntry {
                mtime: job.mtime,
                symbols: symbols.clone(),
            },
        );

        symbols
    }
}

/// The rendered repository map plus its accounting.
#[derive(Debug, Clone, Default)]
pub struct RepoMap {
    pub text: String,
    pub file_count: usize,
    pub total_files: usize,
    pub symbol_count: usize,
    pub total_symbols: usize,
    pub tokens_used: f64,
}

/// Full repository-map pipeline: extract, build the reference graph, rank,
/// and render within the token budget.
pub fn build_map(
    extractor: &Extractor,
    root: &Path,
    personalized_files: &[String],
    token_budget: f64,
    cancel: &CancellationToken,
) -> Result<RepoMap> {
    let (symbols, stats) = extractor.extract_all(root, cancel)?;

    let graph = graph::build_graph(&symbols);
    let ranked = rank::rank(&graph, &symbols, rank::RankConfig {
        personalized_files: personalized_files.to_vec(),
        ..Default::default()
    });

    let total_symbols = symbols
        .iter()
        .filter(|s| s.kind == RefKind::Definition)
        .count();

    Ok(render::render(
        &ranked,
        stats.files_processed + stats.files_skipped,
        total_symbols,
        &render::RenderConfig {
            token_budget,
            work_dir: Some(root.to_path_buf()),
            ..Default::default()
        },
    ))
}
