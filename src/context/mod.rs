//! Assembles the per-turn system context: a cacheable "static" block
//! (identity + tools + bootstrap files) and an always-rebuilt "dynamic"
//! suffix (skills + memory).
//!
//! The static block is cached keyed on each tracked file's
//! `(exists, mtime_nanos)` plus a signature of the advertised tool set.
//! Lookup is double-checked: a stale read under a shared lock triggers a
//! rebuild under the exclusive lock, which re-verifies freshness before
//! doing the actual work, so concurrent callers never duplicate the I/O.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::error::{NekobotError, Result};
use crate::ports::MemoryReader;
use crate::wire::ToolDef;

const NOW_PLACEHOLDER: &str = "{{__CONTEXT_BUILDER_NOW__}}";

const BOOTSTRAP_FILES: &[&str] = &["AGENTS.md", "SOUL.md", "USER.md", "IDENTITY.md"];

#[derive(Debug, Clone, PartialEq, Eq)]
struct FileFingerprint {
    path: PathBuf,
    exists: bool,
    /// `(mtime_nanos)` when the filesystem supports it; otherwise a
    /// content hash, as a fallback for coarse-mtime filesystems.
    stamp: Option<i128>,
    content_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CacheKey {
    files: Vec<FileFingerprint>,
    tool_signature: String,
}

struct CachedStatic {
    key: CacheKey,
    template: String,
}

pub struct ContextBuilder {
    identity: String,
    bootstrap_dir: PathBuf,
    memory: Option<Arc<dyn MemoryReader>>,
    cache: RwLock<Option<CachedStatic>>,
}

/// `~/.nekobot`, the conventional bootstrap-file directory.
pub fn default_bootstrap_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".nekobot")
}

impl ContextBuilder {
    pub fn new(identity: impl Into<String>, bootstrap_dir: impl Into<PathBuf>) -> Self {
        Self {
            identity: identity.into(),
            bootstrap_dir: bootstrap_dir.into(),
            memory: None,
            cache: RwLock::new(None),
        }
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryReader>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Build the full system context for one turn.
    pub async fn build(&self, tools: &[ToolDef], skills_section: &str) -> Result<String> {
        let key = self.compute_key(tools)?;

        if let Some(template) = self.fresh_template(&key).await {
            return Ok(self.finish(template, skills_section).await);
        }

        let mut guard = self.cache.write().await;
        let needs_rebuild = match &*guard {
            Some(cached) => cached.key != key,
            None => true,
        };
        if needs_rebuild {
            let template = self.render_static(tools)?;
            *guard = Some(CachedStatic { key, template: template.clone() });
            return Ok(self.finish(template, skills_section).await);
        }
        let template = guard.as_ref().expect("checked Some above").template.clone();
        drop(guard);
        Ok(self.finish(template, skills_section).await)
    }

    async fn fresh_template(&self, key: &CacheKey) -> Option<String> {
        let guard = self.cache.read().await;
        guard.as_ref().filter(|c| &c.key == key).map(|c| c.template.clone())
    }

    async fn finish(&self, template: String, skills_section: &str) -> String {
        let now = chrono::Utc::now().to_rfc3339();
        let static_block = template.replace(NOW_PLACEHOLDER, &now);

        let mut sections = vec![static_block];
        if !skills_section.trim().is_empty() {
            sections.push(format!("## Skills\n\n{skills_section}"));
        }
        if let Some(memory) = &self.memory {
            let mut memory_parts = Vec::new();
            if let Some(long_term) = memory.read_long_term().await {
                if !long_term.trim().is_empty() {
                    memory_parts.push(format!("### Long-term Memory\n\n{long_term}"));
                }
            }
            for (date, content) in memory.read_recent_daily(3).await {
                if !content.trim().is_empty() {
                    memory_parts.push(format!("### Diary — {date}\n\n{content}"));
                }
            }
            if !memory_parts.is_empty() {
                sections.push(format!("## Memory\n\n{}", memory_parts.join("\n\n")));
            }
        }

        sections.join("\n\n---\n\n")
    }

    fn compute_key(&self, tools: &[ToolDef]) -> Result<CacheKey> {
        let mut files = Vec::with_capacity(BOOTSTRAP_FILES.len());
        for name in BOOTSTRAP_FILES {
            files.push(fingerprint(&self.bootstrap_dir.join(name))?);
        }

        let mut sorted_tools: Vec<&ToolDef> = tools.iter().collect();
        sorted_tools.sort_by(|a, b| a.name.cmp(&b.name));
        let mut hasher = Sha256::new();
        for tool in &sorted_tools {
            hasher.update(tool.name.as_bytes());
            hasher.update(tool.description.as_bytes());
            hasher.update(tool.parameters.to_string().as_bytes());
        }
        let tool_signature = hex::encode(hasher.finalize());

        Ok(CacheKey { files, tool_signature })
    }

    fn render_static(&self, tools: &[ToolDef]) -> Result<String> {
        let mut sorted_tools: Vec<&ToolDef> = tools.iter().collect();
        sorted_tools.sort_by(|a, b| a.name.cmp(&b.name));

        let mut sections = vec![format!(
            "## Identity\n\n{}\n\nWorkspace: {}\nRuntime: {} {} (tokio)\nCurrent time: {NOW_PLACEHOLDER}",
            self.identity,
            self.bootstrap_dir.display(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )];

        if !sorted_tools.is_empty() {
            let tool_lines: Vec<String> = sorted_tools
                .iter()
                .map(|t| format!("- `{}`: {}", t.name, t.description))
                .collect();
            sections.push(format!("## Tools\n\n{}", tool_lines.join("\n")));
        }

        for name in BOOTSTRAP_FILES {
            let path = self.bootstrap_dir.join(name);
            if let Ok(content) = std::fs::read_to_string(&path) {
                if !content.trim().is_empty() {
                    sections.push(format!("## {name}\n\n{content}"));
                }
            }
        }

        Ok(sections.join("\n\n---\n\n"))
    }
}

fn fingerprint(path: &Path) -> Result<FileFingerprint> {
    match std::fs::metadata(path) {
        Ok(meta) => {
            let stamp = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_nanos() as i128);
            let content_hash = if stamp.is_none() {
                std::fs::read(path).ok().map(|bytes| {
                    let mut hasher = Sha256::new();
                    hasher.update(&bytes);
                    hex::encode(hasher.finalize())
                })
            } else {
                None
            };
            Ok(FileFingerprint {
                path: path.to_path_buf(),
                exists: true,
                stamp,
                content_hash,
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileFingerprint {
            path: path.to_path_buf(),
            exists: false,
            stamp: None,
            content_hash: None,
        }),
        Err(e) => Err(NekobotError::Internal(format!("stat {path:?} failed: {e}"))),
    }
}
