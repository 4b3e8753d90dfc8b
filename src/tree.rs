//! Repository summary tree: the parsed directory/file/class/method hierarchy
//! plus the persisted JSON format produced by summarization.
//!
//! The tree is built once by the external repo parser, summarized once, then
//! read-only for any number of retrievals.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Sentinel for nodes that had no usable context for summarization.
pub const NO_SUMMARY: &str = "*** No summary ***";

/// Sentinel for nodes whose summary generation failed at the backend.
pub const GENERATION_FAILED: &str = "*** Error occurred during generation ***";

/// A node's summary. Serialized as a plain string so persisted trees keep
/// the original sentinel wire format.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Summary {
    /// A generated natural-language summary.
    Text(String),
    /// No usable context; excluded from parent context and from ranking.
    #[default]
    Missing,
    /// The generation backend failed; treated like `Missing` by parents
    /// but logged distinctly.
    Failed,
}

impl Summary {
    /// The summary text if this node contributed information upward.
    pub fn usable(&self) -> Option<&str> {
        match self {
            Summary::Text(s) => Some(s),
            Summary::Missing | Summary::Failed => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Summary::Text(s) => s,
            Summary::Missing => NO_SUMMARY,
            Summary::Failed => GENERATION_FAILED,
        }
    }
}

impl Serialize for Summary {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Summary {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(match s.as_str() {
            NO_SUMMARY => Summary::Missing,
            GENERATION_FAILED => Summary::Failed,
            _ => Summary::Text(s),
        })
    }
}

/// A method: the only node kind carrying source text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodNode {
    pub id: u32,
    pub name: String,
    pub signature: String,
    /// Empty body means "insufficient context" (abstract/interface method),
    /// not an error.
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub summary: Summary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassNode {
    pub id: u32,
    pub name: String,
    pub signature: String,
    #[serde(default)]
    pub methods: Vec<MethodNode>,
    #[serde(default)]
    pub summary: Summary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileNode {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub classes: Vec<ClassNode>,
    #[serde(default)]
    pub summary: Summary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirNode {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub subdirectories: Vec<DirNode>,
    #[serde(default)]
    pub files: Vec<FileNode>,
    #[serde(default)]
    pub summary: Summary,
}

// Child lookups take the id as the retrieval decision returned it: i64, so
// -1 and hallucinated ids stay representable and miss cleanly.

impl DirNode {
    pub fn find_subdirectory(&self, id: i64) -> Option<&DirNode> {
        self.subdirectories.iter().find(|d| i64::from(d.id) == id)
    }

    pub fn find_file(&self, id: i64) -> Option<&FileNode> {
        self.files.iter().find(|f| i64::from(f.id) == id)
    }
}

impl FileNode {
    pub fn find_class(&self, id: i64) -> Option<&ClassNode> {
        self.classes.iter().find(|c| i64::from(c.id) == id)
    }
}

impl ClassNode {
    pub fn find_method(&self, id: i64) -> Option<&MethodNode> {
        self.methods.iter().find(|m| i64::from(m.id) == id)
    }
}

/// A whole repository tree as produced by the parser and consumed by the
/// summarizer and retriever.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoTree {
    #[serde(rename = "mainDirectory")]
    pub main_directory: DirNode,
    #[serde(rename = "nodeCount")]
    pub node_count: usize,
}

impl RepoTree {
    /// Load a tree (parsed or summarized) from JSON, checking the id
    /// uniqueness invariant up front. A duplicate id would silently misroute
    /// retrieval, so it is rejected at load time.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open tree file {}", path.display()))?;
        let tree: RepoTree = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse tree file {}", path.display()))?;

        validate_unique_ids(&tree.main_directory)?;
        Ok(tree)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create tree file {}", path.display()))?;
        serde_json::to_writer(BufWriter::new(file), self)
            .with_context(|| format!("Failed to write tree file {}", path.display()))?;
        Ok(())
    }
}

/// Check that every id in the tree is globally unique. Returns the node count.
pub fn validate_unique_ids(root: &DirNode) -> Result<usize> {
    let mut seen = HashSet::new();
    let mut count = 0;
    check_dir_ids(root, &mut seen, &mut count)?;
    Ok(count)
}

fn record_id(id: u32, seen: &mut HashSet<u32>, count: &mut usize) -> Result<()> {
    if !seen.insert(id) {
        anyhow::bail!("Duplicate node id {} in repository tree", id);
    }
    *count += 1;
    Ok(())
}

fn check_dir_ids(dir: &DirNode, seen: &mut HashSet<u32>, count: &mut usize) -> Result<()> {
    record_id(dir.id, seen, count)?;
    for sub in &dir.subdirectories {
        check_dir_ids(sub, seen, count)?;
    }
    for file in &dir.files {
        record_id(file.id, seen, count)?;
        for class in &file.classes {
            record_id(class.id, seen, count)?;
            for method in &class.methods {
                record_id(method.id, seen, count)?;
            }
        }
    }
    Ok(())
}

/// Fold chains of single-subdirectory, zero-file wrapper directories into one
/// node with `/`-joined names. A wrapper directory is not a summarization
/// unit of its own, so `a/b/c` package roots don't produce three nodes.
pub fn collapse(dir: &mut DirNode) {
    while dir.subdirectories.len() == 1 && dir.files.is_empty() {
        if let Some(mut child) = dir.subdirectories.pop() {
            child.name = format!("{}/{}", dir.name, child.name);
            *dir = child;
        }
    }

    for sub in &mut dir.subdirectories {
        collapse(sub);
    }
}
