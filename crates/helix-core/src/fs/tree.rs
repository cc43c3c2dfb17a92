//! In-memory view of a directory tree.
//!
//! Nodes live in an arena and point at their parent by index. Directory
//! listings are read from disk lazily, the first time a lookup or enumeration
//! passes through them. Child lookup honours the tree's case sensitivity while
//! entries keep their on-disk casing.
//!
//! In what-if mode every mutating operation updates only the in-memory tree, so
//! a dry run sees the effects of its own earlier steps.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};

use super::entry::{modified_time, parent_name, to_full_path, truncate_time};
use super::file::is_temporary_name;

type NodeId = usize;
const ROOT: NodeId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsEntryKind {
    File,
    Directory,
}

/// Snapshot of one tree entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEntry {
    /// Relative '/'-separated name with on-disk casing.
    pub name: String,
    pub full_name: PathBuf,
    pub kind: FsEntryKind,
    pub last_write_time_utc: DateTime<Utc>,
    pub length: u64,
}

impl FsEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == FsEntryKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == FsEntryKind::File
    }
}

/// Metadata assumed for an entry written in what-if mode.
#[derive(Debug, Clone, Copy)]
pub struct SimulatedMetadata {
    pub kind: FsEntryKind,
    pub last_write_time_utc: DateTime<Utc>,
    pub length: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct TreeOptions {
    pub case_sensitive: bool,
    pub what_if: bool,
}

/// Returns true for relative names the tree should not show.
pub type EntryFilter = Box<dyn Fn(&str) -> bool + Send + Sync>;

#[derive(Debug)]
struct FsNode {
    name: String,
    rel: String,
    parent: Option<NodeId>,
    kind: FsEntryKind,
    modified: DateTime<Utc>,
    length: u64,
    children: HashMap<String, NodeId>,
    loaded: bool,
    alive: bool,
}

impl FsNode {
    fn root() -> Self {
        FsNode {
            name: String::new(),
            rel: String::new(),
            parent: None,
            kind: FsEntryKind::Directory,
            modified: DateTime::<Utc>::UNIX_EPOCH,
            length: 0,
            children: HashMap::new(),
            loaded: false,
            alive: true,
        }
    }
}

pub struct FsTree {
    root_path: PathBuf,
    options: TreeOptions,
    filter: Option<EntryFilter>,
    nodes: Vec<FsNode>,
    free: Vec<NodeId>,
}

fn join_rel(parent: &str, segment: &str) -> String {
    if parent.is_empty() {
        segment.to_string()
    } else {
        format!("{parent}/{segment}")
    }
}

fn not_found(rel: &str) -> io::Error {
    io::Error::new(ErrorKind::NotFound, format!("'{rel}' does not exist"))
}

impl FsTree {
    pub fn new(root_path: impl Into<PathBuf>, options: TreeOptions) -> Self {
        FsTree {
            root_path: root_path.into(),
            options,
            filter: None,
            nodes: vec![FsNode::root()],
            free: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: EntryFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    pub fn is_what_if(&self) -> bool {
        self.options.what_if
    }

    pub fn is_case_sensitive(&self) -> bool {
        self.options.case_sensitive
    }

    pub fn full_path(&self, rel: &str) -> PathBuf {
        to_full_path(&self.root_path, rel)
    }

    /// Forget everything loaded so far.
    pub fn reset(&mut self) {
        self.nodes = vec![FsNode::root()];
        self.free.clear();
    }

    /// Key under which `name` is stored in its parent's child map.
    pub fn name_key(&self, name: &str) -> String {
        if self.options.case_sensitive {
            name.to_string()
        } else {
            name.to_uppercase()
        }
    }

    fn is_excluded(&self, rel: &str) -> bool {
        let segment = rel.rsplit('/').next().unwrap_or(rel);
        is_temporary_name(segment) || self.filter.as_ref().is_some_and(|filter| filter(rel))
    }

    fn snapshot(&self, id: NodeId) -> FsEntry {
        let node = &self.nodes[id];
        FsEntry {
            name: node.rel.clone(),
            full_name: self.full_path(&node.rel),
            kind: node.kind,
            last_write_time_utc: node.modified,
            length: node.length,
        }
    }

    fn alloc(&mut self, node: FsNode) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.nodes[id] = node;
                id
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn remove_subtree(&mut self, id: NodeId) {
        if id == ROOT {
            self.reset();
            return;
        }
        if let Some(parent) = self.nodes[id].parent {
            let key = self.name_key(&self.nodes[id].name);
            self.nodes[parent].children.remove(&key);
        }
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let node = &mut self.nodes[current];
            stack.extend(node.children.drain().map(|(_, child)| child));
            node.alive = false;
            self.free.push(current);
        }
    }

    /// Insert or update a child of `parent`. Returns the child's id.
    fn upsert_child(
        &mut self,
        parent: NodeId,
        segment: &str,
        kind: FsEntryKind,
        modified: DateTime<Utc>,
        length: u64,
    ) -> NodeId {
        let key = self.name_key(segment);
        if let Some(&existing) = self.nodes[parent].children.get(&key) {
            if self.nodes[existing].kind != kind {
                let children: Vec<NodeId> = self.nodes[existing].children.values().copied().collect();
                for child in children {
                    self.remove_subtree(child);
                }
                self.nodes[existing].loaded = false;
            }
            let node = &mut self.nodes[existing];
            node.kind = kind;
            node.modified = modified;
            node.length = length;
            if node.name != segment {
                node.name = segment.to_string();
                self.rebuild_rel(existing);
            }
            return existing;
        }

        let rel = join_rel(&self.nodes[parent].rel, segment);
        let id = self.alloc(FsNode {
            name: segment.to_string(),
            rel,
            parent: Some(parent),
            kind,
            modified,
            length,
            children: HashMap::new(),
            loaded: false,
            alive: true,
        });
        self.nodes[parent].children.insert(key, id);
        id
    }

    fn rebuild_rel(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let parent_rel = self.nodes[current]
                .parent
                .map(|p| self.nodes[p].rel.clone())
                .unwrap_or_default();
            let rel = join_rel(&parent_rel, &self.nodes[current].name);
            self.nodes[current].rel = rel;
            stack.extend(self.nodes[current].children.values().copied());
        }
    }

    fn load_children(&mut self, id: NodeId) -> io::Result<()> {
        let node = &self.nodes[id];
        if node.loaded || node.kind != FsEntryKind::Directory {
            return Ok(());
        }
        let dir = self.full_path(&node.rel);
        let parent_rel = node.rel.clone();

        let listing = match fs::read_dir(&dir) {
            Ok(listing) => listing,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.nodes[id].loaded = true;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        for item in listing {
            let item = item?;
            let Ok(segment) = item.file_name().into_string() else {
                debug!(path = %item.path().display(), "Skipping non UTF-8 name");
                continue;
            };
            let rel = join_rel(&parent_rel, &segment);
            if self.is_excluded(&rel) {
                continue;
            }
            let file_type = item.file_type()?;
            if file_type.is_symlink() {
                debug!(%rel, "Skipping symlink");
                continue;
            }
            let metadata = match item.metadata() {
                Ok(m) => m,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            let key = self.name_key(&segment);
            // already known from a refresh or a simulated write
            if let Some(&existing) = self.nodes[id].children.get(&key) {
                if self.nodes[existing].name != segment {
                    warn!(
                        %rel,
                        existing = %self.nodes[existing].rel,
                        "Skipping name that differs only in case from a sibling"
                    );
                }
                continue;
            }
            let (kind, length) = if file_type.is_dir() {
                (FsEntryKind::Directory, 0)
            } else {
                (FsEntryKind::File, metadata.len())
            };
            self.upsert_child(id, &segment, kind, modified_time(&metadata)?, length);
        }
        self.nodes[id].loaded = true;
        trace!(dir = %dir.display(), children = self.nodes[id].children.len(), "Loaded directory");
        Ok(())
    }

    /// Load every directory listing below `id`.
    fn load_subtree(&mut self, id: NodeId) -> io::Result<()> {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            self.load_children(current)?;
            stack.extend(self.nodes[current].children.values().copied());
        }
        Ok(())
    }

    fn find(&mut self, rel: &str) -> io::Result<Option<NodeId>> {
        if rel.is_empty() {
            return Ok(Some(ROOT));
        }
        let mut current = ROOT;
        for segment in rel.split('/') {
            self.load_children(current)?;
            let key = self.name_key(segment);
            match self.nodes[current].children.get(&key) {
                Some(&child) => current = child,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Like `find`, but only consults what is already in memory.
    fn find_loaded(&self, rel: &str) -> Option<NodeId> {
        if rel.is_empty() {
            return Some(ROOT);
        }
        let mut current = ROOT;
        for segment in rel.split('/') {
            current = *self.nodes[current].children.get(&self.name_key(segment))?;
        }
        Some(current)
    }

    /// Look up an entry. Case-insensitive trees may return an entry whose
    /// casing differs from `rel`.
    pub fn try_get_entry(&mut self, rel: &str) -> io::Result<Option<FsEntry>> {
        Ok(self.find(rel)?.filter(|&id| id != ROOT).map(|id| self.snapshot(id)))
    }

    /// Every entry below the root, fully loading the tree, sorted by name.
    pub fn entries(&mut self) -> io::Result<Vec<FsEntry>> {
        self.load_subtree(ROOT)?;
        let mut out: Vec<FsEntry> = (0..self.nodes.len())
            .filter(|&id| id != ROOT && self.nodes[id].alive)
            .map(|id| self.snapshot(id))
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    fn disk_name(&self, rel: &str) -> io::Result<String> {
        let segment = rel.rsplit('/').next().unwrap_or(rel).to_string();
        if self.options.case_sensitive {
            return Ok(segment);
        }
        let parent = self.full_path(parent_name(rel).unwrap_or(""));
        let wanted = self.name_key(&segment);
        for item in fs::read_dir(parent)? {
            if let Ok(name) = item?.file_name().into_string()
                && self.name_key(&name) == wanted
            {
                return Ok(name);
            }
        }
        Ok(segment)
    }

    fn ensure_parent(&mut self, rel: &str) -> io::Result<NodeId> {
        let Some(parent) = parent_name(rel) else {
            return Ok(ROOT);
        };
        if let Some(id) = self.find_loaded(parent)
            && self.nodes[id].kind == FsEntryKind::Directory
        {
            return Ok(id);
        }
        self.refresh_entry(parent)?;
        self.find_loaded(parent).ok_or_else(|| not_found(parent))
    }

    /// Re-read one entry from disk, inserting, updating or dropping its node.
    ///
    /// In what-if mode the in-memory state is authoritative and is returned as is.
    pub fn refresh_entry(&mut self, rel: &str) -> io::Result<Option<FsEntry>> {
        if self.options.what_if {
            return self.try_get_entry(rel);
        }
        let path = self.full_path(rel);
        let metadata = match fs::symlink_metadata(&path) {
            Ok(m) if !m.file_type().is_symlink() => Some(m),
            Ok(_) => None,
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };
        let Some(metadata) = metadata else {
            if let Some(id) = self.find_loaded(rel) {
                self.remove_subtree(id);
            }
            return Ok(None);
        };

        let parent = self.ensure_parent(rel)?;
        let segment = self.disk_name(rel)?;
        let (kind, length) = if metadata.is_dir() {
            (FsEntryKind::Directory, 0)
        } else {
            (FsEntryKind::File, metadata.len())
        };
        let id = self.upsert_child(parent, &segment, kind, modified_time(&metadata)?, length);
        Ok(Some(self.snapshot(id)))
    }

    fn simulate(&mut self, rel: &str, metadata: SimulatedMetadata) -> io::Result<FsEntry> {
        let segments: Vec<&str> = rel.split('/').collect();
        let mut current = ROOT;
        for (i, segment) in segments.iter().enumerate() {
            self.load_children(current)?;
            if i + 1 == segments.len() {
                current = self.upsert_child(
                    current,
                    segment,
                    metadata.kind,
                    truncate_time(metadata.last_write_time_utc),
                    metadata.length,
                );
                // a simulated directory has no listing on disk to load
                self.nodes[current].loaded |= metadata.kind == FsEntryKind::Directory;
            } else {
                let key = self.name_key(segment);
                current = match self.nodes[current].children.get(&key) {
                    Some(&child) => child,
                    None => {
                        let id = self.upsert_child(current, segment, FsEntryKind::Directory, Utc::now(), 0);
                        self.nodes[id].loaded = true;
                        id
                    }
                };
            }
        }
        Ok(self.snapshot(current))
    }

    /// Write an entry through `write`, then pick up its new state.
    ///
    /// In what-if mode `write` is not called and `simulated` is recorded instead.
    pub fn write_entry<E, F>(&mut self, rel: &str, simulated: SimulatedMetadata, write: F) -> Result<FsEntry, E>
    where
        E: From<io::Error>,
        F: FnOnce(&Path) -> Result<(), E>,
    {
        if self.options.what_if {
            debug!(%rel, "What-if: skipping write");
            return Ok(self.simulate(rel, simulated)?);
        }
        write(&self.full_path(rel))?;
        Ok(self.refresh_entry(rel)?.ok_or_else(|| not_found(rel))?)
    }

    pub fn create_directory(&mut self, rel: &str) -> io::Result<FsEntry> {
        if self.options.what_if {
            return self.simulate(
                rel,
                SimulatedMetadata {
                    kind: FsEntryKind::Directory,
                    last_write_time_utc: Utc::now(),
                    length: 0,
                },
            );
        }
        fs::create_dir_all(self.full_path(rel))?;
        self.refresh_entry(rel)?.ok_or_else(|| not_found(rel))
    }

    /// Delete a file or an empty directory. Missing entries are not an error.
    pub fn delete(&mut self, rel: &str) -> io::Result<()> {
        if self.options.what_if {
            if let Some(id) = self.find(rel)?.filter(|&id| id != ROOT) {
                self.load_children(id)?;
                if !self.nodes[id].children.is_empty() {
                    return Err(io::Error::new(
                        ErrorKind::DirectoryNotEmpty,
                        format!("'{rel}' is not empty"),
                    ));
                }
                self.remove_subtree(id);
            }
            return Ok(());
        }

        let path = self.full_path(rel);
        match fs::symlink_metadata(&path) {
            Ok(m) if m.is_dir() => fs::remove_dir(&path)?,
            Ok(_) => fs::remove_file(&path)?,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        self.refresh_entry(rel)?;
        Ok(())
    }

    /// Rename `from` to `to`, creating missing parents of `to`.
    pub fn move_entry(&mut self, from: &str, to: &str) -> io::Result<FsEntry> {
        if self.options.what_if {
            let id = self.find(from)?.filter(|&id| id != ROOT).ok_or_else(|| not_found(from))?;
            let node = &self.nodes[id];
            let simulated = SimulatedMetadata {
                kind: node.kind,
                last_write_time_utc: node.modified,
                length: node.length,
            };
            if node.kind == FsEntryKind::Directory {
                self.load_subtree(id)?;
            }
            let placeholder = self.simulate(to, simulated)?;
            let target = self.find_loaded(&placeholder.name).ok_or_else(|| not_found(to))?;
            if target == id {
                // case-only rename on a case-insensitive tree
                return Ok(placeholder);
            }
            // move the children of the original node under the new node
            let children: Vec<(String, NodeId)> = self.nodes[id].children.drain().collect();
            for (key, child) in children {
                self.nodes[child].parent = Some(target);
                self.nodes[target].children.insert(key, child);
            }
            self.nodes[target].loaded = self.nodes[id].loaded;
            self.rebuild_rel(target);
            self.remove_subtree(id);
            return Ok(self.snapshot(target));
        }

        let to_path = self.full_path(to);
        if let Some(parent) = to_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(self.full_path(from), &to_path)?;
        self.refresh_entry(from)?;
        self.refresh_entry(to)?.ok_or_else(|| not_found(to))
    }

    pub fn set_last_write_time(&mut self, rel: &str, time: DateTime<Utc>) -> io::Result<FsEntry> {
        if self.options.what_if {
            let id = self.find(rel)?.filter(|&id| id != ROOT).ok_or_else(|| not_found(rel))?;
            self.nodes[id].modified = truncate_time(time);
            return Ok(self.snapshot(id));
        }
        File::options()
            .write(true)
            .open(self.full_path(rel))?
            .set_modified(SystemTime::from(time))?;
        self.refresh_entry(rel)?.ok_or_else(|| not_found(rel))
    }

    /// Number of live nodes, root included.
    pub fn loaded_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.alive).count()
    }
}
