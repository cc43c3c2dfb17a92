#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use helix_core::sync::{DirectoryPair, PairOptions, PreSyncDetails, SyncResult, SyncSummary};
use helix_core::{DerivedBytesProvider, FileVersion};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use secrecy::SecretString;
use tempfile::TempDir;
use walkdir::WalkDir;

pub const TEST_PASSWORD: &str = "test-passphrase-12345";

/// Base for deterministic plaintext modification times.
pub const BASE_SECS: u64 = 1_700_000_000;

pub fn provider() -> Arc<DerivedBytesProvider> {
    provider_for(TEST_PASSWORD)
}

pub fn provider_for(password: &str) -> Arc<DerivedBytesProvider> {
    Arc::new(DerivedBytesProvider::from_password(&SecretString::from(password.to_string())))
}

/// Cheap key derivation, case-sensitive, creating the encrypted directory on first open.
pub fn test_options() -> PairOptions {
    PairOptions::default()
        .file_version(FileVersion::UnitTest)
        .case_sensitive(true)
        .initialize(true)
}

pub fn at(offset_secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(BASE_SECS + offset_secs)
}

/// Write `content` to `root/rel` and stamp it with `at(offset_secs)`.
pub fn write_file(root: &Path, rel: &str, content: &[u8], offset_secs: u64) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_modified(at(offset_secs))
        .unwrap();
}

pub fn modified(path: &Path) -> SystemTime {
    fs::metadata(path).unwrap().modified().unwrap()
}

/// Relative name to content (`None` for directories), excluding the sync state directory.
pub fn snapshot(root: &Path) -> BTreeMap<String, Option<Vec<u8>>> {
    WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".helix")
        .map(|e| {
            let e = e.unwrap();
            let rel = e
                .path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/");
            let content = e.file_type().is_file().then(|| fs::read(e.path()).unwrap());
            (rel, content)
        })
        .collect()
}

/// Two plaintext replicas (`a` and `b`) sharing one encrypted directory.
pub struct Fixture {
    root: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Fixture {
            root: TempDir::new().unwrap(),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.path().join(name)
    }

    pub fn encr(&self) -> PathBuf {
        self.path("encr")
    }

    pub fn pair(&self, replica: &str) -> DirectoryPair {
        self.pair_with(replica, test_options(), 7)
    }

    pub fn pair_with(&self, replica: &str, options: PairOptions, seed: u64) -> DirectoryPair {
        DirectoryPair::open(&self.path(replica), &self.encr(), provider(), options)
            .unwrap()
            .with_rng(ChaCha8Rng::seed_from_u64(seed))
    }

    /// Encrypted entry files, excluding the directory header.
    pub fn encrypted_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = fs::read_dir(self.encr())
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.file_name().is_some_and(|n| n != "helix.hx"))
            .collect();
        files.sort();
        files
    }
}

/// Run a full pass and fail the test on any failed change.
pub fn sync_clean(pair: &mut DirectoryPair) -> SyncSummary {
    let summary = pair
        .sync_all(&mut |change: &PreSyncDetails, result: &SyncResult| {
            if let SyncResult::Failed(e) = result {
                panic!("{change} failed: {e}");
            }
        })
        .unwrap();
    assert_eq!(summary.failed, 0);
    summary
}

/// Run a full pass, collecting failures instead of panicking.
pub fn sync_collect(pair: &mut DirectoryPair) -> (SyncSummary, Vec<String>) {
    let mut failures = Vec::new();
    let summary = pair
        .sync_all(&mut |change: &PreSyncDetails, result: &SyncResult| {
            if let SyncResult::Failed(e) = result {
                failures.push(format!("{}: {e}", change.display_name()));
            }
        })
        .unwrap();
    (summary, failures)
}
