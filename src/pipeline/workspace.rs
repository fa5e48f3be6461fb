//! Scoped temp workspace
//!
//! Each pipeline invocation owns one directory tree under the cache root,
//! keyed by video id. The tree is removed when the run succeeds and kept
//! for debugging when it fails with `keep_temp_on_error` set. A TTL sweep
//! at startup reclaims workspaces left behind by old runs.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use crate::error::Result;

/// Fixed subfolders of every workspace
const SUBDIRS: [&str; 5] = [
    "audio",
    "keyframes",
    "transcriptions",
    "ad_materials",
    "videos",
];

/// Per-video scratch directory tree
#[derive(Debug)]
pub struct Workspace {
    video_id: String,
    root: PathBuf,
    keep_on_error: bool,
}

impl Workspace {
    /// Create (or reuse) the workspace for `video_id` under `cache_dir`.
    pub fn create(cache_dir: &Path, video_id: &str, keep_on_error: bool) -> Result<Self> {
        let root = cache_dir.join(video_id);
        for subdir in SUBDIRS {
            std::fs::create_dir_all(root.join(subdir))?;
        }
        debug!("workspace ready at {}", root.display());
        Ok(Self {
            video_id: video_id.to_string(),
            root,
            keep_on_error,
        })
    }

    #[must_use]
    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn audio_path(&self, filename: &str) -> PathBuf {
        self.root.join("audio").join(filename)
    }

    #[must_use]
    pub fn keyframe_dir(&self) -> PathBuf {
        self.root.join("keyframes")
    }

    #[must_use]
    pub fn keyframe_path(&self, filename: &str) -> PathBuf {
        self.keyframe_dir().join(filename)
    }

    #[must_use]
    pub fn transcription_path(&self, filename: &str) -> PathBuf {
        self.root.join("transcriptions").join(filename)
    }

    #[must_use]
    pub fn ad_material_dir(&self) -> PathBuf {
        self.root.join("ad_materials")
    }

    #[must_use]
    pub fn video_path(&self, filename: &str) -> PathBuf {
        self.root.join("videos").join(filename)
    }

    /// Write a text artifact into the workspace.
    pub fn save_text(&self, relative: &str, content: &str) -> Result<()> {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        debug!("saved {}", path.display());
        Ok(())
    }

    /// Release the workspace at the end of a run.
    ///
    /// Success removes the tree. Failure keeps it when `keep_on_error` is
    /// set (the artifacts produced before the failing phase stay on disk).
    /// `force_keep` preserves the tree unconditionally; callers pass the
    /// error's `preserves_workspace()` so a cancelled run always leaves
    /// its state behind regardless of configuration.
    pub fn release(self, success: bool, force_keep: bool) {
        let keep = force_keep || (!success && self.keep_on_error);
        if keep {
            info!(
                "keeping workspace for debugging: {}",
                self.root.display()
            );
        } else {
            match std::fs::remove_dir_all(&self.root) {
                Ok(()) => debug!("workspace removed: {}", self.root.display()),
                Err(e) => warn!("could not remove workspace {}: {e}", self.root.display()),
            }
        }
    }

    /// Remove workspaces older than `ttl` under `cache_dir`.
    pub fn cleanup_expired(cache_dir: &Path, ttl: Duration) -> Result<usize> {
        if !cache_dir.exists() {
            return Ok(0);
        }

        let now = SystemTime::now();
        let mut removed = 0;

        for entry in std::fs::read_dir(cache_dir)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let age = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|mtime| now.duration_since(mtime).ok());

            if age.is_some_and(|age| age > ttl) {
                match std::fs::remove_dir_all(entry.path()) {
                    Ok(()) => {
                        info!("removed expired workspace {}", entry.path().display());
                        removed += 1;
                    }
                    Err(e) => warn!("could not remove {}: {e}", entry.path().display()),
                }
            }
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_builds_all_subdirs() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::create(tmp.path(), "vid1", true).unwrap();
        for subdir in SUBDIRS {
            assert!(ws.root().join(subdir).is_dir(), "{subdir} missing");
        }
        assert_eq!(ws.video_id(), "vid1");
    }

    #[test]
    fn release_on_success_removes_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::create(tmp.path(), "vid2", true).unwrap();
        let root = ws.root().to_path_buf();
        std::fs::write(ws.audio_path("original.wav"), b"pcm").unwrap();
        ws.release(true, false);
        assert!(!root.exists());
    }

    #[test]
    fn release_on_error_keeps_tree_when_configured() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::create(tmp.path(), "vid3", true).unwrap();
        let root = ws.root().to_path_buf();
        std::fs::write(ws.keyframe_path("frame.jpg"), b"jpg").unwrap();
        ws.release(false, false);
        assert!(root.exists());
        assert!(root.join("keyframes/frame.jpg").exists());
    }

    #[test]
    fn release_on_error_removes_tree_when_not_configured() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::create(tmp.path(), "vid4", false).unwrap();
        let root = ws.root().to_path_buf();
        ws.release(false, false);
        assert!(!root.exists());
    }

    #[test]
    fn force_keep_overrides_cleanup_policy() {
        // A cancelled run preserves its workspace even when the
        // keep-on-error setting is off.
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::create(tmp.path(), "vid6", false).unwrap();
        let root = ws.root().to_path_buf();
        ws.release(false, true);
        assert!(root.exists());
    }

    #[test]
    fn save_text_creates_parents() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::create(tmp.path(), "vid5", true).unwrap();
        ws.save_text("transcriptions/transcription.txt", "hello").unwrap();
        let read = std::fs::read_to_string(ws.transcription_path("transcription.txt")).unwrap();
        assert_eq!(read, "hello");
    }

    #[test]
    fn cleanup_expired_spares_fresh_workspaces() {
        let tmp = tempfile::tempdir().unwrap();
        let _ws = Workspace::create(tmp.path(), "fresh", true).unwrap();
        let removed = Workspace::cleanup_expired(tmp.path(), Duration::from_secs(3600)).unwrap();
        assert_eq!(removed, 0);
        assert!(tmp.path().join("fresh").exists());
    }

    #[test]
    fn cleanup_expired_removes_old_workspaces() {
        let tmp = tempfile::tempdir().unwrap();
        let _ws = Workspace::create(tmp.path(), "old", true).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        // Zero TTL: anything already on disk counts as expired.
        let removed = Workspace::cleanup_expired(tmp.path(), Duration::ZERO).unwrap();
        assert_eq!(removed, 1);
        assert!(!tmp.path().join("old").exists());
    }
}
