//! Shared test fixtures

use crate::core::{InlineSpawner, Job, WorkerExit, WorkerHandle, WorkerSpawner};
use crate::error::{DispatchError, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Write a shell describer script and return the command that runs it.
///
/// The options are shifted away, so `body` sees image, feat and desc as
/// `$1`, `$2` and `$3`. The script is run through `/bin/sh` rather than
/// executed directly, which avoids `ETXTBSY` when other tests fork while
/// the file is being written.
pub(crate) fn describer_script(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    let text = format!("while [ $# -gt 3 ]; do shift; done\n{}\n", body);
    std::fs::write(&path, text).unwrap();
    format!("/bin/sh {}", path.display())
}

/// Describer that copies the image into both artifacts
pub(crate) fn copying_describer(dir: &Path) -> String {
    describer_script(dir, "copy.sh", "cp \"$1\" \"$2\" && cp \"$1\" \"$3\"")
}

/// Write `count` images plus a scene file referencing them
pub(crate) fn write_scene(dir: &Path, count: usize) -> PathBuf {
    let images = dir.join("images");
    std::fs::create_dir_all(&images).unwrap();

    let views: Vec<String> = (0..count)
        .map(|id| {
            std::fs::write(images.join(format!("view_{}.jpg", id)), format!("image {}", id)).unwrap();
            format!(r#"{{"id": {}, "image_path": "view_{}.jpg"}}"#, id, id)
        })
        .collect();

    let scene = dir.join("scene.json");
    std::fs::write(
        &scene,
        format!(
            r#"{{"root_path": "{}", "views": [{}]}}"#,
            images.display(),
            views.join(",")
        ),
    )
    .unwrap();
    scene
}

/// Inline spawner whose launch number `fail_at` (counting from zero) fails
/// the way `fork` does when the process table is full.
pub(crate) struct FailingSpawner {
    fail_at: u64,
    calls: Arc<AtomicU64>,
}

impl FailingSpawner {
    pub(crate) fn new(fail_at: u64) -> Self {
        Self {
            fail_at,
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Launch attempts so far, readable after the spawner is moved away
    pub(crate) fn calls(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.calls)
    }
}

impl WorkerSpawner for FailingSpawner {
    fn spawn<'a>(&self, id: u64, job: Job<'a>) -> Result<WorkerHandle> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == self.fail_at {
            return Err(DispatchError::Spawn(std::io::Error::new(
                std::io::ErrorKind::WouldBlock,
                "resource temporarily unavailable",
            )));
        }
        InlineSpawner.spawn(id, job)
    }

    fn wait_any(&self, workers: &[WorkerHandle]) -> Result<(usize, WorkerExit)> {
        InlineSpawner.wait_any(workers)
    }

    fn is_isolated(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}
