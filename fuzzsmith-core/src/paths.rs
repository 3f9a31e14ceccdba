//! Layout of the on-disk state directory.
//!
//! Both the pipeline and the local sandbox resolve job paths through these
//! helpers so generated sources, logs and reproducers end up in one place
//! per cycle.

use std::path::{Path, PathBuf};

use uuid::Uuid;

pub fn jobs_dir(state_dir: &Path) -> PathBuf {
    state_dir.join("jobs")
}

pub fn job_dir(state_dir: &Path, job_id: Uuid) -> PathBuf {
    jobs_dir(state_dir).join(job_id.to_string())
}

pub fn cycle_dir(state_dir: &Path, job_id: Uuid, cycle: u32) -> PathBuf {
    job_dir(state_dir, job_id).join(format!("cycle-{cycle:03}"))
}

/// Directory holding durable status documents.
pub fn status_dir(state_dir: &Path) -> PathBuf {
    state_dir.join("status")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_dirs_sort_lexicographically() {
        let id = Uuid::new_v4();
        let c2 = cycle_dir(Path::new("/tmp/state"), id, 2);
        let c10 = cycle_dir(Path::new("/tmp/state"), id, 10);
        assert!(c2.to_string_lossy() < c10.to_string_lossy());
    }
}
