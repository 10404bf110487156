use crate::util::sanitize_path_segment;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

pub const ARCHIVE_EXTENSION: &str = "epub";

/// Directory a server's archive is written to.
///
/// Every category contributes a directory segment; the server name is added
/// as a last segment only when `use_server_name_directories` is set.
pub fn output_dir(
    root: &Path,
    category_path: &[String],
    server_name: &str,
    use_server_name_directories: bool,
) -> PathBuf {
    let mut dir = root.to_path_buf();
    for category in category_path {
        dir.push(sanitize_path_segment(category));
    }
    if use_server_name_directories {
        dir.push(sanitize_path_segment(server_name));
    }
    dir
}


/// Hands out archive paths for the jobs of one run.
///
/// Each directory belongs to the first job planned into it, and that job's
/// archive is `<title>.epub`. Every other job sharing the directory writes
/// `<title> (<server>).epub`. A name therefore depends only on the job and the
/// plan, never on which other jobs succeed, so a failing server cannot lose
/// its file to a neighbour with the same title. Remaining clashes within the
/// run get a ` (N)` suffix.
#[derive(Debug, Default)]
pub struct FileNameAllocator {
    owners: HashMap<PathBuf, String>,
    taken: HashSet<PathBuf>,
}

impl FileNameAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records directory ownership from `(output dir, server name)` pairs in plan order.
    pub fn for_plan<'a>(planned: impl IntoIterator<Item = (&'a Path, &'a str)>) -> Self {
        let mut names = Self::new();
        for (dir, server) in planned {
            names
                .owners
                .entry(dir.to_path_buf())
                .or_insert_with(|| server.to_string());
        }
        names
    }

    pub fn allocate(&mut self, dir: &Path, server: &str, title: &str) -> PathBuf {
        let owner = self
            .owners
            .entry(dir.to_path_buf())
            .or_insert_with(|| server.to_string());
        let stem = if owner == server {
            sanitize_path_segment(title)
        } else {
            sanitize_path_segment(&format!("{title} ({server})"))
        };

        let mut candidate = dir.join(format!("{stem}.{ARCHIVE_EXTENSION}"));
        let mut n = 2;
        while self.taken.contains(&candidate) {
            candidate = dir.join(format!("{stem} ({n}).{ARCHIVE_EXTENSION}"));
            n += 1;
        }

        self.taken.insert(candidate.clone());
        candidate
    }
}
