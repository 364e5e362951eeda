use std::path::{Path, PathBuf};

pub const PLEXUS_DIR: &str = ".plexus";

pub fn plexus_root(home: &Path) -> PathBuf {
    home.join(PLEXUS_DIR)
}

pub fn run_dir(home: &Path) -> PathBuf {
    plexus_root(home).join("run")
}

/// `<home>/.plexus/run/<node>.sock`
pub fn default_socket_path(home: &Path, node: &str) -> PathBuf {
    run_dir(home).join(format!("{node}.sock"))
}
