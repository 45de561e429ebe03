use std::path::PathBuf;

/// Returns the process's default scratch directory. Every disk-backed
/// operator's constructor takes a temp root as an explicit argument and
/// may default it to this value — but nothing in the framework reaches for
/// it implicitly, per spec §9: "a process-wide default temp folder is
/// provided only as a convenience, never as implicit state."
pub fn default_temp_root() -> PathBuf {
    std::env::temp_dir()
}
