//! Workspace discovery of registration files

use super::registration::parse_registrations;
use crate::config::ServiceMonitorConfig;
use crate::types::ServiceRegistration;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

/// Registration files under `root`, at most `depth` directories deep
pub fn find_registration_files(
    root: &Path,
    file_name: &str,
    depth: usize,
    skip_dirs: &[String],
) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .max_depth(depth + 1)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || !skip_dirs.iter().any(|d| entry.file_name() == d.as_str())
        })
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && entry.file_name() == file_name)
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

/// Read and parse every registration file in a workspace
pub fn scan_workspace(
    root: &Path,
    config: &ServiceMonitorConfig,
) -> Vec<(PathBuf, Vec<ServiceRegistration>)> {
    find_registration_files(root, &config.registration_file, config.scan_depth, &config.skip_dirs)
        .into_iter()
        .filter_map(|path| match std::fs::read_to_string(&path) {
            Ok(content) => {
                let regs = parse_registrations(&content);
                Some((path, regs))
            }
            Err(e) => {
                warn!("Failed to read {:?}: {}", path, e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_depth_bound_and_skip_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let line = r#"{"port":3000,"name":"a","command":"x","cwd":"/","startedAt":"2026-01-01T00:00:00Z"}"#;

        fs::write(root.join(".services.json"), line).unwrap();
        fs::create_dir_all(root.join("apps/web")).unwrap();
        fs::write(root.join("apps/web/.services.json"), line).unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::write(root.join("node_modules/pkg/.services.json"), line).unwrap();
        fs::create_dir_all(root.join("a/b/c/d")).unwrap();
        fs::write(root.join("a/b/c/d/.services.json"), line).unwrap();

        let config = ServiceMonitorConfig::default();
        let found = find_registration_files(root, ".services.json", config.scan_depth, &config.skip_dirs);

        assert_eq!(
            found,
            vec![root.join(".services.json"), root.join("apps/web/.services.json")]
        );
    }

    #[test]
    fn test_scan_missing_root_is_empty() {
        let config = ServiceMonitorConfig::default();
        assert!(scan_workspace(Path::new("/definitely/not/here"), &config).is_empty());
    }
}
