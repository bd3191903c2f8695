//! Source and resource root derivation shared by the language transformers.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use trellis_bsp::{
    protocol::{ResourcesItem, SourceItemKind, SourcesItem},
    uri,
};

use crate::{
    module::{JavaSourceRoot, PythonSourceRoot, ResourceRoot, SourceRootKind},
    ProjectDetails, SyncError,
};

/// A source directory derived from one source item.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RawSourceRoot {
    path: PathBuf,
    generated: bool,
    package_prefix: String,
    /// The item named a directory rather than a file.
    from_directory: bool,
}

fn to_path(uri: &str) -> Result<PathBuf, SyncError> {
    uri::file_uri_to_path(uri).ok_or_else(|| SyncError::InvalidUri {
        uri: uri.to_string(),
    })
}

/// The directory a source item contributes: the item itself for directories, its parent for
/// files.
fn source_dir(path: PathBuf, kind: SourceItemKind) -> PathBuf {
    match kind {
        SourceItemKind::Directory => path,
        SourceItemKind::File => path.parent().map(Path::to_path_buf).unwrap_or(path),
    }
}

/// Dotted path of `dir` relative to the closest enclosing root.
fn package_prefix(dir: &Path, roots: &[PathBuf]) -> String {
    roots
        .iter()
        .filter(|root| dir.starts_with(root))
        .max_by_key(|root| root.components().count())
        .and_then(|root| dir.strip_prefix(root).ok())
        .map(|relative| {
            relative
                .components()
                .filter_map(|component| component.as_os_str().to_str())
                .collect::<Vec<_>>()
                .join(".")
        })
        .unwrap_or_default()
}

fn raw_source_roots(sources: &[SourcesItem]) -> Result<Vec<RawSourceRoot>, SyncError> {
    let mut roots = Vec::new();
    for item in sources {
        let declared: Vec<PathBuf> = item
            .roots
            .iter()
            .flatten()
            .filter_map(|root| uri::file_uri_to_path(root))
            .collect();
        for source in &item.sources {
            let dir = source_dir(to_path(&source.uri)?, source.kind);
            roots.push(RawSourceRoot {
                package_prefix: package_prefix(&dir, &declared),
                path: dir,
                generated: source.generated,
                from_directory: source.kind == SourceItemKind::Directory,
            });
        }
    }
    Ok(roots)
}

/// Keeps the entries under `base`, unless none of them are, in which case all are kept.
fn retain_under_base<T>(items: &mut Vec<T>, base: &Path, path_of: impl Fn(&T) -> &Path) {
    if items.iter().any(|item| path_of(item).starts_with(base)) {
        items.retain(|item| path_of(item).starts_with(base));
    }
}

/// Drops duplicate paths and roots nested inside a directory root of the same target.
fn remove_nested(roots: Vec<RawSourceRoot>) -> Vec<RawSourceRoot> {
    let directories: Vec<PathBuf> = roots
        .iter()
        .filter(|root| root.from_directory)
        .map(|root| root.path.clone())
        .collect();

    let mut seen = BTreeSet::new();
    roots
        .into_iter()
        .filter(|root| {
            !directories
                .iter()
                .any(|dir| root.path != *dir && root.path.starts_with(dir))
        })
        .filter(|root| seen.insert(root.path.clone()))
        .collect()
}

pub fn java_source_roots(
    sources: &[SourcesItem],
    kind: SourceRootKind,
    project_root: &Path,
) -> Result<Vec<JavaSourceRoot>, SyncError> {
    let mut roots = raw_source_roots(sources)?;
    retain_under_base(&mut roots, project_root, |root| root.path.as_path());
    Ok(remove_nested(roots)
        .into_iter()
        .map(|root| JavaSourceRoot {
            path: root.path,
            kind,
            generated: root.generated,
            package_prefix: root.package_prefix,
        })
        .collect())
}

/// Like [`java_source_roots`], additionally dropping roots that sit inside a source directory
/// of any target in the project.
pub fn python_source_roots(
    sources: &[SourcesItem],
    kind: SourceRootKind,
    project_root: &Path,
    all_source_dirs: &BTreeSet<PathBuf>,
) -> Result<Vec<PythonSourceRoot>, SyncError> {
    let mut roots = raw_source_roots(sources)?;
    retain_under_base(&mut roots, project_root, |root| root.path.as_path());
    Ok(remove_nested(roots)
        .into_iter()
        .filter(|root| {
            !all_source_dirs
                .iter()
                .any(|dir| root.path != *dir && root.path.starts_with(dir))
        })
        .map(|root| PythonSourceRoot {
            path: root.path,
            kind,
            generated: root.generated,
        })
        .collect())
}

pub fn resource_roots(
    resources: &[ResourcesItem],
    kind: SourceRootKind,
    project_root: &Path,
) -> Result<Vec<ResourceRoot>, SyncError> {
    let mut dirs = Vec::new();
    for item in resources {
        for resource in &item.resources {
            let path = to_path(resource)?;
            let dir = if uri::is_directory_uri(resource) {
                path
            } else {
                path.parent().map(Path::to_path_buf).unwrap_or(path)
            };
            dirs.push(dir);
        }
    }
    retain_under_base(&mut dirs, project_root, |dir| dir.as_path());

    let mut seen = BTreeSet::new();
    Ok(dirs
        .into_iter()
        .filter(|dir| seen.insert(dir.clone()))
        .map(|path| ResourceRoot { path, kind })
        .collect())
}

/// Every source directory claimed by any target of the snapshot.
pub fn all_source_dirs(details: &ProjectDetails) -> BTreeSet<PathBuf> {
    details
        .sources
        .iter()
        .flat_map(|item| &item.sources)
        .filter_map(|source| {
            uri::file_uri_to_path(&source.uri).map(|path| source_dir(path, source.kind))
        })
        .collect()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use trellis_bsp::{protocol::SourceItem, BuildTargetIdentifier};

    fn item(sources: &[(&str, SourceItemKind)], roots: Option<&[&str]>) -> SourcesItem {
        SourcesItem {
            target: BuildTargetIdentifier::new("file:///ws/app"),
            sources: sources
                .iter()
                .map(|(uri, kind)| SourceItem {
                    uri: uri.to_string(),
                    kind: *kind,
                    generated: false,
                })
                .collect(),
            roots: roots.map(|roots| roots.iter().map(|root| root.to_string()).collect()),
        }
    }

    #[test]
    fn package_prefix_is_relative_to_the_closest_root() {
        let roots = vec![PathBuf::from("/ws/src"), PathBuf::from("/ws/src/main/java")];
        assert_eq!(
            package_prefix(Path::new("/ws/src/main/java/com/example"), &roots),
            "com.example"
        );
        assert_eq!(package_prefix(Path::new("/ws/src/main/java"), &roots), "");
        assert_eq!(package_prefix(Path::new("/elsewhere/pkg"), &roots), "");
    }

    #[test]
    fn file_items_contribute_their_directory() {
        let sources = [item(
            &[
                ("file:///ws/app/src/com/a/A.java", SourceItemKind::File),
                ("file:///ws/app/src/com/a/B.java", SourceItemKind::File),
            ],
            Some(&["file:///ws/app/src/"]),
        )];

        let roots = java_source_roots(&sources, SourceRootKind::Main, Path::new("/ws")).unwrap();

        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].path, PathBuf::from("/ws/app/src/com/a"));
        assert_eq!(roots[0].package_prefix, "com.a");
    }

    #[test]
    fn nested_directory_roots_collapse_into_the_ancestor() {
        let sources = [item(
            &[
                ("file:///ws/app/src/", SourceItemKind::Directory),
                ("file:///ws/app/src/gen/", SourceItemKind::Directory),
            ],
            None,
        )];

        let roots = java_source_roots(&sources, SourceRootKind::Main, Path::new("/ws")).unwrap();

        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].path, PathBuf::from("/ws/app/src"));
    }

    #[test]
    fn roots_outside_the_project_are_dropped_unless_all_are() {
        let mixed = [item(
            &[
                ("file:///ws/app/src/", SourceItemKind::Directory),
                ("file:///cache/gen/", SourceItemKind::Directory),
            ],
            None,
        )];
        let roots = java_source_roots(&mixed, SourceRootKind::Main, Path::new("/ws")).unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].path, PathBuf::from("/ws/app/src"));

        let outside = [item(&[("file:///cache/gen/", SourceItemKind::Directory)], None)];
        let roots = java_source_roots(&outside, SourceRootKind::Main, Path::new("/ws")).unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].path, PathBuf::from("/cache/gen"));
    }

    #[test]
    fn python_roots_inside_another_targets_root_are_dropped() {
        let sources = [item(
            &[
                ("file:///ws/app/pkg/", SourceItemKind::Directory),
                ("file:///ws/tools/", SourceItemKind::Directory),
            ],
            None,
        )];
        let all = BTreeSet::from([
            PathBuf::from("/ws/app"),
            PathBuf::from("/ws/app/pkg"),
            PathBuf::from("/ws/tools"),
        ]);

        let roots =
            python_source_roots(&sources, SourceRootKind::Main, Path::new("/ws"), &all).unwrap();

        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].path, PathBuf::from("/ws/tools"));
    }

    #[test]
    fn resources_are_deduplicated_by_directory() {
        let resources = [ResourcesItem {
            target: BuildTargetIdentifier::new("file:///ws/app"),
            resources: vec![
                "file:///ws/app/res/a.properties".to_string(),
                "file:///ws/app/res/b.properties".to_string(),
                "file:///ws/app/static/".to_string(),
            ],
        }];

        let roots = resource_roots(&resources, SourceRootKind::Test, Path::new("/ws")).unwrap();

        assert_eq!(
            roots,
            vec![
                ResourceRoot {
                    path: PathBuf::from("/ws/app/res"),
                    kind: SourceRootKind::Test,
                },
                ResourceRoot {
                    path: PathBuf::from("/ws/app/static"),
                    kind: SourceRootKind::Test,
                },
            ]
        );
    }

    #[test]
    fn non_file_uris_are_rejected() {
        let sources = [item(&[("jar:///x.jar!/A.java", SourceItemKind::File)], None)];
        let err = java_source_roots(&sources, SourceRootKind::Main, Path::new("/ws")).unwrap_err();
        assert!(matches!(err, SyncError::InvalidUri { .. }));
    }
}
