use std::collections::BTreeSet;

use trellis_bsp::protocol::{DependencySourcesItem, LibraryItem};

use crate::{module::Library, ModuleDetails};

const SOURCES_JAR_SUFFIX: &str = "-sources.jar";

pub fn library_from_item(item: &LibraryItem) -> Library {
    Library {
        name: item.id.uri.clone(),
        classes: item.jars.clone(),
        sources: item.source_jars.clone(),
    }
}

/// One library per dependency source artifact, named after the artifact.
///
/// `foo-sources.jar` is assumed to sit next to its `foo.jar`.
pub fn libraries_from_dependency_sources(items: &[DependencySourcesItem]) -> Vec<Library> {
    let mut seen = BTreeSet::new();
    items
        .iter()
        .flat_map(|item| &item.sources)
        .filter(|uri| seen.insert(uri.as_str()))
        .map(|uri| Library {
            name: uri.clone(),
            classes: uri
                .strip_suffix(SOURCES_JAR_SUFFIX)
                .map(|stem| vec![format!("{stem}.jar")])
                .unwrap_or_default(),
            sources: vec![uri.clone()],
        })
        .collect()
}

/// The library names a module depends on, and the libraries private to the module.
///
/// Shared libraries from the index are referenced by name; without an index each dependency
/// source becomes a module-level library.
pub(crate) fn module_libraries(details: &ModuleDetails) -> (Vec<String>, Vec<Library>) {
    match &details.library_dependencies {
        Some(ids) => (ids.iter().map(|id| id.uri.clone()).collect(), Vec::new()),
        None => {
            let libraries = libraries_from_dependency_sources(&details.dependencies_sources);
            let names = libraries.iter().map(|library| library.name.clone()).collect();
            (names, libraries)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_bsp::BuildTargetIdentifier;

    #[test]
    fn dependency_sources_become_libraries() {
        let items = vec![
            DependencySourcesItem {
                target: BuildTargetIdentifier::new("//app"),
                sources: vec![
                    "file:///m2/guava-33.0-sources.jar".to_string(),
                    "file:///vendor/src/".to_string(),
                ],
            },
            DependencySourcesItem {
                target: BuildTargetIdentifier::new("//app"),
                sources: vec!["file:///m2/guava-33.0-sources.jar".to_string()],
            },
        ];

        let libraries = libraries_from_dependency_sources(&items);

        assert_eq!(
            libraries,
            vec![
                Library {
                    name: "file:///m2/guava-33.0-sources.jar".to_string(),
                    classes: vec!["file:///m2/guava-33.0.jar".to_string()],
                    sources: vec!["file:///m2/guava-33.0-sources.jar".to_string()],
                },
                Library {
                    name: "file:///vendor/src/".to_string(),
                    classes: Vec::new(),
                    sources: vec!["file:///vendor/src/".to_string()],
                },
            ]
        );
    }
}
