use trellis_bsp::uri;

use super::{
    base_directory, generic_info, libraries, root_kind, roots, ModuleTransformer,
    TransformContext,
};
use crate::{
    module::{JavaModule, JvmJdkInfo, KotlinAddendum, Module},
    ModuleDetails, SyncError,
};

/// Builds modules for JVM languages (Java, Kotlin, Scala).
#[derive(Debug, Clone, Copy, Default)]
pub struct JavaModuleTransformer;

impl ModuleTransformer for JavaModuleTransformer {
    fn transform(
        &self,
        details: &ModuleDetails,
        ctx: &TransformContext<'_>,
    ) -> Result<Module, SyncError> {
        let target = &details.target;
        let kind = root_kind(target);
        let (library_names, module_level_libraries) = libraries::module_libraries(details);

        let compiler_output = details
            .javac_options
            .as_ref()
            .map(|options| options.class_directory.as_str())
            .filter(|dir| !dir.is_empty())
            .and_then(uri::file_uri_to_path);

        let jdk = target.data.jvm().and_then(|jvm| {
            let version = jvm.java_version.as_deref()?;
            Some(JvmJdkInfo {
                name: format!("{}-{version}", ctx.project_name),
                java_home: jvm.java_home.clone(),
            })
        });

        let kotlin = target.data.kotlin().map(|kotlin| KotlinAddendum {
            language_version: kotlin.language_version.clone(),
            api_version: kotlin.api_version.clone(),
            kotlinc_options: kotlin.kotlinc_opts.clone(),
            associates: kotlin
                .associates
                .iter()
                .map(|id| ctx.module_names.module_name(id))
                .collect(),
        });

        Ok(Module::Java(JavaModule {
            generic: generic_info(details, ctx, library_names),
            base_directory: base_directory(target)?,
            source_roots: roots::java_source_roots(&details.sources, kind, ctx.project_root)?,
            resource_roots: roots::resource_roots(&details.resources, kind, ctx.project_root)?,
            module_level_libraries,
            compiler_output,
            output_paths: details
                .output_path_uris
                .iter()
                .filter_map(|uri| uri::file_uri_to_path(uri))
                .collect(),
            javac_options: details
                .javac_options
                .as_ref()
                .map(|options| options.options.clone())
                .unwrap_or_default(),
            jdk,
            kotlin,
        }))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::{
        collections::BTreeSet,
        path::{Path, PathBuf},
    };

    use trellis_bsp::{
        protocol::{
            BuildTarget, BuildTargetData, JavacOptionsItem, JvmBuildTarget, KotlinBuildTarget,
        },
        BuildTargetIdentifier,
    };

    use super::*;
    use crate::strategy::UriModuleNames;

    fn details(data: BuildTargetData) -> ModuleDetails {
        let mut target = BuildTarget::new(BuildTargetIdentifier::new("file:///ws/app"));
        target.base_directory = Some("file:///ws/app/".to_string());
        target.data = data;
        ModuleDetails {
            target,
            sources: Vec::new(),
            resources: Vec::new(),
            dependencies_sources: Vec::new(),
            javac_options: None,
            python_options: None,
            output_path_uris: Vec::new(),
            library_dependencies: Some(Vec::new()),
            module_dependencies: Vec::new(),
        }
    }

    fn transform(details: &ModuleDetails) -> JavaModule {
        let dirs = BTreeSet::new();
        let ctx = TransformContext {
            project_root: Path::new("/ws"),
            project_name: "shop",
            module_names: &UriModuleNames,
            all_source_dirs: &dirs,
        };
        match JavaModuleTransformer.transform(details, &ctx).unwrap() {
            Module::Java(module) => module,
            other => panic!("expected a java module, got {other:?}"),
        }
    }

    #[test]
    fn jdk_name_combines_project_and_java_version() {
        let module = transform(&details(BuildTargetData::Jvm(JvmBuildTarget {
            java_home: Some("file:///jdk/17/".to_string()),
            java_version: Some("17".to_string()),
        })));

        let jdk = module.jdk.unwrap();
        assert_eq!(jdk.name, "shop-17");
        assert_eq!(jdk.java_home.as_deref(), Some("file:///jdk/17/"));
        assert!(module.kotlin.is_none());
        assert_eq!(module.base_directory, Some(PathBuf::from("/ws/app")));
    }

    #[test]
    fn kotlin_targets_carry_their_jvm_target() {
        let module = transform(&details(BuildTargetData::Kotlin(KotlinBuildTarget {
            language_version: Some("1.9".to_string()),
            api_version: Some("1.9".to_string()),
            kotlinc_opts: vec!["-Xjsr305=strict".to_string()],
            associates: vec![BuildTargetIdentifier::new("file:///ws/app-internal")],
            jvm_build_target: Some(JvmBuildTarget {
                java_home: None,
                java_version: Some("21".to_string()),
            }),
        })));

        assert_eq!(module.jdk.unwrap().name, "shop-21");
        let kotlin = module.kotlin.unwrap();
        assert_eq!(kotlin.kotlinc_options, vec!["-Xjsr305=strict".to_string()]);
        assert_eq!(kotlin.associates, vec!["file:///ws/app-internal".to_string()]);
    }

    #[test]
    fn missing_target_data_yields_no_addenda() {
        let module = transform(&details(BuildTargetData::default()));
        assert!(module.jdk.is_none());
        assert!(module.kotlin.is_none());
    }

    #[test]
    fn javac_options_provide_compiler_output() {
        let mut details = details(BuildTargetData::default());
        details.javac_options = Some(JavacOptionsItem {
            target: details.target.id.clone(),
            options: vec!["-parameters".to_string()],
            classpath: Vec::new(),
            class_directory: "file:///ws/out/app/classes/".to_string(),
        });

        let module = transform(&details);

        assert_eq!(module.compiler_output, Some(PathBuf::from("/ws/out/app/classes")));
        assert_eq!(module.javac_options, vec!["-parameters".to_string()]);
    }

    #[test]
    fn non_file_base_directory_is_an_error() {
        let mut details = details(BuildTargetData::default());
        details.target.base_directory = Some("bazel://ws/app".to_string());
        let dirs = BTreeSet::new();
        let ctx = TransformContext {
            project_root: Path::new("/ws"),
            project_name: "shop",
            module_names: &UriModuleNames,
            all_source_dirs: &dirs,
        };

        let err = JavaModuleTransformer.transform(&details, &ctx).unwrap_err();
        assert!(matches!(err, SyncError::InvalidUri { .. }));
    }
}
