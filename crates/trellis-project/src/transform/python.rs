use super::{
    base_directory, generic_info, libraries, root_kind, roots, ModuleTransformer,
    TransformContext,
};
use crate::{
    module::{Module, PythonModule, PythonSdkInfo},
    ModuleDetails, SyncError,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct PythonModuleTransformer;

impl ModuleTransformer for PythonModuleTransformer {
    fn transform(
        &self,
        details: &ModuleDetails,
        ctx: &TransformContext<'_>,
    ) -> Result<Module, SyncError> {
        let target = &details.target;
        let kind = root_kind(target);
        let (library_names, libraries) = libraries::module_libraries(details);

        // Only usable when both the version and the interpreter are known.
        let sdk = target.data.python().and_then(|python| {
            Some(PythonSdkInfo {
                version: python.version.clone()?,
                interpreter: python.interpreter.clone()?,
            })
        });

        Ok(Module::Python(PythonModule {
            generic: generic_info(details, ctx, library_names),
            base_directory: base_directory(target)?,
            source_roots: roots::python_source_roots(
                &details.sources,
                kind,
                ctx.project_root,
                ctx.all_source_dirs,
            )?,
            resource_roots: roots::resource_roots(&details.resources, kind, ctx.project_root)?,
            libraries,
            sdk,
        }))
    }
}
