//! A translator that copies resource files into module outputs.
//!
//! A resource keeps its path relative to the source root it lives in, so
//! `core/src/conf/app.json` lands in `<core output>/conf/app.json`. Resources
//! declare no symbols and never pull dependents into another round.

use std::fs;
use std::path::{Path, PathBuf};

use kiln_build::{
    CompileContext, CompiledSource, Compiler, ContentKind, ModuleChunk, OutputSink, Translator,
};
use kiln_common::KilnResult;
use kiln_diagnostics::{Diagnostic, Location};
use tracing::debug;

const RESOURCE: ContentKind = ContentKind("resource");
const RESOURCE_OUTPUT: ContentKind = ContentKind("resource-output");

/// Copies files with configured extensions verbatim.
pub struct ResourceCopier {
    extensions: Vec<String>,
}

impl ResourceCopier {
    /// A copier for files whose extension is one of `extensions`.
    pub fn new(extensions: Vec<String>) -> Self {
        Self { extensions }
    }

    fn target_for(ctx: &CompileContext<'_>, file: &Path) -> Option<PathBuf> {
        let (id, is_test) = ctx.project().module_of(file)?;
        let module = ctx.project().module(id);
        let out_dir = module.output_for(is_test)?;
        // Deepest root wins, matching module ownership.
        let root = module
            .all_roots()
            .into_iter()
            .filter(|r| file.starts_with(&r.path))
            .max_by_key(|r| r.path.components().count())?;
        let relative = file.strip_prefix(&root.path).ok()?;
        Some(out_dir.join(relative))
    }

    fn copy(file: &Path, target: &Path) -> std::io::Result<()> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(file, target).map(|_| ())
    }
}

impl Compiler for ResourceCopier {
    fn id(&self) -> &str {
        "resources"
    }

    fn description(&self) -> String {
        "resource copier".to_string()
    }
}

impl Translator for ResourceCopier {
    fn input_kinds(&self) -> &[ContentKind] {
        &[RESOURCE]
    }

    fn output_kinds(&self) -> &[ContentKind] {
        &[RESOURCE_OUTPUT]
    }

    fn is_applicable_to(&self, file: &Path) -> bool {
        file.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| self.extensions.iter().any(|x| x == e))
    }

    fn translate(
        &self,
        ctx: &CompileContext<'_>,
        _chunk: &ModuleChunk,
        files: &[PathBuf],
        sink: &mut dyn OutputSink,
    ) -> KilnResult<()> {
        for file in files {
            let Some(target) = Self::target_for(ctx, file) else {
                ctx.emit(
                    Diagnostic::error("no output directory for resource")
                        .with_location(Location::file(file))
                        .with_origin(self.id()),
                );
                sink.add_failed(file);
                continue;
            };
            match Self::copy(file, &target) {
                Ok(()) => {
                    debug!(from = %file.display(), to = %target.display(), "copied resource");
                    sink.add(CompiledSource {
                        source: file.clone(),
                        outputs: vec![target],
                        symbols: None,
                    });
                }
                Err(e) => {
                    ctx.emit(
                        Diagnostic::error(format!("cannot copy to {}: {e}", target.display()))
                            .with_location(Location::file(file))
                            .with_origin(self.id()),
                    );
                    sink.add_failed(file);
                }
            }
        }
        Ok(())
    }
}
