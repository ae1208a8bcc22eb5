//! Build scheduler: lowers, emits, and invokes the external CUDA
//! toolchain for a batch of tasks in parallel.
//!
//! Fixed lowering-then-emit-then-invoke ordering per instance, with
//! `nvcc`'s combined stdout/stderr captured to `nvcc_log.txt` alongside
//! the generated source, so a failed build always leaves enough on disk
//! to diagnose without rerunning. The actual subprocess call is behind
//! the [`ToolchainInvoker`] trait so tests can substitute a fake
//! toolchain instead of requiring a real `nvcc` on the test machine.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tgc_core::function::IRModule;
use tgc_core::task::Task;
use tgc_lower::ScheduleRegistry;
use tgc_passes::PassContext;

use crate::error::BuildError;

pub struct BuildInstance {
    pub task: Task,
    pub output_dir: PathBuf,
    pub keep_ir: bool,
    pub keep_ptx: bool,
    pub verbose: bool,
}

/// Compute capability targeted by generated `-gencode` flags. A fixed
/// default rather than a live device query, since this crate never talks
/// to the CUDA driver directly (§1 "external collaborators").
const DEFAULT_COMPUTE_CAPABILITY: &str = "80";

/// Invokes the external native-code toolchain that turns a `.cu` source
/// file into a shared library. The production implementation ([`NvccInvoker`])
/// shells out to `nvcc`; tests substitute a fake that writes a stub file
/// instead, so `compile_one`'s orchestration (directory layout, log
/// capture, error mapping) can be exercised without a GPU toolchain.
pub trait ToolchainInvoker: Send + Sync {
    fn invoke(&self, source_path: &Path, lib_path: &Path, work_dir: &Path) -> io::Result<Output>;
}

pub struct NvccInvoker;

impl ToolchainInvoker for NvccInvoker {
    fn invoke(&self, source_path: &Path, lib_path: &Path, work_dir: &Path) -> io::Result<Output> {
        Command::new("nvcc")
            .current_dir(work_dir)
            .arg(source_path)
            .arg("-I").arg(runtime_include_dir())
            .arg("-L").arg(runtime_lib_dir())
            .arg(format!("-gencode=arch=compute_{cc},code=sm_{cc}", cc = DEFAULT_COMPUTE_CAPABILITY))
            .arg("-Xcompiler").arg("-fPIC")
            .arg("--shared")
            .arg("-ltgc_runtime")
            .arg("-o").arg(lib_path)
            .output()
    }
}

fn lower_and_emit(instance: &BuildInstance, registry: &ScheduleRegistry, ctx: &PassContext) -> Result<(IRModule, String), BuildError> {
    let module = registry.implement_cuda(&instance.task, ctx)?;
    let module = tgc_lower::run_lowering_pipeline(&module)?;
    let source = crate::codegen::emit_module(&module);
    Ok((module, source))
}

fn compile_one(instance: &BuildInstance, registry: &ScheduleRegistry, ctx: &PassContext, invoker: &dyn ToolchainInvoker) -> Result<PathBuf, BuildError> {
    fs::create_dir_all(&instance.output_dir)?;
    let (_module, source) = lower_and_emit(instance, registry, ctx)?;

    let source_path = instance.output_dir.join("source.cu");
    fs::write(&source_path, &source)?;

    let lib_path = instance.output_dir.join("lib.so");
    let log_path = instance.output_dir.join("nvcc_log.txt");

    let work_dir = tempfile::Builder::new()
        .prefix("tgc-build-")
        .tempdir_in(&instance.output_dir)
        .map_err(BuildError::Io)?;

    let output = invoker
        .invoke(&source_path, &lib_path, work_dir.path())
        .map_err(|source| BuildError::ToolchainSpawnFailed { task: instance.task.name.clone(), source })?;

    let mut log = Vec::new();
    log.extend_from_slice(&output.stdout);
    log.extend_from_slice(&output.stderr);
    fs::write(&log_path, &log)?;

    if !output.status.success() {
        return Err(BuildError::ToolchainFailed {
            task: instance.task.name.clone(),
            status: output.status.code().unwrap_or(-1),
            log_path,
        });
    }

    Ok(lib_path)
}

fn runtime_include_dir() -> PathBuf {
    PathBuf::from(std::env::var("TGC_RUNTIME_INCLUDE").unwrap_or_else(|_| "/usr/local/tgc/include".into()))
}

fn runtime_lib_dir() -> PathBuf {
    PathBuf::from(std::env::var("TGC_RUNTIME_LIB").unwrap_or_else(|_| "/usr/local/tgc/lib".into()))
}

/// Sizes a worker pool by available memory (each nvcc invocation budgeted
/// ~1.5 GiB) capped by CPU count, matching the original's
/// `min(max(available_memory / (1.5 * 1024**3), 1), cpu_count)` formula.
fn worker_count() -> usize {
    let mut sys = sysinfo::System::new();
    sys.refresh_memory();
    let available_bytes = sys.available_memory();
    let by_memory = (available_bytes as f64 / (1.5 * 1024.0 * 1024.0 * 1024.0)).floor().max(1.0) as usize;
    by_memory.min(num_cpus::get())
}

/// Lowers, emits, and builds every instance in parallel using the real
/// `nvcc` toolchain, returning the output library path for each slot in
/// input order, or `None` where that instance's toolchain invocation
/// failed -- a per-instance failure never aborts the batch (§8 scenario 4).
pub fn batch_build(instances: Vec<BuildInstance>, registry: &ScheduleRegistry, ctx: &PassContext) -> Vec<Option<PathBuf>> {
    batch_build_with(instances, registry, ctx, &NvccInvoker)
}

/// Same as [`batch_build`], but with an injectable [`ToolchainInvoker`]
/// so callers (and tests) can substitute a fake toolchain.
pub fn batch_build_with(
    instances: Vec<BuildInstance>,
    registry: &ScheduleRegistry,
    ctx: &PassContext,
    invoker: &dyn ToolchainInvoker,
) -> Vec<Option<PathBuf>> {
    let pool = rayon::ThreadPoolBuilder::new().num_threads(worker_count()).build();
    let Ok(pool) = pool else {
        return instances.iter().map(|i| compile_one(i, registry, ctx, invoker).ok()).collect();
    };

    pool.install(|| {
        use rayon::prelude::*;
        instances
            .par_iter()
            .map(|instance| match compile_one(instance, registry, ctx, invoker) {
                Ok(path) => Some(path),
                Err(err) => {
                    if instance.verbose {
                        tracing::warn!(task = %instance.task.name, error = %err, "build failed");
                    }
                    None
                }
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_count_is_at_least_one_and_bounded_by_cpus() {
        let count = worker_count();
        assert!(count >= 1);
        assert!(count <= num_cpus::get());
    }
}
