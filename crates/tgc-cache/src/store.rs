//! Atomic on-disk persistence of an optimized `FlowGraph`.
//!
//! Write-then-rename gives the same guarantee a transactional write
//! would: a reader must never observe a partially written cache entry.
//! There's no database here, so the filesystem's own rename atomicity
//! does that job directly.

use std::fs;
use std::io;
use std::path::Path;

use tgc_core::graph::FlowGraph;

/// Serializes `graph` to `<path>.tmp` via `bincode`, then renames it onto
/// `path`. The rename is atomic within a filesystem, so a concurrent
/// reader of `path` either sees the old contents or the complete new
/// ones, never a partial write.
pub fn write_graph(path: &Path, graph: &FlowGraph) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("bin.tmp");
    let bytes = bincode::serialize(graph).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    fs::write(&tmp_path, &bytes)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Deserializes the `FlowGraph` at `path`, if present.
pub fn read_graph(path: &Path) -> io::Result<FlowGraph> {
    let bytes = fs::read(path)?;
    bincode::deserialize(&bytes).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgc_core::graph::Device;
    use tgc_core::graph::Tensor;
    use tgc_core::ops;
    use tgc_core::DimExpr;
    use tgc_core::ScalarType;

    fn sample_graph() -> FlowGraph {
        let x = Tensor::graph_input(ScalarType::Float32, vec![DimExpr::Const(4), DimExpr::Const(4)], Device::Cpu);
        let op = ops::relu(x.clone());
        FlowGraph::trace(vec![x], vec![op.outputs[0].clone()]).unwrap()
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.bin");
        let graph = sample_graph();

        write_graph(&path, &graph).unwrap();
        let reread = read_graph(&path).unwrap();

        assert_eq!(graph.inputs.len(), reread.inputs.len());
        assert_eq!(graph.outputs.len(), reread.outputs.len());
    }

    #[test]
    fn write_does_not_leave_tmp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.bin");
        write_graph(&path, &sample_graph()).unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("bin.tmp").exists());
    }

    #[test]
    fn read_missing_path_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope").join("graph.bin");
        assert!(read_graph(&missing).is_err());
    }

    /// Simulates a writer that crashes after writing the tmp file but
    /// before the rename: `path` must never become visible with partial
    /// content, only ever old-or-new.
    #[test]
    fn interrupted_write_never_exposes_a_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.bin");

        // No prior entry: a crash before rename must leave `path` absent,
        // never a half-written file.
        let tmp_path = path.with_extension("bin.tmp");
        fs::write(&tmp_path, b"not a complete bincode payload").unwrap();
        assert!(read_graph(&path).is_err(), "path must not become readable before the rename happens");

        // A real write now completes the rename as normal.
        let first = sample_graph();
        write_graph(&path, &first).unwrap();
        let original_bytes = fs::read(&path).unwrap();

        // Simulate a second writer crashing mid-write: it writes its tmp
        // file but never renames. A reader of `path` must still see
        // exactly the old complete graph, not a mix of old and new bytes.
        fs::write(&tmp_path, b"garbage from an interrupted second writer").unwrap();
        let during_interrupted_write = read_graph(&path).unwrap();
        assert_eq!(fs::read(&path).unwrap(), original_bytes, "path's bytes must be untouched by the interrupted writer's tmp file");
        assert_eq!(during_interrupted_write.inputs.len(), first.inputs.len());
        assert_eq!(during_interrupted_write.outputs.len(), first.outputs.len());

        // Once that writer actually finishes (writes its real payload, then
        // renames), `path` flips atomically to the new content -- no
        // window where a reader could see a mix of old and new bytes.
        let second = sample_graph();
        write_graph(&path, &second).unwrap();
        let after_completed_write = read_graph(&path).unwrap();
        assert_eq!(after_completed_write.inputs.len(), second.inputs.len());
    }
}
