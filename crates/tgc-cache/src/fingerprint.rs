//! Build-config fingerprinting and the on-disk graph cache layout.
//!
//! The path shape (`tgc_graph/<model>/bs_<N>_<fp>/graph.bin`) and the
//! legible-prefix-plus-hash-suffix fingerprint format keep cache
//! directory names readable while still being collision-resistant.

use std::path::{Path, PathBuf};

use tgc_passes::{MmaKind, ParallelK, Precision, ReducePrecision};

fn precision_tag(precision: Precision) -> &'static str {
    match precision {
        Precision::F16 => "f16",
        Precision::BF16 => "bf16",
        Precision::F32 => "f32",
    }
}

fn reduce_precision_tag(reduce_precision: ReducePrecision) -> &'static str {
    match reduce_precision {
        ReducePrecision::F16 => "f16",
        ReducePrecision::F32 => "f32",
    }
}

fn mma_tag(mma: MmaKind) -> &'static str {
    match mma {
        MmaKind::Simt => "simt",
        MmaKind::Wmma => "wmma",
        MmaKind::Mma => "mma",
    }
}

fn parallel_k_tag(parallel_k: ParallelK) -> String {
    match parallel_k {
        ParallelK::Disabled => "pk-off".to_string(),
        ParallelK::Default => "pk-default".to_string(),
        ParallelK::Search => "pk-search".to_string(),
        ParallelK::Fixed(n) => format!("pk{n}"),
    }
}

/// Builds a deterministic, legible fingerprint for a build configuration:
/// each field rendered as a short tag, joined with `_`, plus a trailing
/// 16-hex-char `blake3` hash of the same tuple for uniqueness under tag
/// collisions (e.g. two `ParallelK::Fixed` values that happened to
/// stringify the same way wouldn't, but this guards the general case).
pub fn fingerprint(
    model_name: &str,
    batch_size: u32,
    precision: Precision,
    reduce_precision: ReducePrecision,
    mma: MmaKind,
    parallel_k: ParallelK,
    space_level: u8,
) -> String {
    let tag = format!(
        "{model_name}_bs{batch_size}_{}_{}_{}_{}_sl{space_level}",
        precision_tag(precision),
        reduce_precision_tag(reduce_precision),
        mma_tag(mma),
        parallel_k_tag(parallel_k),
    );

    let mut hasher = blake3::Hasher::new();
    hasher.update(tag.as_bytes());
    let digest = hasher.finalize().to_hex();

    format!("{tag}_{}", &digest.as_str()[..16])
}

/// `<cache_root>/tgc_graph/<model>/bs_<batch_size>_<fp>/graph.bin`.
pub fn cache_path(cache_root: &Path, model: &str, batch_size: u32, fp: &str) -> PathBuf {
    cache_root.join("tgc_graph").join(model).join(format!("bs_{batch_size}_{fp}")).join("graph.bin")
}
