//! `PassContext`: the configuration threaded explicitly through every
//! graph-level and lowering pass. Deliberately not a thread-local or
//! module-level singleton -- every pass function takes `&PassContext`
//! as an ordinary argument, so two graphs can be optimized concurrently
//! under different configurations without cross-talk.

use crate::error::PassError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    F16,
    BF16,
    F32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReducePrecision {
    F16,
    F32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmaKind {
    Simt,
    Wmma,
    Mma,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParallelK {
    Disabled,
    Default,
    /// No search strategy is implemented (autotuning is a non-goal); this
    /// is carried as an opaque token that passes forward unexamined.
    Search,
    Fixed(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassContext {
    pub precision: Precision,
    pub reduce_precision: ReducePrecision,
    pub mma: MmaKind,
    pub parallel_k: ParallelK,
    pub space_level: u8,
    pub verbose: bool,
}

impl PassContext {
    pub fn new(
        precision: Precision,
        reduce_precision: ReducePrecision,
        mma: MmaKind,
        parallel_k: ParallelK,
        space_level: u8,
        verbose: bool,
    ) -> Result<Self, PassError> {
        if space_level > 2 {
            return Err(PassError::InvalidContext {
                reason: format!("space_level must be 0, 1, or 2, got {space_level}"),
            });
        }
        Ok(PassContext { precision, reduce_precision, mma, parallel_k, space_level, verbose })
    }
}

impl Default for PassContext {
    fn default() -> Self {
        PassContext {
            precision: Precision::F32,
            reduce_precision: ReducePrecision::F32,
            mma: MmaKind::Simt,
            parallel_k: ParallelK::Default,
            space_level: 0,
            verbose: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_space_level() {
        let result = PassContext::new(Precision::F32, ReducePrecision::F32, MmaKind::Simt, ParallelK::Default, 3, false);
        assert!(result.is_err());
    }

    #[test]
    fn default_matches_conservative_settings() {
        let ctx = PassContext::default();
        assert_eq!(ctx.space_level, 0);
        assert_eq!(ctx.parallel_k, ParallelK::Default);
    }
}
