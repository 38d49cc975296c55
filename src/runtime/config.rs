//! # Run options.
//!
//! Centralized settings for one orchestrator invocation.
//!
//! ## Sentinel values
//! - `emission_depth = 0` → unlimited nesting (only the reentrancy
//!   guard applies)

/// Options for assembling a runtime.
///
/// ## Field semantics
/// - `dry_run`: perform every setup step except resource initialization
///   (structural validation without side effects)
/// - `emission_depth`: maximum nesting of emissions within one root
///   emission (`0` = unlimited)
///
/// ## Notes
/// All fields are public for flexibility. Prefer the helper accessors to
/// avoid sprinkling sentinel checks across the codebase.
#[derive(Clone, Debug)]
pub struct RunOptions {
    /// Skip the two initialization steps; cycles and missing
    /// dependencies still fail.
    pub dry_run: bool,

    /// Emission nesting limit within one root emission.
    ///
    /// - `0` = unlimited
    /// - `n > 0` = an emission at depth `n` fails with a depth error
    pub emission_depth: usize,
}

impl RunOptions {
    /// Returns the emission depth limit as an `Option`.
    ///
    /// - `None` → unlimited
    /// - `Some(n)` → nesting beyond `n` fails
    #[inline]
    pub fn emission_depth_limit(&self) -> Option<usize> {
        if self.emission_depth == 0 {
            None
        } else {
            Some(self.emission_depth)
        }
    }
}

impl Default for RunOptions {
    /// Default options:
    ///
    /// - `dry_run = false`
    /// - `emission_depth = 0` (unlimited; the reentrancy guard already
    ///   rejects cyclic chains)
    fn default() -> Self {
        Self {
            dry_run: false,
            emission_depth: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_sentinel() {
        let opts = RunOptions::default();
        assert_eq!(opts.emission_depth_limit(), None);

        let opts = RunOptions {
            emission_depth: 4,
            ..RunOptions::default()
        };
        assert_eq!(opts.emission_depth_limit(), Some(4));
    }
}
