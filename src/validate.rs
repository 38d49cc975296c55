//! # Validator contract (parse-or-throw).
//!
//! The runtime does not ship a validation library; it defines the contract
//! an adapter must satisfy: [`Validator::parse`] returns the (possibly
//! transformed) value, or an error message. Any schema library can be
//! plugged in through a thin adapter, and closures satisfy the contract
//! directly.

use crate::dynamic::Dynamic;

/// Parse-or-throw validation contract.
///
/// Input validators run immediately before a body; result validators run
/// immediately after the innermost body resolves, inside all middleware.
/// A rejected value aborts only the specific call, reported as a
/// validation error carrying the originating definition's id.
pub trait Validator: Send + Sync {
    /// Validates `value`, returning it (possibly transformed) or an error
    /// message describing the rejection.
    fn parse(&self, value: Dynamic) -> Result<Dynamic, String>;
}

impl<F> Validator for F
where
    F: Fn(Dynamic) -> Result<Dynamic, String> + Send + Sync,
{
    fn parse(&self, value: Dynamic) -> Result<Dynamic, String> {
        self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamic::{downcast_ref, dynamic};

    #[test]
    fn test_closure_satisfies_contract() {
        let non_empty = |value: Dynamic| -> Result<Dynamic, String> {
            match downcast_ref::<String>(&value) {
                Some(s) if !s.is_empty() => Ok(value),
                Some(_) => Err("empty string".into()),
                None => Err("expected a string".into()),
            }
        };

        assert!(non_empty.parse(dynamic(String::from("ok"))).is_ok());
        assert_eq!(
            non_empty.parse(dynamic(String::new())).unwrap_err(),
            "empty string"
        );
        assert!(non_empty.parse(dynamic(42_u32)).is_err());
    }

    #[test]
    fn test_validator_may_transform() {
        let trim = |value: Dynamic| -> Result<Dynamic, String> {
            match downcast_ref::<String>(&value) {
                Some(s) => Ok(dynamic(s.trim().to_string())),
                None => Err("expected a string".into()),
            }
        };
        let out = trim.parse(dynamic(String::from("  x  "))).unwrap();
        assert_eq!(downcast_ref::<String>(&out).unwrap(), "x");
    }
}
