//! Function-name resolution against a driver's capabilities

use crate::core::CapabilityDescriptor;

/// A function reference matched to a driver operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFunction<'a> {
    pub operation: &'a str,

    /// Arguments typed after the operation name, e.g. `1550` in
    /// `run_set_wavelength 1550`
    pub inline_args: Vec<String>,
}

/// Match `entered` against the descriptor's operations.
///
/// Candidates are tried longest first, so `measure_vpp` is never shadowed by
/// `measure`. A candidate matches when it is a prefix of the entered text; the
/// remainder is split into inline arguments.
pub fn resolve_function<'a>(
    descriptor: &'a CapabilityDescriptor,
    entered: &str,
) -> Option<ResolvedFunction<'a>> {
    let entered = entered.trim();
    if entered.is_empty() {
        return None;
    }

    descriptor
        .operations_by_length()
        .into_iter()
        .find_map(|candidate| {
            let rest = entered.strip_prefix(candidate)?;
            Some(ResolvedFunction {
                operation: candidate,
                inline_args: split_inline_args(rest),
            })
        })
}

fn split_inline_args(rest: &str) -> Vec<String> {
    let rest = rest.trim().trim_start_matches(',').trim_start();
    let rest = rest
        .strip_prefix('(')
        .and_then(|r| r.strip_suffix(')'))
        .unwrap_or(rest);
    rest.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}
