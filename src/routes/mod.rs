/// Router Module Index
///
/// Routes are grouped by the Permission Gate they sit behind. Access control is attached at
/// the module level as a route layer, so a handler cannot be exposed without its gate.

/// Routes accessible to anyone, identified or not.
pub mod public;

/// Routes behind `[IsAuthenticated]`.
pub mod authenticated;

/// Routes behind `[IsAuthenticated, IsAdmin]`.
pub mod admin;
