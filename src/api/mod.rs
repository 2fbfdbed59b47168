/*!

The public API of the library: the AST contract the parser feeds the evaluator, the native
function bridge, and the small marker types both sides share.

*/

pub mod ast;
pub mod native;

use std::fmt::{Display, Formatter};

/// The strength marker carried by assignments, spreads, and function definitions. Strength
/// decides what happens when a binding collides with an existing one, and it participates in
/// morph scoring (weak < normal < strong).
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Default)]
pub enum Strength {
  Weak,
  #[default]
  Normal,
  Strong,
}

impl Display for Strength {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      Strength::Weak   => write!(f, "weak"),
      Strength::Normal => write!(f, "normal"),
      Strength::Strong => write!(f, "strong"),
    }
  }
}

/// The four morph variants. The surface spelling of the morph operators is the parser's concern;
/// the evaluator consumes this enum.
///
/// | Variant      | Extras allowed? | Missing fields tolerated? | Applies defaults? |
/// |--------------|-----------------|---------------------------|-------------------|
/// | Normal       | yes (preserved) | no                        | yes               |
/// | Strong       | no              | no                        | yes               |
/// | Weak         | yes             | yes                       | no                |
/// | AcceptExtras | yes (preserved) | no                        | yes               |
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Default)]
pub enum MorphKind {
  #[default]
  Normal,
  Strong,
  Weak,
  AcceptExtras,
}

impl MorphKind {
  #[inline(always)]
  pub fn allows_extras(&self) -> bool {
    !matches!(self, MorphKind::Strong)
  }

  #[inline(always)]
  pub fn tolerates_missing(&self) -> bool {
    matches!(self, MorphKind::Weak)
  }

  #[inline(always)]
  pub fn applies_defaults(&self) -> bool {
    !matches!(self, MorphKind::Weak)
  }
}

impl Display for MorphKind {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      MorphKind::Normal       => write!(f, "~"),
      MorphKind::Strong       => write!(f, "~!"),
      MorphKind::Weak         => write!(f, "~?"),
      MorphKind::AcceptExtras => write!(f, "~**"),
    }
  }
}

/// The scopes an identifier can be qualified with. The spelling of the scope prefixes is the
/// parser's concern.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum ScopeKind {
  /// The value flowing into the current pipeline statement.
  Input,
  /// Function-local bindings, once-assigned.
  Variable,
  /// The current function's morphed arguments.
  Argument,
  /// Flows across the call stack.
  Context,
  /// Per-module state, evaluated once at load.
  Module,
  /// The output structure the current function body is building.
  Pipe,
}

impl Display for ScopeKind {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      ScopeKind::Input    => write!(f, "input"),
      ScopeKind::Variable => write!(f, "var"),
      ScopeKind::Argument => write!(f, "arg"),
      ScopeKind::Context  => write!(f, "ctx"),
      ScopeKind::Module   => write!(f, "mod"),
      ScopeKind::Pipe     => write!(f, "pipe"),
    }
  }
}
