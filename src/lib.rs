#![allow(dead_code)]
/*!

The runtime core of **Comp**, a structure-oriented language. The crate consumes a pre-built AST
(see [`api::ast`]) and evaluates it: immutable structural values, hierarchical tags, shape
morphing with scored overload dispatch, pipelines with failure propagation and fallback, and
frame-scoped handles to external resources with guaranteed cleanup.

Tokenization/parsing, standard-library function bodies, and CLI plumbing live outside this
crate; they meet the core at [`api::ast::ModuleAst`] and [`api::native::NativeFunction`].

*/

pub mod api;
pub mod abstractions;
mod core;

// We re-export abstractions that are meant to be used publicly.
pub use abstractions::{
  log,
  IString
};

pub use api::{MorphKind, ScopeKind, Strength};
pub use crate::core::{
  eval::Runtime,
  fail::{failure_value, Builtins, FailKinds},
  frame::{FrameId, FrameMode, FrameModes},
  handle::{CleanupFn, HandleId, RcHandleDef},
  module::{LoadError, ModuleId, ModuleStatus},
  morph::{MorphOutcome, MorphScore},
  shape::{RcShape, ShapeDef, ShapeField, TypeConstraint},
  tag::{RcTag, TagDef, TagExtension, TagView},
  value::{BlockBody, BlockValue, Field, FunctionRef, RcValue, Structure, Value},
};

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn runtime_boots_with_builtins() {
    let mut runtime = Runtime::new();
    let fail = runtime.tag_by_path(ModuleId(0), "fail").unwrap();
    assert!(fail.is_fail_kind());

    let mismatch = runtime.tag_by_path(ModuleId(0), "fail.shape-mismatch").unwrap();
    assert!(mismatch.descends_from(&fail));
    assert_eq!(
      runtime.tag_by_path(ModuleId(0), "true").unwrap().value(),
      Some(Value::boolean(true))
    );
  }
}
