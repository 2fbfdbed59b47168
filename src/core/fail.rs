/*!

The built-in failure kinds and the `#fail` hierarchy. A failure is an ordinary structure whose
unnamed fields include a `#fail`-descended tag; these constructors build the canonical form: the
kind tag in an unnamed field, details in named fields (where they cannot re-trip propagation).

The `implement_fail_kinds!` macro declares one tag field plus one `<kind>_value` constructor per
kind. User code signals its own kinds through the `user` tag with a named `kind` field rather
than by minting tags at runtime; the tag forest is immutable once a module has loaded.

*/

use std::rc::Rc;

use paste::paste;

use crate::{
  abstractions::IString,
  core::{
    module::ModuleId,
    shape::{RcShape, ShapeDef},
    tag::{RcTag, TagDef},
    value::{Field, RcValue, Value},
  },
};

/// The canonical failure structure for `kind`: the tag unnamed, the message named.
pub fn failure_value(kind: &RcTag, message: &str) -> RcValue {
  Value::structure(vec![
    Field::unnamed(Value::tag(kind.clone())),
    Field::named("message", Value::string(message)),
  ])
}

fn bump(serial: &mut u32) -> u32 {
  let current = *serial;
  *serial += 1;
  current
}

macro_rules! implement_fail_kinds {
  ($( $name:ident => $segment:literal ),+ $(,)?) => {
    paste! {
      /// The `#fail` root and its built-in children.
      pub struct FailKinds {
        pub fail: RcTag,
        /// Parent of user-produced kinds (`user-*`).
        pub user: RcTag,
        $( pub $name: RcTag, )+
      }

      impl FailKinds {
        pub(crate) fn install(module: ModuleId, serial: &mut u32) -> FailKinds {
          let fail = TagDef::fail_root(bump(serial), module);
          $( let $name = TagDef::child(&fail, $segment, bump(serial), module, false); )+
          let user = TagDef::child(&fail, "user", bump(serial), module, false);
          FailKinds { fail, user, $( $name ),+ }
        }

        $(
          #[doc = concat!("A `", $segment, "` failure carrying `message`.")]
          pub fn [<$name _value>](&self, message: &str) -> RcValue {
            failure_value(&self.$name, message)
          }
        )+
      }
    }
  };
}

implement_fail_kinds! {
  dispatch_failure => "dispatch-failure",
  shape_mismatch   => "shape-mismatch",
  missing_field    => "missing-field",
  purity_violation => "purity-violation",
  released_handle  => "released-handle",
  not_implemented  => "not-implemented",
  cancellation     => "cancellation",
  rebound_variable => "rebound-variable",
  module_load      => "module-load",
}

impl FailKinds {
  /// A `user-*` failure: the `user` tag unnamed, the specific kind and message named.
  pub fn user_value(&self, kind: &str, message: &str) -> RcValue {
    Value::structure(vec![
      Field::unnamed(Value::tag(self.user.clone())),
      Field::named("kind", Value::string(kind)),
      Field::named("message", Value::string(message)),
    ])
  }
}


/// Everything the built-in module contributes: the failure kinds, the boolean tags, and the
/// `any` shape.
pub struct Builtins {
  pub module:    ModuleId,
  pub kinds:     FailKinds,
  pub true_tag:  RcTag,
  pub false_tag: RcTag,
  pub any_shape: RcShape,
}

impl Builtins {
  pub(crate) fn install(module: ModuleId, serial: &mut u32) -> Builtins {
    let kinds = FailKinds::install(module, serial);

    let true_tag = TagDef::root("true", bump(serial), module, false);
    true_tag
        .set_value(Value::boolean(true))
        .expect("fresh builtin tag already had a value");
    let false_tag = TagDef::root("false", bump(serial), module, false);
    false_tag
        .set_value(Value::boolean(false))
        .expect("fresh builtin tag already had a value");

    let any_shape = Rc::new(ShapeDef::accept_anything(Some(IString::from("any")), module));

    Builtins {
      module,
      kinds,
      true_tag,
      false_tag,
      any_shape,
    }
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  fn sample_kinds() -> FailKinds {
    let mut serial = 0;
    FailKinds::install(ModuleId(0), &mut serial)
  }

  #[test]
  fn built_in_kinds_descend_from_fail() {
    let kinds = sample_kinds();
    for kind in [
      &kinds.dispatch_failure,
      &kinds.shape_mismatch,
      &kinds.missing_field,
      &kinds.purity_violation,
      &kinds.released_handle,
      &kinds.not_implemented,
      &kinds.cancellation,
      &kinds.rebound_variable,
      &kinds.module_load,
      &kinds.user,
    ] {
      assert!(kind.is_fail_kind());
      assert!(kind.descends_from(&kinds.fail));
    }
  }

  #[test]
  fn constructors_build_failures_with_named_details() {
    let kinds = sample_kinds();
    let failure = kinds.missing_field_value("no such field: port");

    assert!(failure.is_failure());
    let s = failure.as_structure().unwrap();
    assert_eq!(
      s.named(&IString::from("message")),
      Some(&Value::string("no such field: port"))
    );
  }

  #[test]
  fn user_failures_carry_their_kind_in_a_named_field() {
    let kinds = sample_kinds();
    let failure = kinds.user_value("io", "disk full");

    assert!(failure.is_failure());
    let s = failure.as_structure().unwrap();
    assert_eq!(s.named(&IString::from("kind")), Some(&Value::string("io")));
    assert!(s.unnamed_at(0).unwrap().as_tag().unwrap().same(&kinds.user));
  }

  #[test]
  fn boolean_tags_carry_boolean_values() {
    let mut serial = 0;
    let builtins = Builtins::install(ModuleId(0), &mut serial);
    assert_eq!(builtins.true_tag.value(), Some(Value::boolean(true)));
    assert_eq!(builtins.false_tag.value(), Some(Value::boolean(false)));
    assert!(!builtins.true_tag.is_fail_kind());
  }
}
