/*!

The morph engine. A morph transforms a source value into one conforming to a target shape,
yielding the morphed value together with a [`MorphScore`], or a failure.

## Three-phase field binding

Binding runs as global passes over the shape's fields:

 1. **Named match.** A target field binds the unconsumed source field with the same name; the
    value must satisfy the field's constraint (recursively morphing for shape constraints).
 2. **Tag match.** A target field constrained to a tag or handle family binds the
    deepest-matching unconsumed source field of that family.
 3. **Positional match.** Remaining target fields consume the head of the source's unnamed
    fields in order. Fields constrained to tag/handle families do not bind positionally; phase
    2 was their positional mechanism.
 4. **Defaults.** Fields still unbound receive their declared default, evaluated lazily in the
    surrounding scope chain.

A failed constraint, a still-unbound required field, or an extra field the variant forbids
yields a failure. A released handle fails to match any handle-shape constraint, which is what
turns use-after-release into a dispatch-time failure.

## Scoring

`score = (named_matches, combined_depth, assignment_strength, positional_matches)`, compared
lexicographically. `combined_depth` sums the tag-hierarchy and handle-type depths of matched
fields; deeper is more specific.

*/

use crate::{
  api::{
    ast::{Cardinality, Expr},
    MorphKind,
    Strength,
  },
  core::{
    eval::Runtime,
    frame::{FrameId, FrameMode, FrameParent},
    shape::{RcShape, TypeConstraint},
    value::{Field, RcValue, Value},
  },
  trace,
};

/// Compared lexicographically, field order. Derived `Ord` does exactly that.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default)]
pub struct MorphScore {
  pub named_matches:      u32,
  pub combined_depth:     u32,
  pub strength:           Strength,
  pub positional_matches: u32,
}

#[derive(Debug)]
pub struct MorphOutcome {
  pub value: RcValue,
  pub score: MorphScore,
}

impl Runtime {
  /// Morphs `source` against `shape` under the given variant. `strength` is the defining
  /// function's assignment-strength marker, passed through into the score. Defaults and
  /// constraint predicates evaluate against `frame`.
  pub fn morph_value(
    &mut self,
    source: &RcValue,
    shape: &RcShape,
    kind: MorphKind,
    strength: Strength,
    frame: FrameId,
  ) -> Result<MorphOutcome, RcValue> {
    let promoted = Value::promote(source);
    let Some(src) = promoted.as_structure() else {
      // Promotion always yields a structure.
      return Err(self.builtins.kinds.shape_mismatch_value("morph source did not promote"));
    };
    let src_fields: Vec<Field> = src.fields().to_vec();

    let mut consumed = vec![false; src_fields.len()];
    let mut bound: Vec<Option<RcValue>> = vec![None; shape.fields.len()];
    let mut saw_released = vec![false; shape.fields.len()];
    let mut score = MorphScore { strength, ..MorphScore::default() };

    // Phase 1: named match.
    for (ti, target) in shape.fields.iter().enumerate() {
      let Some(target_name) = &target.name else { continue };
      let Some(si) = src_fields
          .iter()
          .position(|field| field.name.as_ref() == Some(target_name))
      else {
        continue;
      };
      if consumed[si] {
        continue;
      }

      let source_value = &src_fields[si].value;
      let binding = if target.presence_only {
        Some((source_value.clone(), 0))
      } else {
        match &target.constraint {
          None => Some((source_value.clone(), 0)),
          Some(constraint) => match self.constraint_match(constraint, source_value, kind, frame)? {
            Some(binding) => Some(binding),
            None => {
              return Err(self.builtins.kinds.shape_mismatch_value(&format!(
                "field {} does not satisfy {}",
                target_name, constraint
              )));
            }
          },
        }
      };

      if let Some((value, depth)) = binding {
        consumed[si] = true;
        bound[ti] = Some(value);
        score.named_matches += 1;
        score.combined_depth += depth;
      }
    }

    // Phase 2: tag/handle family match, deepest source wins.
    for (ti, target) in shape.fields.iter().enumerate() {
      if bound[ti].is_some() {
        continue;
      }
      let family = match &target.constraint {
        Some(constraint @ (TypeConstraint::Tag(_) | TypeConstraint::Handle(_))) => constraint,
        _ => continue,
      };

      let mut best: Option<(usize, u32)> = None;
      for (si, field) in src_fields.iter().enumerate() {
        if consumed[si] {
          continue;
        }
        let candidate_depth = match family {
          TypeConstraint::Tag(tag) => match field.value.as_tag() {
            Some(value_tag) if value_tag.descends_from(tag) => Some(value_tag.depth() as u32),
            _ => None,
          },
          TypeConstraint::Handle(def) => match field.value.as_handle() {
            Some(id) => {
              let instance = self.handles.get(id);
              if !instance.definition.same(def) {
                None
              } else if instance.released {
                saw_released[ti] = true;
                None
              } else {
                Some(def.depth())
              }
            }
            None => None,
          },
          _ => None,
        };
        if let Some(depth) = candidate_depth {
          if best.map(|(_, d)| depth > d).unwrap_or(true) {
            best = Some((si, depth));
          }
        }
      }

      if let Some((si, _)) = best {
        consumed[si] = true;
        bound[ti] = Some(src_fields[si].value.clone());
        score.combined_depth += family.depth();
      }
    }

    // Phase 3: positional. Remaining fields consume the head of the unnamed source fields.
    let mut cursor = 0usize;
    for (ti, target) in shape.fields.iter().enumerate() {
      if bound[ti].is_some() {
        continue;
      }
      if matches!(
        target.constraint,
        Some(TypeConstraint::Tag(_)) | Some(TypeConstraint::Handle(_))
      ) {
        continue;
      }

      match target.cardinality {
        Cardinality::One => {
          let Some(si) = next_unnamed(&src_fields, &consumed, &mut cursor) else {
            continue;
          };
          let source_value = &src_fields[si].value;
          let binding = match &target.constraint {
            None => (source_value.clone(), 0),
            Some(constraint) => match self.constraint_match(constraint, source_value, kind, frame)? {
              Some(binding) => binding,
              None => {
                return Err(self.builtins.kinds.shape_mismatch_value(&format!(
                  "positional field does not satisfy {}",
                  constraint
                )));
              }
            },
          };
          consumed[si] = true;
          bound[ti] = Some(binding.0);
          score.positional_matches += 1;
          score.combined_depth += binding.1;
        }

        Cardinality::ZeroOrMore | Cardinality::OneOrMore => {
          let mut collected = Vec::new();
          while let Some(si) = next_unnamed(&src_fields, &consumed, &mut cursor) {
            let source_value = &src_fields[si].value;
            let value = match &target.constraint {
              None => source_value.clone(),
              Some(constraint) => match self.constraint_match(constraint, source_value, kind, frame)? {
                Some((value, depth)) => {
                  score.combined_depth += depth;
                  value
                }
                None => {
                  return Err(self.builtins.kinds.shape_mismatch_value(&format!(
                    "collected field does not satisfy {}",
                    constraint
                  )));
                }
              },
            };
            consumed[si] = true;
            collected.push(Field::unnamed(value));
          }

          if collected.is_empty() && target.cardinality == Cardinality::OneOrMore {
            continue; // required; resolved by default or reported missing below
          }
          score.positional_matches += collected.len() as u32;
          bound[ti] = Some(Value::structure(collected));
        }
      }
    }

    // Phase 4: defaults and missing fields.
    for (ti, target) in shape.fields.iter().enumerate() {
      if bound[ti].is_some() {
        continue;
      }
      if let Some(default) = &target.default {
        if kind.applies_defaults() {
          let value = self.eval_expr(default, frame);
          if value.is_failure() && !self.frames.get(frame).is_disarmed() {
            return Err(value);
          }
          bound[ti] = Some(value);
          continue;
        }
      }
      if kind.tolerates_missing() {
        continue;
      }
      return Err(if saw_released[ti] {
        self
            .builtins
            .kinds
            .released_handle_value("the only candidate for a handle field was released")
      } else {
        self
            .builtins
            .kinds
            .missing_field_value(&format!("no binding for field {}", target))
      });
    }

    // Constraint predicates run after type binding.
    for (ti, target) in shape.fields.iter().enumerate() {
      let Some(value) = &bound[ti] else { continue };
      let value = value.clone();
      for check in target.checks.clone() {
        if !self.eval_predicate(&check, &value, frame)? {
          return Err(self.builtins.kinds.shape_mismatch_value(&format!(
            "constraint predicate rejected field {}",
            target
          )));
        }
      }
    }

    // Extras.
    let allow_extras = kind.allows_extras() || shape.accept_extras;
    let mut fields = Vec::with_capacity(shape.fields.len());
    for (ti, target) in shape.fields.iter().enumerate() {
      if let Some(value) = bound[ti].take() {
        fields.push(Field { name: target.name.clone(), value });
      }
    }
    for (si, field) in src_fields.iter().enumerate() {
      if consumed[si] {
        continue;
      }
      if !allow_extras {
        return Err(self.builtins.kinds.shape_mismatch_value(&format!(
          "extra field {} not accepted by {}",
          field, shape
        )));
      }
      fields.push(field.clone());
    }

    trace!(3, "morphed {} against {} with score {:?}", promoted, shape, score);
    Ok(MorphOutcome { value: Value::structure(fields), score })
  }

  /// Checks `value` against a single constraint. `Ok(Some((bound, depth)))` on success,
  /// `Ok(None)` on a plain type mismatch, `Err` on a definite failure (released handle, failing
  /// recursive default).
  fn constraint_match(
    &mut self,
    constraint: &TypeConstraint,
    value: &RcValue,
    kind: MorphKind,
    frame: FrameId,
  ) -> Result<Option<(RcValue, u32)>, RcValue> {
    let outcome = match constraint {
      TypeConstraint::Any => Some((value.clone(), 0)),

      TypeConstraint::Number => match &**value {
        Value::Number(_) => Some((value.clone(), 0)),
        _ => None,
      },

      TypeConstraint::String => match &**value {
        Value::String(_) => Some((value.clone(), 0)),
        _ => None,
      },

      TypeConstraint::Boolean => match value.as_boolean() {
        Some(_) => Some((value.clone(), 0)),
        None => None,
      },

      TypeConstraint::BlockValue => match &**value {
        Value::Block(_) => Some((value.clone(), 0)),
        _ => None,
      },

      TypeConstraint::FunctionValue => match &**value {
        Value::Function(_) => Some((value.clone(), 0)),
        _ => None,
      },

      TypeConstraint::Tag(tag) => match value.as_tag() {
        Some(value_tag) if value_tag.descends_from(tag) => {
          Some((value.clone(), constraint.depth()))
        }
        _ => None,
      },

      TypeConstraint::Handle(def) => match value.as_handle() {
        Some(id) => {
          let instance = self.handles.get(id);
          if !instance.definition.same(def) {
            None
          } else if instance.released {
            return Err(
              self
                  .builtins
                  .kinds
                  .released_handle_value("morph against a released handle"),
            );
          } else {
            Some((value.clone(), constraint.depth()))
          }
        }
        None => None,
      },

      TypeConstraint::Shape(shape) => {
        match self.morph_value(value, &shape.clone(), kind, Strength::Normal, frame) {
          Ok(outcome) => Some((outcome.value, 0)),
          Err(_) => None,
        }
      }
    };
    Ok(outcome)
  }

  /// Evaluates one constraint predicate against a bound value, inside a pure child frame. The
  /// predicate expression may be (or evaluate to) a block or a function reference; either is
  /// applied to the value as its input.
  fn eval_predicate(&mut self, check: &Expr, value: &RcValue, frame: FrameId) -> Result<bool, RcValue> {
    let module = self.frames.get(frame).module;
    let modes = self.frames.get(frame).modes | FrameMode::Pure;
    let pure_frame = self.push_frame(FrameParent::Frame(frame), module, modes, value.clone());

    let evaluated = self.eval_expr(check, pure_frame);
    let outcome = match &*evaluated {
      Value::Block(block) => {
        let block = block.clone();
        self.invoke_block(&block, value.clone(), pure_frame)
      }
      Value::Function(function) => {
        let (module, name) = (function.module, function.name.clone());
        self.dispatch_named(pure_frame, Some(module), &name, value.clone(), Value::empty_structure())
      }
      _ => evaluated,
    };
    self.pop_frame(pure_frame);

    if outcome.is_failure() {
      return Err(outcome);
    }
    outcome.as_boolean().ok_or_else(|| {
      self
          .builtins
          .kinds
          .shape_mismatch_value("constraint predicate must produce a boolean")
    })
  }
}

fn next_unnamed(fields: &[Field], consumed: &[bool], cursor: &mut usize) -> Option<usize> {
  while *cursor < fields.len() {
    let index = *cursor;
    *cursor += 1;
    if fields[index].name.is_none() && !consumed[index] {
      return Some(index);
    }
  }
  None
}


#[cfg(test)]
mod tests {
  use std::rc::Rc;

  use super::*;
  use crate::{
    abstractions::IString,
    api::ast::Literal,
    core::{
      handle::HandleDef,
      module::ModuleId,
      shape::{RcShape, ShapeDef, ShapeField},
      tag::{RcTag, TagDef},
    },
  };

  fn field(name: Option<&str>, constraint: Option<TypeConstraint>, default: Option<Expr>) -> ShapeField {
    ShapeField {
      name:          name.map(IString::from),
      constraint,
      default:       default.map(Rc::new),
      presence_only: false,
      checks:        Vec::new(),
      cardinality:   Cardinality::One,
    }
  }

  fn shape_of(fields: Vec<ShapeField>, accept_extras: bool) -> RcShape {
    Rc::new(ShapeDef { name: None, fields, accept_extras, module: ModuleId(0), private: false })
  }

  fn lit_str(s: &str) -> Expr {
    Expr::Literal(Literal::String(IString::from(s)))
  }

  fn lit_num(n: f64) -> Expr {
    Expr::Literal(Literal::Number(n))
  }

  fn lit_bool(b: bool) -> Expr {
    Expr::Literal(Literal::Boolean(b))
  }

  /// The shape from the server-config scenario: three named, constrained, defaulted fields.
  fn config_shape() -> RcShape {
    shape_of(
      vec![
        field(Some("host"), Some(TypeConstraint::String), Some(lit_str("localhost"))),
        field(Some("port"), Some(TypeConstraint::Number), Some(lit_num(8080.0))),
        field(Some("debug"), Some(TypeConstraint::Boolean), Some(lit_bool(false))),
      ],
      false,
    )
  }

  fn config_source() -> RcValue {
    Value::structure(vec![
      Field::unnamed(Value::string("192.168.1.1")),
      Field::named("debug", Value::boolean(true)),
      Field::named("extra", Value::string("x")),
    ])
  }

  fn failure_kind(failure: &RcValue) -> RcTag {
    failure
        .as_structure()
        .unwrap()
        .unnamed_at(0)
        .unwrap()
        .as_tag()
        .unwrap()
        .clone()
  }

  #[test]
  fn three_phase_binding_normal_variant() {
    let mut runtime = Runtime::new();
    let frame = runtime.root_frame;

    let outcome = runtime
        .morph_value(&config_source(), &config_shape(), MorphKind::Normal, Strength::Normal, frame)
        .unwrap();

    let expected = Value::structure(vec![
      Field::named("host", Value::string("192.168.1.1")),
      Field::named("port", Value::number(8080.0)),
      Field::named("debug", Value::boolean(true)),
      Field::named("extra", Value::string("x")),
    ]);
    assert_eq!(outcome.value, expected);
    assert_eq!(outcome.score.named_matches, 1);
    assert_eq!(outcome.score.positional_matches, 1);
  }

  #[test]
  fn strong_variant_rejects_extras() {
    let mut runtime = Runtime::new();
    let frame = runtime.root_frame;

    let failure = runtime
        .morph_value(&config_source(), &config_shape(), MorphKind::Strong, Strength::Normal, frame)
        .unwrap_err();
    assert!(failure.is_failure());
    assert!(failure_kind(&failure).same(&runtime.builtins.kinds.shape_mismatch));
  }

  #[test]
  fn morph_is_idempotent_for_normal_and_strong() {
    let mut runtime = Runtime::new();
    let frame = runtime.root_frame;
    let shape = config_shape();

    let once = runtime
        .morph_value(&config_source(), &shape, MorphKind::Normal, Strength::Normal, frame)
        .unwrap();
    let twice = runtime
        .morph_value(&once.value, &shape, MorphKind::Normal, Strength::Normal, frame)
        .unwrap();
    assert_eq!(once.value, twice.value);

    // Strong idempotence, on a source with no extras.
    let source = Value::structure(vec![Field::unnamed(Value::string("h"))]);
    let once = runtime
        .morph_value(&source, &shape, MorphKind::Strong, Strength::Normal, frame)
        .unwrap();
    let twice = runtime
        .morph_value(&once.value, &shape, MorphKind::Strong, Strength::Normal, frame)
        .unwrap();
    assert_eq!(once.value, twice.value);
  }

  #[test]
  fn weak_variant_skips_defaults_and_tolerates_missing() {
    let mut runtime = Runtime::new();
    let frame = runtime.root_frame;

    let source = Value::structure(vec![Field::unnamed(Value::string("10.0.0.1"))]);
    let outcome = runtime
        .morph_value(&source, &config_shape(), MorphKind::Weak, Strength::Normal, frame)
        .unwrap();

    let expected = Value::structure(vec![Field::named("host", Value::string("10.0.0.1"))]);
    assert_eq!(outcome.value, expected);
  }

  #[test]
  fn unbound_required_field_is_missing_field() {
    let mut runtime = Runtime::new();
    let frame = runtime.root_frame;

    let shape = shape_of(vec![field(Some("name"), Some(TypeConstraint::String), None)], false);
    let failure = runtime
        .morph_value(&Value::empty_structure(), &shape, MorphKind::Normal, Strength::Normal, frame)
        .unwrap_err();
    assert!(failure_kind(&failure).same(&runtime.builtins.kinds.missing_field));
  }

  #[test]
  fn named_field_with_wrong_type_is_shape_mismatch() {
    let mut runtime = Runtime::new();
    let frame = runtime.root_frame;

    let source = Value::structure(vec![Field::named("debug", Value::string("yes"))]);
    let failure = runtime
        .morph_value(&source, &config_shape(), MorphKind::Normal, Strength::Normal, frame)
        .unwrap_err();
    assert!(failure_kind(&failure).same(&runtime.builtins.kinds.shape_mismatch));
  }

  #[test]
  fn tag_phase_binds_the_deepest_match() {
    let mut runtime = Runtime::new();
    let frame = runtime.root_frame;

    let animal = TagDef::root("animal", 500, ModuleId(0), false);
    let dog = TagDef::child(&animal, "dog", 501, ModuleId(0), false);

    let shape = shape_of(vec![field(Some("pet"), Some(TypeConstraint::Tag(animal.clone())), None)], false);
    let source = Value::structure(vec![
      Field::unnamed(Value::tag(animal.clone())),
      Field::unnamed(Value::tag(dog.clone())),
    ]);

    let outcome = runtime
        .morph_value(&source, &shape, MorphKind::Normal, Strength::Normal, frame)
        .unwrap();
    let expected = Value::structure(vec![
      Field::named("pet", Value::tag(dog)),
      Field::unnamed(Value::tag(animal)),
    ]);
    assert_eq!(outcome.value, expected);
    assert_eq!(outcome.score.combined_depth, 1); // animal constraint sits at the root
  }

  #[test]
  fn released_handles_fail_handle_constraints() {
    let mut runtime = Runtime::new();
    let frame = runtime.root_frame;

    let def = Rc::new(HandleDef::new("res", 600, ModuleId(0), false));
    let handle = runtime.acquire_handle(frame, &def, Box::new(7u32));
    let source = Value::structure(vec![Field::named("self", handle.clone())]);
    let shape = shape_of(vec![field(Some("self"), Some(TypeConstraint::Handle(def.clone())), None)], false);

    let outcome = runtime
        .morph_value(&source, &shape, MorphKind::Normal, Strength::Normal, frame)
        .unwrap();
    assert_eq!(outcome.score.named_matches, 1);
    assert_eq!(outcome.score.combined_depth, 1);

    runtime.release_handle(frame, &handle);
    let failure = runtime
        .morph_value(&source, &shape, MorphKind::Normal, Strength::Normal, frame)
        .unwrap_err();
    assert!(failure_kind(&failure).same(&runtime.builtins.kinds.released_handle));
  }

  #[test]
  fn array_fields_collect_remaining_unnamed_sources() {
    let mut runtime = Runtime::new();
    let frame = runtime.root_frame;

    let mut items = field(Some("items"), None, None);
    items.cardinality = Cardinality::ZeroOrMore;
    let shape = shape_of(vec![items], false);

    let source = Value::structure(vec![
      Field::unnamed(Value::number(1.0)),
      Field::unnamed(Value::number(2.0)),
      Field::unnamed(Value::number(3.0)),
    ]);
    let outcome = runtime
        .morph_value(&source, &shape, MorphKind::Normal, Strength::Normal, frame)
        .unwrap();

    let expected = Value::structure(vec![Field::named(
      "items",
      Value::structure(vec![
        Field::unnamed(Value::number(1.0)),
        Field::unnamed(Value::number(2.0)),
        Field::unnamed(Value::number(3.0)),
      ]),
    )]);
    assert_eq!(outcome.value, expected);
    assert_eq!(outcome.score.positional_matches, 3);
  }

  #[test]
  fn constraint_predicates_run_after_binding() {
    let mut runtime = Runtime::new();
    let frame = runtime.root_frame;

    let mut accepted = field(Some("n"), Some(TypeConstraint::Number), None);
    accepted.checks = vec![Rc::new(lit_bool(true))];
    let shape = shape_of(vec![accepted], false);
    let source = Value::structure(vec![Field::named("n", Value::number(3.0))]);
    assert!(runtime
        .morph_value(&source, &shape, MorphKind::Normal, Strength::Normal, frame)
        .is_ok());

    let mut rejected = field(Some("n"), Some(TypeConstraint::Number), None);
    rejected.checks = vec![Rc::new(lit_bool(false))];
    let shape = shape_of(vec![rejected], false);
    let failure = runtime
        .morph_value(&source, &shape, MorphKind::Normal, Strength::Normal, frame)
        .unwrap_err();
    assert!(failure_kind(&failure).same(&runtime.builtins.kinds.shape_mismatch));
  }

  #[test]
  fn scores_compare_lexicographically() {
    let base = MorphScore::default();
    let named = MorphScore { named_matches: 1, ..base };
    let deep = MorphScore { combined_depth: 9, ..base };
    let strong = MorphScore { strength: Strength::Strong, ..base };
    let positional = MorphScore { positional_matches: 4, ..base };

    assert!(named > deep);
    assert!(deep > strong);
    assert!(strong > positional);
    assert!(positional > base);
  }
}
