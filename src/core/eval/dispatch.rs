/*!

Overload selection and invocation. A call resolves to a family of candidate overloads; every
candidate that morphs both the input and the arguments stays in the running, and the
lexicographically greatest `(input_score, args_score)` pair wins. Input specificity therefore
dominates argument specificity, strength sits inside each score, and the definition serial
breaks what remains in favor of the earliest overload (a strictly-greater score is required to
displace it).

Polymorphic tag dispatch draws the candidate family from the defining module of a tag found in
the input value.

*/

use crate::{
  abstractions::IString,
  api::{
    ast::{Call, CallTarget, Selector},
    native::NativeContext,
    MorphKind,
  },
  core::{
    eval::Runtime,
    frame::{FrameId, FrameMode, FrameModes, FrameParent},
    function::{FunctionBody, RcOverload},
    module::ModuleId,
    morph::MorphScore,
    value::{RcValue, Value},
  },
  debug,
};

impl Runtime {
  /// Evaluates a pipeline operation: the call's arguments evaluate in the caller's frame, the
  /// target resolves to a candidate family, and dispatch picks and invokes the best overload.
  pub(crate) fn eval_call(&mut self, call: &Call, input: RcValue, frame: FrameId) -> RcValue {
    let args = match &call.args {
      Some(expr) => {
        let value = self.eval_expr(expr, frame);
        if value.is_failure() && !self.frames.get(frame).is_disarmed() {
          return value;
        }
        value
      }
      None => Value::empty_structure(),
    };

    match &call.target {
      CallTarget::Named { module: None, name } => {
        self.dispatch_named(frame, None, name, input, args)
      }

      CallTarget::Named { module: Some(qualifier), name } => {
        let Some(target) = self.modules.id_by_name(qualifier) else {
          return self
              .builtins
              .kinds
              .dispatch_failure_value(&format!("unknown module {}", qualifier));
        };
        if let Err(error) = self.ensure_loaded(target) {
          return self.load_failure(error);
        }
        self.dispatch_named(frame, Some(target), name, input, args)
      }

      CallTarget::TagDispatch { name, tag_field } => {
        let promoted = Value::promote(&input);
        let field_value = match promoted.as_structure() {
          Some(structure) => match tag_field {
            Selector::Name(field_name) => structure.named(field_name).cloned(),
            Selector::Index(index) => structure.unnamed_at(*index).cloned(),
          },
          None => None,
        };
        let Some(field_value) = field_value else {
          return self
              .builtins
              .kinds
              .missing_field_value(&format!("no field {:?} to dispatch on", tag_field));
        };
        let Some(tag) = field_value.as_tag() else {
          return self
              .builtins
              .kinds
              .dispatch_failure_value("tag dispatch field does not hold a tag");
        };

        let target = tag.resolved().module;
        if let Err(error) = self.ensure_loaded(target) {
          return self.load_failure(error);
        }
        self.dispatch_named(frame, Some(target), name, input, args)
      }
    }
  }

  /// Scores every candidate and invokes the winner.
  pub(crate) fn dispatch_named(
    &mut self,
    caller: FrameId,
    qualifier: Option<ModuleId>,
    name: &IString,
    input: RcValue,
    args: RcValue,
  ) -> RcValue {
    let caller_module = self.frames.get(caller).module;
    let candidates = match qualifier {
      Some(target) => self.lookup_family_in(target, caller_module, name),
      None => self.lookup_family(caller_module, name),
    };
    if candidates.is_empty() {
      return self
          .builtins
          .kinds
          .dispatch_failure_value(&format!("no function named {}", name));
    }

    let mut best: Option<(RcOverload, RcValue, RcValue, (MorphScore, MorphScore))> = None;
    for overload in candidates {
      let input_morph =
          match self.morph_value(&input, &overload.input_shape, MorphKind::Normal, overload.strength, caller) {
            Ok(outcome) => outcome,
            Err(_) => continue,
          };
      let args_morph =
          match self.morph_value(&args, &overload.args_shape, MorphKind::Normal, overload.strength, caller) {
            Ok(outcome) => outcome,
            Err(_) => continue,
          };

      let score = (input_morph.score, args_morph.score);
      // Strictly greater displaces; equal keeps the earlier definition.
      let better = match &best {
        None => true,
        Some((_, _, _, best_score)) => score > *best_score,
      };
      if better {
        best = Some((overload, input_morph.value, args_morph.value, score));
      }
    }

    let Some((overload, morphed_input, morphed_args, score)) = best else {
      return self
          .builtins
          .kinds
          .dispatch_failure_value(&format!("no overload of {} accepts the call", name));
    };
    debug!(2, "dispatching {} with score {:?}", overload, score);

    if self.frames.get(caller).is_pure() && !overload.pure {
      return self.builtins.kinds.purity_violation_value(&format!(
        "pure frame cannot call non-pure function {}",
        name
      ));
    }
    if overload.module != caller_module {
      self.run_entry(overload.module, caller);
    }

    self.invoke_overload(caller, overload, morphed_input, morphed_args)
  }

  /// Pushes the callee frame, installs the morphed input and argument values, evaluates the
  /// body, and pops. The result's handles register to the caller before the pop so values
  /// returned out of the frame keep their resources alive.
  pub(crate) fn invoke_overload(
    &mut self,
    caller: FrameId,
    overload: RcOverload,
    input: RcValue,
    args: RcValue,
  ) -> RcValue {
    let mut modes = FrameModes::empty();
    if overload.pure || self.frames.get(caller).is_pure() {
      modes |= FrameMode::Pure;
    }
    if self.frames.get(caller).is_disarmed() {
      modes |= FrameMode::DisarmBypass;
    }

    let frame = self.push_frame(FrameParent::Frame(caller), overload.module, modes, input.clone());

    if let Some(structure) = args.as_structure() {
      for field in structure.fields().to_vec() {
        if let Some(name) = field.name {
          self.frames.get_mut(frame).arguments.insert(name, field.value);
        }
      }
    }
    self.register_value(frame, &args);

    let result = match &overload.body {
      FunctionBody::Statements(statements) => {
        let statements = statements.clone();
        self.eval_statements(&statements, frame)
      }
      FunctionBody::Expression(expression) => {
        let expression = expression.clone();
        self.eval_expr(&expression, frame)
      }
      FunctionBody::Native(native) => {
        let native = native.clone();
        let mut ctx = NativeContext { runtime: self, frame };
        native.invoke(input, args.clone(), &mut ctx)
      }
    };

    self.register_value(caller, &result);
    self.pop_frame(frame);
    result
  }
}
