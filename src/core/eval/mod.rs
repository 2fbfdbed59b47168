/*!

The pipeline evaluator. The `Runtime` owns everything evaluation touches (the module registry,
the frame arena, the handle arena, the built-in module, and the cancellation flag) and drives
the AST: statement loops over function bodies, pipelines threading a value left to right, and
the scope bindings statements produce.

## Failure propagation

After each pipeline operation the evaluator checks the value for failure. A failure skips every
subsequent operation except fallback handlers, which receive the failure as their input inside a
disarmed child frame; a handler's own failure resumes propagation. A statement whose pipeline
ends in a failure makes the enclosing function return that failure. Disarm, whether the
expression operator or the `disarm_bypass` frame mode, makes the failure check short-circuit to
"not a failure".

## Scheduling

Single-threaded cooperative. The embedder may request shutdown from any thread through
[`Runtime::cancel_flag`]; the evaluator checks at statement boundaries and aborts the current
pipeline with a `cancellation` failure.

*/

pub mod dispatch;

use std::any::Any;
use std::rc::Rc;
use std::sync::{
  atomic::{AtomicBool, Ordering},
  Arc,
};

use crate::{
  abstractions::{join_string, IString},
  api::{
    ast::{Expr, FieldInit, Literal, Pipeline, PipelineOp, Selector, ShapeRef, Statement},
    MorphKind,
    ScopeKind,
    Strength,
  },
  core::{
    fail::Builtins,
    frame::{Frame, FrameArena, FrameId, FrameMode, FrameModes, FrameParent},
    handle::{HandleArena, RcHandleDef},
    module::{ModuleId, ModuleRegistry, ModuleStatus},
    tag::RcTag,
    value::{BlockBody, BlockValue, Field, FunctionRef, RcBlock, RcValue, Value},
  },
  debug,
  trace,
};

pub struct Runtime {
  pub(crate) modules:  ModuleRegistry,
  pub(crate) frames:   FrameArena,
  pub(crate) handles:  HandleArena,
  pub(crate) builtins: Builtins,

  /// The bottom frame; never popped. Module-scope values register their handles here.
  pub(crate) root_frame: FrameId,
  /// While a module loads or its entry block runs, the module whose scope is writable (and
  /// whether writes are runtime slots).
  pub(crate) module_write: Option<(ModuleId, bool)>,

  definition_serial: u32,
  block_serial:      u32,
  cancel:            Arc<AtomicBool>,
}

impl Runtime {
  pub fn new() -> Runtime {
    let mut modules = ModuleRegistry::new();
    let builtin_id = modules.register(IString::from("builtin"), Vec::new());

    let mut serial = 0u32;
    let builtins = Builtins::install(builtin_id, &mut serial);

    // Index the built-in definitions so user modules can reference them by name.
    {
      let module = modules.get_mut(builtin_id);
      module.status = ModuleStatus::Loaded;

      let kinds = &builtins.kinds;
      for tag in [
        &kinds.fail,
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
        &builtins.true_tag,
        &builtins.false_tag,
      ] {
        module.tags.insert(IString::from(tag.path_string().as_str()), (*tag).clone());
      }
      module.shapes.insert(IString::from("any"), builtins.any_shape.clone());
    }

    let mut frames = FrameArena::new();
    let root_frame = frames.push(Frame::new(
      FrameParent::None,
      builtin_id,
      FrameModes::empty(),
      Value::empty_structure(),
    ));

    Runtime {
      modules,
      frames,
      handles: HandleArena::new(),
      builtins,
      root_frame,
      module_write: None,
      definition_serial: serial,
      block_serial: 0,
      cancel: Arc::new(AtomicBool::new(false)),
    }
  }

  // region Embedder surface

  /// The shared shutdown flag. Setting it makes the evaluator abort at the next statement
  /// boundary with a `cancellation` failure.
  pub fn cancel_flag(&self) -> Arc<AtomicBool> {
    self.cancel.clone()
  }

  pub fn request_cancel(&self) {
    self.cancel.store(true, Ordering::SeqCst);
  }

  pub fn builtins(&self) -> &Builtins {
    &self.builtins
  }

  /// A `user-<kind>` failure value.
  pub fn user_failure(&self, kind: &str, message: &str) -> RcValue {
    self.builtins.kinds.user_value(kind, message)
  }

  /// Resolves a handle definition visible from `module`, loading the module if needed.
  pub fn handle_def(&mut self, module: ModuleId, name: &str) -> Option<RcHandleDef> {
    self.ensure_loaded(module).ok()?;
    self.lookup_handle_def(module, &IString::from(name))
  }

  /// The opaque payload of an unreleased handle, for the bridge to downcast. The core itself
  /// never inspects it; a released handle's payload is gone.
  pub fn handle_payload(&self, handle: &RcValue) -> Option<&dyn Any> {
    let id = handle.as_handle()?;
    self.handles.get(id).payload()
  }

  /// Resolves a tag visible from `module` by dotted path, loading the module if needed.
  pub fn tag_by_path(&mut self, module: ModuleId, path: &str) -> Option<RcTag> {
    self.ensure_loaded(module).ok()?;
    let segments: Vec<IString> = path.split('.').map(IString::from).collect();
    self.lookup_tag(module, &segments)
  }

  /// Calls `name` in `module` with the given input and arguments. The call runs from the root
  /// frame, which is non-pure.
  pub fn call(&mut self, module: ModuleId, name: &str, input: RcValue, args: RcValue) -> RcValue {
    if let Err(error) = self.ensure_loaded(module) {
      return self.load_failure(error);
    }
    let name = IString::from(name);
    self.run_entry(module, self.root_frame);
    self.dispatch_named(self.root_frame, Some(module), &name, input, args)
  }

  /// Invokes a block value with `input` from the root frame.
  pub fn invoke(&mut self, block: &RcValue, input: RcValue) -> RcValue {
    match &**block {
      Value::Block(block) => {
        let block = block.clone();
        self.invoke_block(&block, input, self.root_frame)
      }
      _ => self
          .builtins
          .kinds
          .shape_mismatch_value(&format!("cannot invoke a {}", block.kind_name())),
    }
  }

  // endregion

  pub(crate) fn next_definition_serial(&mut self) -> u32 {
    let serial = self.definition_serial;
    self.definition_serial += 1;
    serial
  }

  fn next_block_serial(&mut self) -> u32 {
    let serial = self.block_serial;
    self.block_serial += 1;
    serial
  }

  /// Pushes a frame and registers the handles of its input value, which is a scope slot of the
  /// new frame.
  pub(crate) fn push_frame(
    &mut self,
    parent: FrameParent,
    module: ModuleId,
    modes: FrameModes,
    input: RcValue,
  ) -> FrameId {
    let id = self.frames.push(Frame::new(parent, module, modes, input));
    let input_value = self.frames.get(id).input.clone();
    self.register_value(id, &input_value);
    id
  }

  // region Expression evaluation

  pub(crate) fn eval_expr(&mut self, expr: &Expr, frame: FrameId) -> RcValue {
    match expr {
      Expr::Literal(literal) => match literal {
        Literal::Number(n) => Value::number(*n),
        Literal::String(s) => Rc::new(Value::String(s.clone())),
        Literal::Boolean(b) => Value::boolean(*b),
      },

      Expr::Identifier { scope, name } => self.resolve_identifier(frame, *scope, name),

      Expr::TagRef { path } => {
        let module = self.frames.get(frame).module;
        match self.lookup_tag(module, path) {
          Some(tag) => Value::tag(tag),
          None => self.builtins.kinds.missing_field_value(&format!(
            "unknown tag #{}",
            join_string(path.iter(), ".")
          )),
        }
      }

      Expr::FunctionRef { name } => {
        let module = self.frames.get(frame).module;
        if self.lookup_family(module, name).is_empty() {
          self
              .builtins
              .kinds
              .dispatch_failure_value(&format!("no function named {}", name))
        } else {
          Rc::new(Value::Function(FunctionRef { module, name: name.clone() }))
        }
      }

      Expr::FieldAccess { base, selector } => {
        let base_value = self.eval_expr(base, frame);
        if base_value.is_failure() && !self.frames.get(frame).is_disarmed() {
          return base_value;
        }
        self.select_field(&base_value, selector)
      }

      Expr::StructureLiteral { fields } => self.eval_structure_literal(fields, frame, false),
      Expr::LazyStructureLiteral { fields } => self.eval_structure_literal(fields, frame, true),

      Expr::Block { body } => self.create_block(body.clone(), frame),

      Expr::Pipeline(pipeline) => self.eval_pipeline(pipeline, frame, Value::empty_structure()),

      Expr::Disarm(inner) => {
        let was_disarmed = self.frames.get(frame).is_disarmed();
        self.frames.get_mut(frame).modes.insert(FrameMode::DisarmBypass);
        let value = self.eval_expr(inner, frame);
        if !was_disarmed {
          self.frames.get_mut(frame).modes.remove(FrameMode::DisarmBypass);
        }
        value
      }

      Expr::Placeholder => self
          .builtins
          .kinds
          .not_implemented_value("placeholder expression evaluated"),
    }
  }

  pub(crate) fn select_field(&self, value: &RcValue, selector: &Selector) -> RcValue {
    let Some(structure) = value.as_structure() else {
      return self
          .builtins
          .kinds
          .missing_field_value(&format!("field access on a {}", value.kind_name()));
    };
    let selected = match selector {
      Selector::Name(name) => structure.named(name).cloned(),
      Selector::Index(index) => structure.unnamed_at(*index).cloned(),
    };
    selected.unwrap_or_else(|| {
      self
          .builtins
          .kinds
          .missing_field_value(&format!("no field {:?} in {}", selector, value))
    })
  }

  fn resolve_identifier(&mut self, frame: FrameId, scope: Option<ScopeKind>, name: &IString) -> RcValue {
    match scope {
      None => {
        if let Some(value) = self.frames.resolve(frame, name) {
          return value;
        }
        let module = self.frames.get(frame).module;
        self.read_module_slot(frame, module, name)
      }

      Some(ScopeKind::Input) => self.frames.get(frame).input.clone(),

      Some(ScopeKind::Variable) => {
        let f = self.frames.get(frame);
        if let Some(value) = f.variables.get(name) {
          return value.clone();
        }
        if let FrameParent::Snapshot(snapshot) = &f.parent {
          if let Some(value) = snapshot.variables.get(name) {
            return value.clone();
          }
        }
        self.unresolved(name)
      }

      Some(ScopeKind::Argument) => {
        let f = self.frames.get(frame);
        if let Some(value) = f.arguments.get(name) {
          return value.clone();
        }
        if let FrameParent::Snapshot(snapshot) = &f.parent {
          if let Some(value) = snapshot.arguments.get(name) {
            return value.clone();
          }
        }
        self.unresolved(name)
      }

      Some(ScopeKind::Context) => self
          .frames
          .resolve_context(frame, name)
          .unwrap_or_else(|| self.unresolved(name)),

      Some(ScopeKind::Module) => {
        let module = self.frames.get(frame).module;
        self.read_module_slot(frame, module, name)
      }

      Some(ScopeKind::Pipe) => Value::structure(self.frames.get(frame).pipe.clone()),
    }
  }

  fn unresolved(&self, name: &IString) -> RcValue {
    self
        .builtins
        .kinds
        .missing_field_value(&format!("unresolved name {}", name))
  }

  fn read_module_slot(&self, frame: FrameId, module: ModuleId, name: &IString) -> RcValue {
    match self.modules.get(module).scope.get(name) {
      Some(slot) => {
        if slot.runtime && self.frames.get(frame).is_pure() {
          self
              .builtins
              .kinds
              .purity_violation_value("pure frame cannot read runtime module state")
        } else {
          slot.value.clone()
        }
      }
      None => self.unresolved(name),
    }
  }

  fn eval_structure_literal(&mut self, inits: &[FieldInit], frame: FrameId, lazy: bool) -> RcValue {
    let mut fields: Vec<Field> = Vec::with_capacity(inits.len());

    for init in inits {
      match init {
        FieldInit::Field { name, value } => {
          let evaluated = if lazy {
            self.create_expression_block(value, frame)
          } else {
            self.eval_expr(value, frame)
          };
          if let Some(name) = name {
            if fields.iter().any(|f| f.name.as_ref() == Some(name)) {
              return self
                  .builtins
                  .kinds
                  .rebound_variable_value(&format!("field {} appears twice in a literal", name));
            }
            fields.push(Field::named(name.clone(), evaluated));
          } else {
            fields.push(Field::unnamed(evaluated));
          }
        }

        FieldInit::Spread { strength, value } => {
          let evaluated = self.eval_expr(value, frame);
          if evaluated.is_failure() && !self.frames.get(frame).is_disarmed() {
            return evaluated;
          }
          let promoted = Value::promote(&evaluated);
          let Some(structure) = promoted.as_structure() else { continue };
          for field in structure.fields() {
            match &field.name {
              Some(name) => {
                match fields.iter().position(|f| f.name.as_ref() == Some(name)) {
                  Some(position) => match strength {
                    Strength::Weak => {}
                    Strength::Normal => {
                      return self.builtins.kinds.rebound_variable_value(&format!(
                        "spread collides with field {}",
                        name
                      ));
                    }
                    Strength::Strong => fields[position].value = field.value.clone(),
                  },
                  None => fields.push(field.clone()),
                }
              }
              None => fields.push(field.clone()),
            }
          }
        }
      }
    }

    Value::structure(fields)
  }

  // endregion

  // region Blocks

  fn create_block(&mut self, body: Rc<Vec<Statement>>, frame: FrameId) -> RcValue {
    let captured = Rc::new(self.frames.capture_snapshot(frame));
    let serial = self.next_block_serial();
    Rc::new(Value::Block(Rc::new(BlockValue {
      serial,
      body: BlockBody::Statements(body),
      captured,
      pure: self.frames.get(frame).is_pure(),
    })))
  }

  fn create_expression_block(&mut self, expr: &Expr, frame: FrameId) -> RcValue {
    let captured = Rc::new(self.frames.capture_snapshot(frame));
    let serial = self.next_block_serial();
    Rc::new(Value::Block(Rc::new(BlockValue {
      serial,
      body: BlockBody::Expression(Rc::new(expr.clone())),
      captured,
      pure: self.frames.get(frame).is_pure(),
    })))
  }

  /// Invokes a block with `input`. The new frame hangs off the captured snapshot, not the
  /// invoker; purity is the captured flag, never weakened. A pure invoker cannot run a
  /// block captured without purity.
  pub(crate) fn invoke_block(&mut self, block: &RcBlock, input: RcValue, caller: FrameId) -> RcValue {
    if self.frames.get(caller).is_pure() && !block.pure {
      return self
          .builtins
          .kinds
          .purity_violation_value("pure frame cannot invoke a non-pure block");
    }

    let mut modes = FrameModes::empty();
    if block.pure {
      modes |= FrameMode::Pure;
    }
    if self.frames.get(caller).is_disarmed() {
      modes |= FrameMode::DisarmBypass;
    }

    let frame = self.push_frame(
      FrameParent::Snapshot(block.captured.clone()),
      block.captured.module,
      modes,
      input,
    );
    let result = match &block.body {
      BlockBody::Statements(statements) => {
        let statements = statements.clone();
        self.eval_statements(&statements, frame)
      }
      BlockBody::Expression(expression) => {
        let expression = expression.clone();
        self.eval_expr(&expression, frame)
      }
    };
    self.register_value(caller, &result);
    self.pop_frame(frame);
    result
  }

  // endregion

  // region Pipelines and statements

  /// Threads a value through the pipeline. Statement pipelines pass the statement's initial
  /// value (the function input) as `initial`; expression-position pipelines pass the empty
  /// structure. A seed expression overrides `initial`.
  pub(crate) fn eval_pipeline(&mut self, pipeline: &Pipeline, frame: FrameId, initial: RcValue) -> RcValue {
    let mut value = match &pipeline.seed {
      Some(seed) => self.eval_expr(seed, frame),
      None => initial,
    };
    let mut disarmed_here = false;

    for op in pipeline.ops.iter() {
      let failing =
          value.is_failure() && !self.frames.get(frame).is_disarmed() && !disarmed_here;

      match op {
        PipelineOp::Fallback { handler } => {
          if failing {
            debug!(2, "fallback handler catching {}", value);
            value = self.run_fallback(handler, value, frame);
          }
        }

        _ if failing => {
          trace!(3, "failure in flight; skipping pipeline operation");
        }

        PipelineOp::Operation(call) => {
          value = self.eval_call(call, value, frame);
        }

        PipelineOp::Morph { shape, kind } => {
          value = self.eval_morph_op(shape, *kind, value, frame);
        }

        PipelineOp::Disarm => {
          disarmed_here = true;
        }
      }
    }
    value
  }

  fn eval_morph_op(&mut self, shape: &ShapeRef, kind: MorphKind, value: RcValue, frame: FrameId) -> RcValue {
    let module = self.frames.get(frame).module;
    let shape = match self.resolve_shape_ref(module, shape) {
      Ok(shape) => shape,
      Err(error) => return self.load_failure(error),
    };
    match self.morph_value(&value, &shape, kind, Strength::Normal, frame) {
      Ok(outcome) => outcome.value,
      Err(failure) => failure,
    }
  }

  /// Runs a fallback handler with the failure as its input, inside a disarmed child frame so
  /// the handler can take the failure apart without re-tripping propagation.
  fn run_fallback(&mut self, handler: &Expr, failure: RcValue, frame: FrameId) -> RcValue {
    let module = self.frames.get(frame).module;
    let modes = self.frames.get(frame).modes | FrameMode::DisarmBypass;
    let child = self.push_frame(FrameParent::Frame(frame), module, modes, failure.clone());

    let result = match handler {
      Expr::Pipeline(pipeline) => self.eval_pipeline(pipeline, child, failure.clone()),
      _ => {
        let evaluated = self.eval_expr(handler, child);
        match &*evaluated {
          Value::Block(block) => {
            let block = block.clone();
            self.invoke_block(&block, failure.clone(), child)
          }
          _ => evaluated,
        }
      }
    };

    self.register_value(frame, &result);
    self.pop_frame(child);
    result
  }

  /// Evaluates a function body's statements against `frame`, producing the accumulated output
  /// structure. Every statement sees the frame's input as its initial pipeline value; a failing
  /// statement makes the whole body return its failure.
  pub(crate) fn eval_statements(&mut self, statements: &Rc<Vec<Statement>>, frame: FrameId) -> RcValue {
    let statements = statements.clone();

    for statement in statements.iter() {
      if self.cancel.load(Ordering::Relaxed) {
        return self
            .builtins
            .kinds
            .cancellation_value("embedder requested shutdown");
      }

      let input = self.frames.get(frame).input.clone();
      let outcome = match statement {
        Statement::NamedField { name, strength, pipeline } => {
          let value = self.eval_pipeline(pipeline, frame, input);
          if value.is_failure() && !self.frames.get(frame).is_disarmed() {
            return value;
          }
          self.pipe_named(frame, name.clone(), *strength, value)
        }

        Statement::Append { pipeline } | Statement::Bare { pipeline } => {
          let value = self.eval_pipeline(pipeline, frame, input);
          if value.is_failure() && !self.frames.get(frame).is_disarmed() {
            return value;
          }
          self.pipe_append(frame, value);
          Ok(())
        }

        Statement::Variable { name, strength, pipeline } => {
          let value = self.eval_pipeline(pipeline, frame, input);
          if value.is_failure() && !self.frames.get(frame).is_disarmed() {
            return value;
          }
          self.bind_variable(frame, name.clone(), *strength, value)
        }

        Statement::Scoped { scope, name, strength, pipeline } => {
          let value = self.eval_pipeline(pipeline, frame, input);
          if value.is_failure() && !self.frames.get(frame).is_disarmed() {
            return value;
          }
          match scope {
            ScopeKind::Variable => self.bind_variable(frame, name.clone(), *strength, value),
            ScopeKind::Context => self.bind_context(frame, name.clone(), *strength, value),
            ScopeKind::Pipe => self.pipe_named(frame, name.clone(), *strength, value),
            ScopeKind::Module => {
              let module = self.frames.get(frame).module;
              match self.module_write {
                Some((writable, runtime_slot)) if writable == module => {
                  self.bind_module_slot(module, name.clone(), *strength, value, runtime_slot)
                }
                _ => Err(self.builtins.kinds.purity_violation_value(
                  "module scope is writable only at load or in the entry block",
                )),
              }
            }
            ScopeKind::Input | ScopeKind::Argument => {
              Err(self.builtins.kinds.shape_mismatch_value(&format!(
                "the {} scope is not assignable",
                scope
              )))
            }
          }
        }

        Statement::Spread { strength, pipeline } => {
          let value = self.eval_pipeline(pipeline, frame, input);
          if value.is_failure() && !self.frames.get(frame).is_disarmed() {
            return value;
          }
          self.spread_into_pipe(frame, *strength, value)
        }
      };

      if let Err(failure) = outcome {
        return failure;
      }
    }

    Value::structure(self.frames.get(frame).pipe.clone())
  }

  // endregion

  // region Scope bindings

  fn bind_variable(&mut self, frame: FrameId, name: IString, strength: Strength, value: RcValue) -> Result<(), RcValue> {
    self.register_value(frame, &value);
    if self.frames.get(frame).variables.contains_key(&name) {
      match strength {
        Strength::Weak => return Ok(()),
        Strength::Normal => {
          return Err(self.builtins.kinds.rebound_variable_value(&format!(
            "variable {} is already bound",
            name
          )));
        }
        Strength::Strong => {}
      }
    }
    self.frames.get_mut(frame).variables.insert(name, value);
    Ok(())
  }

  fn bind_context(&mut self, frame: FrameId, name: IString, strength: Strength, value: RcValue) -> Result<(), RcValue> {
    self.register_value(frame, &value);
    if self.frames.get(frame).context.contains_key(&name) {
      match strength {
        Strength::Weak => return Ok(()),
        Strength::Normal => {
          return Err(self.builtins.kinds.rebound_variable_value(&format!(
            "context slot {} is already bound",
            name
          )));
        }
        Strength::Strong => {}
      }
    }
    self.frames.get_mut(frame).context.insert(name, value);
    Ok(())
  }

  fn pipe_named(&mut self, frame: FrameId, name: IString, strength: Strength, value: RcValue) -> Result<(), RcValue> {
    self.register_value(frame, &value);
    let position = self
        .frames
        .get(frame)
        .pipe
        .iter()
        .position(|field| field.name.as_ref() == Some(&name));
    match position {
      Some(position) => match strength {
        Strength::Weak => Ok(()),
        Strength::Normal => Err(self.builtins.kinds.rebound_variable_value(&format!(
          "output field {} is already bound",
          name
        ))),
        Strength::Strong => {
          self.frames.get_mut(frame).pipe[position].value = value;
          Ok(())
        }
      },
      None => {
        self.frames.get_mut(frame).pipe.push(Field::named(name, value));
        Ok(())
      }
    }
  }

  fn pipe_append(&mut self, frame: FrameId, value: RcValue) {
    self.register_value(frame, &value);
    self.frames.get_mut(frame).pipe.push(Field::unnamed(value));
  }

  fn spread_into_pipe(&mut self, frame: FrameId, strength: Strength, value: RcValue) -> Result<(), RcValue> {
    let promoted = Value::promote(&value);
    let Some(structure) = promoted.as_structure() else { return Ok(()) };
    for field in structure.fields().to_vec() {
      match field.name {
        Some(name) => self.pipe_named(frame, name, strength, field.value)?,
        None => self.pipe_append(frame, field.value),
      }
    }
    Ok(())
  }

  // endregion
}

impl Default for Runtime {
  fn default() -> Self {
    Runtime::new()
  }
}
