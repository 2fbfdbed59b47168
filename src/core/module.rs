/*!

The module registry. A module is a namespace owning four kinds of definitions (tags, shapes,
handles, functions) plus a scope of module-level values and the extension deltas it applies to
imported tags.

## Module Loading

Modules are registered with their definition list and materialized lazily on first use, tracked
by [`ModuleStatus`]. Materialization walks the definitions in source order inside a frame that is
both pure and disarmed, so module-level assignments and tag values may themselves be
failure-tagged structures without aborting the load. A module's `!entry` block, if present, runs
once on first external reference from a non-pure frame and is the only place runtime state may be
stashed into the module scope; pure frames cannot read such runtime slots.

Private names (`private` flag on the definition) are invisible to cross-module lookup.

*/

use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::rc::Rc;

use crate::{
  abstractions::{join_iter, join_string, IString},
  api::{
    ast::{Definition, ShapeRef, Statement, TagDefAst},
    native::NativeSpec,
    Strength,
  },
  core::{
    eval::Runtime,
    fail::failure_value,
    frame::{FrameId, FrameMode, FrameParent},
    function::{FunctionBody, FunctionFamily, Overload, RcOverload},
    handle::{CleanupFn, HandleDef, RcHandleDef},
    shape::{RcShape, ShapeDef, ShapeField, TypeConstraint},
    tag::{RcTag, TagDef, TagExtension, TagView},
    value::{Field, RcValue, Value},
  },
  info,
  warning,
};

use crate::api::ast::{ConstraintRef, FunctionBodyAst, ModuleAst, ShapeLiteral};

const DISPLAY_INDENT: usize = 2;

/// Index of a module in the registry.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub struct ModuleId(pub u32);

impl ModuleId {
  #[inline(always)]
  pub fn as_index(self) -> usize {
    self.0 as usize
  }
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Default, Debug)]
pub enum ModuleStatus {
  #[default]
  Registered,
  Loading,
  Loaded,
  Failed,
}

/// One module-scope binding. `runtime` marks slots written by `!entry` rather than at load;
/// pure frames may not read those.
pub struct ModuleSlot {
  pub value:   RcValue,
  pub runtime: bool,
}

pub struct Module {
  pub id:     ModuleId,
  pub name:   IString,
  pub status: ModuleStatus,

  pub(crate) definitions: Rc<Vec<Definition>>,
  pub(crate) imports:     Vec<ModuleId>,

  pub(crate) tags:        HashMap<IString, RcTag>,
  pub(crate) shapes:      HashMap<IString, RcShape>,
  pub(crate) handle_defs: HashMap<IString, RcHandleDef>,
  pub(crate) functions:   HashMap<IString, FunctionFamily>,

  pub(crate) scope:      HashMap<IString, ModuleSlot>,
  pub(crate) extensions: Vec<TagExtension>,

  pub(crate) entry:     Option<Rc<Vec<Statement>>>,
  pub(crate) entry_ran: bool,

  pub(crate) pending_natives:  Vec<NativeSpec>,
  pub(crate) pending_cleanups: HashMap<IString, CleanupFn>,
}

impl Module {
  fn new(id: ModuleId, name: IString, definitions: Vec<Definition>) -> Module {
    Module {
      id,
      name,
      status: ModuleStatus::default(),
      definitions: Rc::new(definitions),
      imports: Vec::new(),
      tags: HashMap::new(),
      shapes: HashMap::new(),
      handle_defs: HashMap::new(),
      functions: HashMap::new(),
      scope: HashMap::new(),
      extensions: Vec::new(),
      entry: None,
      entry_ran: false,
      pending_natives: Vec::new(),
      pending_cleanups: HashMap::new(),
    }
  }

  /// Formats the module for display with `prefix` for each line. The `Debug` impl defers to
  /// this method.
  fn debug_fmt(&self, f: &mut Formatter<'_>, prefix: &str) -> std::fmt::Result {
    let inner_prefix = format!("{}{}", prefix, " ".repeat(DISPLAY_INDENT));
    writeln!(f, "{}Module {{", prefix)?;
    writeln!(f, "{}name: {}", inner_prefix, self.name)?;
    writeln!(f, "{}status: {:?}", inner_prefix, self.status)?;
    if !self.tags.is_empty() {
      let mut names: Vec<&str> = self.tags.keys().map(|k| &**k).collect();
      names.sort_unstable();
      writeln!(
        f,
        "{}tags: [{}]",
        inner_prefix,
        join_iter(names.into_iter(), |_| ", ").collect::<String>()
      )?;
    }
    if !self.shapes.is_empty() {
      let mut names: Vec<&str> = self.shapes.keys().map(|k| &**k).collect();
      names.sort_unstable();
      writeln!(
        f,
        "{}shapes: [{}]",
        inner_prefix,
        join_iter(names.into_iter(), |_| ", ").collect::<String>()
      )?;
    }
    if !self.handle_defs.is_empty() {
      let mut names: Vec<&str> = self.handle_defs.keys().map(|k| &**k).collect();
      names.sort_unstable();
      writeln!(
        f,
        "{}handles: [{}]",
        inner_prefix,
        join_iter(names.into_iter(), |_| ", ").collect::<String>()
      )?;
    }
    if !self.functions.is_empty() {
      let mut names: Vec<&str> = self.functions.keys().map(|k| &**k).collect();
      names.sort_unstable();
      writeln!(
        f,
        "{}functions: [{}]",
        inner_prefix,
        join_iter(names.into_iter(), |_| ", ").collect::<String>()
      )?;
    }
    writeln!(f, "{}}}", prefix)
  }
}

impl Debug for Module {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    self.debug_fmt(f, "")
  }
}


#[derive(Default)]
pub struct ModuleRegistry {
  modules: Vec<Module>,
  by_name: HashMap<IString, ModuleId>,
}

impl ModuleRegistry {
  pub fn new() -> ModuleRegistry {
    Self::default()
  }

  pub fn register(&mut self, name: IString, definitions: Vec<Definition>) -> ModuleId {
    let id = ModuleId(self.modules.len() as u32);
    self.by_name.insert(name.clone(), id);
    self.modules.push(Module::new(id, name, definitions));
    id
  }

  pub fn contains_name(&self, name: &IString) -> bool {
    self.by_name.contains_key(name)
  }

  pub fn id_by_name(&self, name: &IString) -> Option<ModuleId> {
    self.by_name.get(name).copied()
  }

  #[inline(always)]
  pub fn get(&self, id: ModuleId) -> &Module {
    &self.modules[id.as_index()]
  }

  #[inline(always)]
  pub fn get_mut(&mut self, id: ModuleId) -> &mut Module {
    &mut self.modules[id.as_index()]
  }

  #[inline(always)]
  pub fn len(&self) -> usize {
    self.modules.len()
  }
}


/// Host-level errors discovered while materializing a module. In-language failures are values;
/// these are for the embedder.
pub enum LoadError {
  DuplicateModule { name: IString },
  DuplicateDefinition { module: IString, name: IString },
  UnknownImport { module: IString, import: IString },
  ImportCycle { module: IString },
  UnknownName { module: IString, name: IString },
  ExtensionTargetMissing { module: IString, path: String },
  ExtensionCollision { module: IString, child: IString },
  PreviousFailure { module: IString },
}

impl Display for LoadError {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {

      LoadError::DuplicateModule { name } => {
        write!(f, "a module named \"{}\" is already registered.", name)
      }

      LoadError::DuplicateDefinition { module, name } => {
        write!(f, "module \"{}\" defines \"{}\" more than once.", module, name)
      }

      LoadError::UnknownImport { module, import } => {
        write!(f, "module \"{}\" imports \"{}\", which is not registered.", module, import)
      }

      LoadError::ImportCycle { module } => {
        write!(f, "loading module \"{}\" re-entered itself through an import cycle.", module)
      }

      LoadError::UnknownName { module, name } => {
        write!(f, "module \"{}\" references \"{}\", which resolves to nothing visible.", module, name)
      }

      LoadError::ExtensionTargetMissing { module, path } => {
        write!(f, "module \"{}\" extends tag #{}, which is not visible to it.", module, path)
      }

      LoadError::ExtensionCollision { module, child } => {
        write!(f, "module \"{}\" extends a tag with child \"{}\", which already exists.", module, child)
      }

      LoadError::PreviousFailure { module } => {
        write!(f, "module \"{}\" failed to load earlier in this run.", module)
      }

    } // end match on `LoadError`
  }
}

impl Debug for LoadError {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    Display::fmt(self, f)
  }
}

impl Error for LoadError {}


// Loading, lookup, and the `!entry` protocol need the evaluator, so they live on the runtime.
impl Runtime {
  /// Registers a parsed module. Definitions materialize lazily on first use.
  pub fn register_module(&mut self, ast: ModuleAst) -> Result<ModuleId, LoadError> {
    if self.modules.contains_name(&ast.name) {
      return Err(LoadError::DuplicateModule { name: ast.name });
    }
    Ok(self.modules.register(ast.name, ast.definitions))
  }

  /// Registers a native overload against a not-yet-loaded module.
  pub fn register_native(&mut self, module: ModuleId, spec: NativeSpec) {
    self.modules.get_mut(module).pending_natives.push(spec);
  }

  /// Attaches the cleanup hook a handle definition will carry. Must precede the module's load.
  pub fn set_handle_cleanup(&mut self, module: ModuleId, name: impl Into<IString>, hook: CleanupFn) {
    self.modules.get_mut(module).pending_cleanups.insert(name.into(), hook);
  }

  /// Forces materialization now instead of on first use.
  pub fn load_module(&mut self, module: ModuleId) -> Result<(), LoadError> {
    self.ensure_loaded(module)
  }

  pub(crate) fn ensure_loaded(&mut self, id: ModuleId) -> Result<(), LoadError> {
    match self.modules.get(id).status {
      ModuleStatus::Loaded => return Ok(()),
      ModuleStatus::Loading => {
        return Err(LoadError::ImportCycle { module: self.modules.get(id).name.clone() })
      }
      ModuleStatus::Failed => {
        return Err(LoadError::PreviousFailure { module: self.modules.get(id).name.clone() })
      }
      ModuleStatus::Registered => {}
    }
    self.modules.get_mut(id).status = ModuleStatus::Loading;

    let definitions = self.modules.get(id).definitions.clone();
    // Module-level evaluation happens in a pure, disarmed frame.
    let load_frame = self.push_frame(
      FrameParent::Frame(self.root_frame),
      id,
      FrameMode::Pure | FrameMode::DisarmBypass,
      Value::empty_structure(),
    );
    let previous_write = self.module_write.replace((id, false));

    let mut result = Ok(());
    for definition in definitions.iter() {
      if let Err(error) = self.materialize(id, definition, load_frame) {
        result = Err(error);
        break;
      }
    }
    if result.is_ok() {
      let natives = std::mem::take(&mut self.modules.get_mut(id).pending_natives);
      for spec in natives {
        if let Err(error) = self.materialize_native(id, spec) {
          result = Err(error);
          break;
        }
      }
    }

    self.module_write = previous_write;
    self.pop_frame(load_frame);

    match result {
      Ok(()) => {
        self.modules.get_mut(id).status = ModuleStatus::Loaded;
        info!(1, "loaded module {}", self.modules.get(id).name);
        Ok(())
      }
      Err(error) => {
        self.modules.get_mut(id).status = ModuleStatus::Failed;
        warning!(1, "module {} failed to load: {}", self.modules.get(id).name, error);
        Err(error)
      }
    }
  }

  fn materialize(&mut self, id: ModuleId, definition: &Definition, load_frame: FrameId) -> Result<(), LoadError> {
    match definition {

      Definition::Import { module } => {
        let target = self.modules.id_by_name(module).ok_or_else(|| LoadError::UnknownImport {
          module: self.modules.get(id).name.clone(),
          import: module.clone(),
        })?;
        self.ensure_loaded(target)?;
        self.modules.get_mut(id).imports.push(target);
        Ok(())
      }

      Definition::Tag(ast) => {
        self.materialize_tag(id, None, ast, load_frame)?;
        Ok(())
      }

      Definition::Shape(ast) => {
        let shape = self.materialize_shape_literal(id, Some(ast.name.clone()), &ast.literal, ast.private)?;
        let module = self.modules.get_mut(id);
        if module.shapes.insert(ast.name.clone(), shape).is_some() {
          return Err(LoadError::DuplicateDefinition {
            module: module.name.clone(),
            name: ast.name.clone(),
          });
        }
        Ok(())
      }

      Definition::Handle(ast) => {
        let serial = self.next_definition_serial();
        let def = HandleDef::new(ast.name.clone(), serial, id, ast.private);
        let module = self.modules.get_mut(id);
        if let Some(hook) = module.pending_cleanups.remove(&ast.name) {
          def.set_cleanup(hook);
        }
        if module.handle_defs.insert(ast.name.clone(), Rc::new(def)).is_some() {
          return Err(LoadError::DuplicateDefinition {
            module: module.name.clone(),
            name: ast.name.clone(),
          });
        }
        Ok(())
      }

      Definition::Function(ast) => {
        let input_shape = self.resolve_shape_ref(id, &ast.input_shape)?;
        let args_shape = self.resolve_shape_ref(id, &ast.args_shape)?;
        let body = match &ast.body {
          FunctionBodyAst::Statements(statements) => FunctionBody::Statements(statements.clone()),
          FunctionBodyAst::Expression(expression) => FunctionBody::Expression(expression.clone()),
        };

        let module = self.modules.get_mut(id);
        let family = module
            .functions
            .entry(ast.name.clone())
            .or_insert_with(|| FunctionFamily::new(ast.name.clone()));
        let serial = family.next_serial();
        family.add(Overload {
          name: ast.name.clone(),
          module: id,
          serial,
          input_shape,
          args_shape,
          strength: ast.strength,
          pure: ast.pure,
          private: ast.private,
          body,
        });
        Ok(())
      }

      Definition::ModuleAssign { name, strength, pipeline } => {
        let value = self.eval_pipeline(pipeline, load_frame, Value::empty_structure());
        self
            .bind_module_slot(id, name.clone(), *strength, value, false)
            .map_err(|_failure| LoadError::DuplicateDefinition {
              module: self.modules.get(id).name.clone(),
              name: name.clone(),
            })
      }

      Definition::ExtendTag { target, children } => {
        let target_tag = self.lookup_tag(id, target).ok_or_else(|| LoadError::ExtensionTargetMissing {
          module: self.modules.get(id).name.clone(),
          path: join_string(target.iter(), "."),
        })?;

        let existing: Vec<IString> = self
            .tag_view(id)
            .children(&target_tag)
            .iter()
            .map(|child| child.name.clone())
            .collect();

        let mut extension_children = Vec::with_capacity(children.len());
        for child_ast in children.iter() {
          if existing.contains(&child_ast.name) {
            return Err(LoadError::ExtensionCollision {
              module: self.modules.get(id).name.clone(),
              child: child_ast.name.clone(),
            });
          }
          let child = self.materialize_extension_child(id, &target_tag, child_ast, load_frame)?;
          extension_children.push(child);
        }
        self.modules.get_mut(id).extensions.push(TagExtension {
          target: target_tag,
          children: extension_children,
        });
        Ok(())
      }

      Definition::Entry { body } => {
        self.modules.get_mut(id).entry = Some(body.clone());
        Ok(())
      }
    }
  }

  fn materialize_tag(
    &mut self,
    id: ModuleId,
    parent: Option<&RcTag>,
    ast: &TagDefAst,
    load_frame: FrameId,
  ) -> Result<RcTag, LoadError> {
    let serial = self.next_definition_serial();
    let tag = match parent {
      Some(parent) => TagDef::child(parent, ast.name.clone(), serial, id, ast.private),
      None => TagDef::root(ast.name.clone(), serial, id, ast.private),
    };
    self.assign_tag_value(&tag, ast, load_frame);
    self.index_tag(id, &tag)?;

    for child_ast in ast.children.iter() {
      self.materialize_tag(id, Some(&tag), child_ast, load_frame)?;
    }
    Ok(tag)
  }

  fn materialize_extension_child(
    &mut self,
    id: ModuleId,
    target: &RcTag,
    ast: &TagDefAst,
    load_frame: FrameId,
  ) -> Result<RcTag, LoadError> {
    let serial = self.next_definition_serial();
    let tag = TagDef::extension_child(target, ast.name.clone(), serial, id, ast.private);
    self.assign_tag_value(&tag, ast, load_frame);
    self.index_tag(id, &tag)?;

    // Grandchildren of an extension attach as ordinary children of the new tag.
    for child_ast in ast.children.iter() {
      self.materialize_tag(id, Some(&tag), child_ast, load_frame)?;
    }
    Ok(tag)
  }

  /// Evaluates the tag's constant value or generator, in the pure+disarmed load frame. A
  /// failure-tagged result is stored like any other value.
  fn assign_tag_value(&mut self, tag: &RcTag, ast: &TagDefAst, load_frame: FrameId) {
    let value = if let Some(expr) = &ast.value {
      Some(self.eval_expr(expr, load_frame))
    } else if let Some(generator) = &ast.generator {
      let context = Value::structure(vec![Field::named(
        "tag",
        Value::string(tag.path_string().as_str()),
      )]);
      Some(self.eval_call(generator, context, load_frame))
    } else {
      None
    };
    if let Some(value) = value {
      if tag.set_value(value).is_err() {
        warning!(1, "tag {} already carried a value; generator result dropped", tag);
      }
    }
  }

  fn index_tag(&mut self, id: ModuleId, tag: &RcTag) -> Result<(), LoadError> {
    let key = IString::from(tag.path_string().as_str());
    let module = self.modules.get_mut(id);
    if module.tags.insert(key.clone(), tag.clone()).is_some() {
      return Err(LoadError::DuplicateDefinition { module: module.name.clone(), name: key });
    }
    Ok(())
  }

  pub(crate) fn resolve_shape_ref(&mut self, id: ModuleId, reference: &ShapeRef) -> Result<RcShape, LoadError> {
    match reference {
      ShapeRef::Named { module: Some(qualifier), name } => {
        let target = self.modules.id_by_name(qualifier).ok_or_else(|| LoadError::UnknownName {
          module: self.modules.get(id).name.clone(),
          name: qualifier.clone(),
        })?;
        self.ensure_loaded(target)?;
        let shape = self.modules.get(target).shapes.get(name).cloned();
        match shape {
          Some(shape) if target == id || !shape.private => Ok(shape),
          _ => Err(LoadError::UnknownName {
            module: self.modules.get(id).name.clone(),
            name: name.clone(),
          }),
        }
      }

      ShapeRef::Named { module: None, name } => {
        self.lookup_shape(id, name).ok_or_else(|| LoadError::UnknownName {
          module: self.modules.get(id).name.clone(),
          name: name.clone(),
        })
      }

      ShapeRef::Inline(literal) => self.materialize_shape_literal(id, None, literal, false),
    }
  }

  pub(crate) fn materialize_shape_literal(
    &mut self,
    id: ModuleId,
    name: Option<IString>,
    literal: &ShapeLiteral,
    private: bool,
  ) -> Result<RcShape, LoadError> {
    let mut fields = Vec::with_capacity(literal.fields.len());
    for field in literal.fields.iter() {
      let constraint = match &field.constraint {
        Some(reference) => Some(self.resolve_constraint(id, reference)?),
        None => None,
      };
      fields.push(ShapeField {
        name: field.name.clone(),
        constraint,
        default: field.default.clone(),
        presence_only: field.presence_only,
        checks: field.checks.clone(),
        cardinality: field.cardinality,
      });
    }

    Ok(Rc::new(ShapeDef {
      name,
      fields,
      accept_extras: literal.accept_extras,
      module: id,
      private,
    }))
  }

  fn resolve_constraint(&mut self, id: ModuleId, reference: &ConstraintRef) -> Result<TypeConstraint, LoadError> {
    match reference {
      ConstraintRef::Any           => Ok(TypeConstraint::Any),
      ConstraintRef::Number        => Ok(TypeConstraint::Number),
      ConstraintRef::String        => Ok(TypeConstraint::String),
      ConstraintRef::Boolean       => Ok(TypeConstraint::Boolean),
      ConstraintRef::BlockValue    => Ok(TypeConstraint::BlockValue),
      ConstraintRef::FunctionValue => Ok(TypeConstraint::FunctionValue),

      ConstraintRef::Tag { path } => {
        self.lookup_tag(id, path).map(TypeConstraint::Tag).ok_or_else(|| LoadError::UnknownName {
          module: self.modules.get(id).name.clone(),
          name: IString::from(join_string(path.iter(), ".").as_str()),
        })
      }

      ConstraintRef::Handle { module: qualifier, name } => {
        let def = match qualifier {
          Some(qualifier) => {
            let target = self.modules.id_by_name(qualifier).and_then(|target| {
              let def = self.modules.get(target).handle_defs.get(name).cloned();
              def.filter(|d| target == id || !d.private)
            });
            target
          }
          None => self.lookup_handle_def(id, name),
        };
        def.map(TypeConstraint::Handle).ok_or_else(|| LoadError::UnknownName {
          module: self.modules.get(id).name.clone(),
          name: name.clone(),
        })
      }

      ConstraintRef::Shape { module: qualifier, name } => {
        let reference = ShapeRef::Named { module: qualifier.clone(), name: name.clone() };
        self.resolve_shape_ref(id, &reference).map(TypeConstraint::Shape)
      }
    }
  }

  fn materialize_native(&mut self, id: ModuleId, spec: NativeSpec) -> Result<(), LoadError> {
    let input_shape = self.resolve_shape_ref(id, &spec.input_shape)?;
    let args_shape = self.resolve_shape_ref(id, &spec.args_shape)?;

    let module = self.modules.get_mut(id);
    let family = module
        .functions
        .entry(spec.name.clone())
        .or_insert_with(|| FunctionFamily::new(spec.name.clone()));
    let serial = family.next_serial();
    family.add(Overload {
      name: spec.name,
      module: id,
      serial,
      input_shape,
      args_shape,
      strength: spec.strength,
      pure: spec.pure,
      private: spec.private,
      body: FunctionBody::Native(spec.function),
    });
    Ok(())
  }

  // region Lookup

  /// Tag lookup by dotted path: own module, then builtin, then imports (public names only).
  pub(crate) fn lookup_tag(&self, from: ModuleId, path: &[IString]) -> Option<RcTag> {
    let key = IString::from(join_string(path.iter(), ".").as_str());
    let module = self.modules.get(from);
    if let Some(tag) = module.tags.get(&key) {
      return Some(tag.clone());
    }
    if let Some(tag) = self.modules.get(self.builtins.module).tags.get(&key) {
      if !tag.private {
        return Some(tag.clone());
      }
    }
    for &import in module.imports.iter() {
      if let Some(tag) = self.modules.get(import).tags.get(&key) {
        if !tag.private {
          return Some(tag.clone());
        }
      }
    }
    None
  }

  pub(crate) fn lookup_shape(&self, from: ModuleId, name: &IString) -> Option<RcShape> {
    let module = self.modules.get(from);
    if let Some(shape) = module.shapes.get(name) {
      return Some(shape.clone());
    }
    if let Some(shape) = self.modules.get(self.builtins.module).shapes.get(name) {
      if !shape.private {
        return Some(shape.clone());
      }
    }
    for &import in module.imports.iter() {
      if let Some(shape) = self.modules.get(import).shapes.get(name) {
        if !shape.private {
          return Some(shape.clone());
        }
      }
    }
    None
  }

  pub(crate) fn lookup_handle_def(&self, from: ModuleId, name: &IString) -> Option<RcHandleDef> {
    let module = self.modules.get(from);
    if let Some(def) = module.handle_defs.get(name) {
      return Some(def.clone());
    }
    for &import in module.imports.iter() {
      if let Some(def) = self.modules.get(import).handle_defs.get(name) {
        if !def.private {
          return Some(def.clone());
        }
      }
    }
    None
  }

  /// Collects the candidate overloads for an unqualified call: the caller's module first (all
  /// of them), then builtin and imported families (public overloads only).
  pub(crate) fn lookup_family(&self, from: ModuleId, name: &IString) -> Vec<RcOverload> {
    let mut candidates = Vec::new();
    let module = self.modules.get(from);
    if let Some(family) = module.functions.get(name) {
      candidates.extend(family.overloads.iter().cloned());
    }
    if from != self.builtins.module {
      if let Some(family) = self.modules.get(self.builtins.module).functions.get(name) {
        candidates.extend(family.overloads.iter().filter(|o| !o.private).cloned());
      }
    }
    for &import in module.imports.iter() {
      if let Some(family) = self.modules.get(import).functions.get(name) {
        candidates.extend(family.overloads.iter().filter(|o| !o.private).cloned());
      }
    }
    candidates
  }

  /// Candidates drawn from one specific module, as in qualified calls and polymorphic tag
  /// dispatch. Private overloads are visible only when the caller is that module.
  pub(crate) fn lookup_family_in(&self, target: ModuleId, from: ModuleId, name: &IString) -> Vec<RcOverload> {
    match self.modules.get(target).functions.get(name) {
      Some(family) if target == from => family.overloads.to_vec(),
      Some(family) => family.overloads.iter().filter(|o| !o.private).cloned().collect(),
      None => Vec::new(),
    }
  }

  /// The module's view of the tag forest: its own extension deltas plus those of its transitive
  /// imports.
  pub(crate) fn tag_view(&self, from: ModuleId) -> TagView<'_> {
    let mut extensions = Vec::new();
    let mut visited = vec![false; self.modules.len()];
    let mut queue = vec![from];

    while let Some(current) = queue.pop() {
      if visited[current.as_index()] {
        continue;
      }
      visited[current.as_index()] = true;
      let module = self.modules.get(current);
      extensions.extend(module.extensions.iter());
      queue.extend(module.imports.iter().copied());
    }
    TagView::new(extensions)
  }

  // endregion

  /// Writes a module-scope slot under the assignment strength rules. The value's handles are
  /// registered to the root frame; module values live for the rest of the run.
  pub(crate) fn bind_module_slot(
    &mut self,
    id: ModuleId,
    name: IString,
    strength: Strength,
    value: RcValue,
    runtime_slot: bool,
  ) -> Result<(), RcValue> {
    let root = self.root_frame;
    self.register_value(root, &value);

    let module = self.modules.get_mut(id);
    if module.scope.contains_key(&name) {
      match strength {
        Strength::Weak => return Ok(()),
        Strength::Normal => {
          return Err(failure_value(
            &self.builtins.kinds.rebound_variable,
            &format!("module slot {} is already bound", name),
          ));
        }
        Strength::Strong => {}
      }
    }
    module.scope.insert(name, ModuleSlot { value, runtime: runtime_slot });
    Ok(())
  }

  /// Runs the module's `!entry` block if it has not run yet. Entry runs only for non-pure
  /// callers and is the one place runtime state lands in the module scope.
  pub(crate) fn run_entry(&mut self, id: ModuleId, caller: FrameId) {
    if self.frames.get(caller).is_pure() {
      return;
    }
    if self.modules.get(id).entry_ran {
      return;
    }
    let Some(body) = self.modules.get(id).entry.clone() else {
      return;
    };
    self.modules.get_mut(id).entry_ran = true;

    let frame = self.push_frame(
      FrameParent::Frame(self.root_frame),
      id,
      Default::default(),
      Value::empty_structure(),
    );
    let previous_write = self.module_write.replace((id, true));
    let result = self.eval_statements(&body, frame);
    if result.is_failure() {
      warning!(1, "module {} entry block failed: {}", self.modules.get(id).name, result);
    }
    self.module_write = previous_write;
    self.pop_frame(frame);
  }

  /// Wraps a host-level load error into the in-language `module-load` failure.
  pub(crate) fn load_failure(&self, error: LoadError) -> RcValue {
    self.builtins.kinds.module_load_value(&error.to_string())
  }
}
