/*!

The AST contract between the parser and the evaluator. The evaluator consumes a pre-built,
immutable tree of these nodes; tokenization and parsing live outside the core.

Two representation choices the surface docs leave open are pinned down here:

 - Field access after index access has an explicit node (`Expr::FieldAccess` with a
   [`Selector`]); chaining is nesting, so no parenthesization question reaches the core.
 - Morph operators and scope prefixes arrive as [`MorphKind`](crate::api::MorphKind) and
   [`ScopeKind`](crate::api::ScopeKind) values, whatever their spelling in source.

*/

use std::rc::Rc;

use crate::{
  abstractions::IString,
  api::{MorphKind, ScopeKind, Strength},
};

pub type BxExpr = Box<Expr>;

/// A literal constant. Tag literals are a separate node (`Expr::TagRef`) because they resolve
/// against the module's tag namespace.
#[derive(Clone, Debug)]
pub enum Literal {
  Number(f64),
  String(IString),
  Boolean(bool),
}

/// Addresses one field of a structure, by name or by ordinal position among unnamed fields.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Selector {
  Name(IString),
  Index(usize),
}

#[derive(Clone, Debug)]
pub enum Expr {
  Literal(Literal),
  /// Unqualified or scope-qualified name lookup.
  Identifier { scope: Option<ScopeKind>, name: IString },
  /// A tag reference, e.g. `#fail.shape-mismatch`.
  TagRef { path: Vec<IString> },
  /// A reference to a function family in the current module.
  FunctionRef { name: IString },
  FieldAccess { base: BxExpr, selector: Selector },
  StructureLiteral { fields: Vec<FieldInit> },
  /// Like a structure literal, but each field expression is deferred as a block capturing the
  /// current frame.
  LazyStructureLiteral { fields: Vec<FieldInit> },
  Block { body: Rc<Vec<Statement>> },
  Pipeline(Box<Pipeline>),
  /// Evaluate the inner expression with failure propagation suppressed.
  Disarm(BxExpr),
  /// Evaluates to a `not-implemented` failure.
  Placeholder,
}

/// One entry of a structure literal.
#[derive(Clone, Debug)]
pub enum FieldInit {
  Field { name: Option<IString>, value: Expr },
  /// Merge the fields of the evaluated structure into the literal under the given strength.
  Spread { strength: Strength, value: Expr },
}

/// An ordered sequence of operations threading a value left to right. An absent seed means the
/// pipeline starts from its context's initial value: the function input in statement position,
/// the empty structure in expression position.
#[derive(Clone, Debug, Default)]
pub struct Pipeline {
  pub seed: Option<Expr>,
  pub ops:  Vec<PipelineOp>,
}

impl Pipeline {
  /// A pipeline that evaluates `seed` and applies no operations.
  pub fn seeded(seed: Expr) -> Pipeline {
    Pipeline { seed: Some(seed), ops: Vec::new() }
  }
}

#[derive(Clone, Debug)]
pub enum PipelineOp {
  /// A function call whose input is the current pipeline value.
  Operation(Call),
  /// Morph the current value against a shape.
  Morph { shape: ShapeRef, kind: MorphKind },
  /// Catches a failure flowing down the pipeline; skipped when the value is not a failure.
  Fallback { handler: Expr },
  /// Suppresses failure checks for the remainder of the pipeline.
  Disarm,
}

#[derive(Clone, Debug)]
pub struct Call {
  pub target: CallTarget,
  pub args:   Option<Expr>,
}

impl Call {
  /// A call to `name` in the current module with no arguments.
  pub fn named(name: impl Into<IString>) -> Call {
    Call {
      target: CallTarget::Named { module: None, name: name.into() },
      args:   None,
    }
  }
}

#[derive(Clone, Debug)]
pub enum CallTarget {
  Named { module: Option<IString>, name: IString },
  /// Dispatch drawn from the function family of the module defining the tag found at
  /// `tag_field` of the input value.
  TagDispatch { name: IString, tag_field: Selector },
}

/// A shape in referencing position: by name, or written inline.
#[derive(Clone, Debug)]
pub enum ShapeRef {
  Named { module: Option<IString>, name: IString },
  Inline(Rc<ShapeLiteral>),
}

#[derive(Clone, Debug, Default)]
pub struct ShapeLiteral {
  pub fields:        Vec<ShapeFieldLiteral>,
  pub accept_extras: bool,
}

#[derive(Clone, Debug)]
pub struct ShapeFieldLiteral {
  pub name:          Option<IString>,
  pub constraint:    Option<ConstraintRef>,
  /// Evaluated lazily in the surrounding scope chain when the field stays unbound.
  pub default:       Option<Rc<Expr>>,
  /// The field is satisfied by mere presence; no constraint is applied to its value.
  pub presence_only: bool,
  /// Pure predicates applied to the bound value after type binding.
  pub checks:        Vec<Rc<Expr>>,
  pub cardinality:   Cardinality,
}

impl ShapeFieldLiteral {
  /// A named field with a constraint and no default.
  pub fn required(name: impl Into<IString>, constraint: ConstraintRef) -> ShapeFieldLiteral {
    ShapeFieldLiteral {
      name:          Some(name.into()),
      constraint:    Some(constraint),
      default:       None,
      presence_only: false,
      checks:        Vec::new(),
      cardinality:   Cardinality::One,
    }
  }

  pub fn with_default(mut self, default: Expr) -> ShapeFieldLiteral {
    self.default = Some(Rc::new(default));
    self
  }
}

/// How many positional source fields a shape field consumes.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub enum Cardinality {
  #[default]
  One,
  ZeroOrMore,
  OneOrMore,
}

/// An unresolved type constraint as the parser spells it. The module loader resolves these
/// against the tag/shape/handle namespaces.
#[derive(Clone, Debug)]
pub enum ConstraintRef {
  Any,
  Number,
  String,
  Boolean,
  BlockValue,
  FunctionValue,
  Tag { path: Vec<IString> },
  Handle { module: Option<IString>, name: IString },
  Shape { module: Option<IString>, name: IString },
}

/// One statement of a function body. Every statement sees the function's input value as its
/// initial pipeline value.
#[derive(Clone, Debug)]
pub enum Statement {
  /// Assignment to a named output field.
  NamedField { name: IString, strength: Strength, pipeline: Pipeline },
  /// Assignment to an unnamed output slot (appending).
  Append { pipeline: Pipeline },
  /// Assignment to a local variable.
  Variable { name: IString, strength: Strength, pipeline: Pipeline },
  /// Assignment to a scope variable (context or module).
  Scoped { scope: ScopeKind, name: IString, strength: Strength, pipeline: Pipeline },
  /// Merge the fields of the pipeline's structure result into the output.
  Spread { strength: Strength, pipeline: Pipeline },
  /// A bare pipeline; contributes an unnamed field.
  Bare { pipeline: Pipeline },
}

/// A module-level definition, materialized in order at load.
#[derive(Clone, Debug)]
pub enum Definition {
  Tag(TagDefAst),
  Shape(ShapeDefAst),
  Handle(HandleDefAst),
  Function(FunctionDefAst),
  /// Module-level assignment; evaluates at load in a pure, disarmed frame.
  ModuleAssign { name: IString, strength: Strength, pipeline: Pipeline },
  Import { module: IString },
  /// Add children to an imported tag. Visible to this module and its importers, not to the
  /// defining module.
  ExtendTag { target: Vec<IString>, children: Vec<TagDefAst> },
  /// The `!entry` block: runs once on first external reference in a non-pure frame.
  Entry { body: Rc<Vec<Statement>> },
}

#[derive(Clone, Debug)]
pub struct TagDefAst {
  pub name:      IString,
  /// Constant value, if any. Mutually exclusive with `generator`.
  pub value:     Option<Expr>,
  /// A pure function invocation computing the value at module load.
  pub generator: Option<Call>,
  pub children:  Vec<TagDefAst>,
  pub private:   bool,
}

impl TagDefAst {
  pub fn leaf(name: impl Into<IString>) -> TagDefAst {
    TagDefAst {
      name:      name.into(),
      value:     None,
      generator: None,
      children:  Vec::new(),
      private:   false,
    }
  }
}

#[derive(Clone, Debug)]
pub struct ShapeDefAst {
  pub name:    IString,
  pub literal: Rc<ShapeLiteral>,
  pub private: bool,
}

#[derive(Clone, Debug)]
pub struct HandleDefAst {
  pub name:    IString,
  pub private: bool,
}

#[derive(Clone, Debug)]
pub struct FunctionDefAst {
  pub name:        IString,
  pub input_shape: ShapeRef,
  pub args_shape:  ShapeRef,
  pub strength:    Strength,
  pub pure:        bool,
  pub private:     bool,
  pub body:        FunctionBodyAst,
}

#[derive(Clone, Debug)]
pub enum FunctionBodyAst {
  Statements(Rc<Vec<Statement>>),
  /// An explicit single-expression body; the function's value is that expression's value.
  Expression(Rc<Expr>),
}

/// A whole parsed module: a name plus its definitions in source order.
#[derive(Clone, Debug)]
pub struct ModuleAst {
  pub name:        IString,
  pub definitions: Vec<Definition>,
}
