/*!

The value universe. A `Value` is an immutable datum: number, string, boolean, tag reference,
handle reference, block, function reference, or structure. All operations produce new values;
mutation is forbidden. Equality and ordering are total and side-effect-free.

Two facts about every value are computed once at construction and cached:

 - `handles()`: the set of live handle references reachable through the value. For non-structure
   leaves this is trivially the singleton set for a `HandleRef` and empty otherwise; a structure
   unions its children's sets.
 - `is_failure()`: whether the value is a structure with at least one *unnamed* field whose
   value carries a `#fail`-descended tag, transitively (an unnamed field holding a failure is
   itself a failure). A fail-descended tag sitting in a *named* field does not make the
   enclosing structure a failure; that asymmetry is what lets user code carry failure
   information without tripping propagation.

*/

use std::cmp::Ordering;
use std::fmt::{Debug, Display, Formatter};
use std::rc::Rc;

use total_float_wrap::TotalF64;

use crate::{
  abstractions::{join_string, IString, NatSet},
  api::ast::{Expr, Statement},
  core::{
    frame::ScopeSnapshot,
    handle::HandleId,
    module::ModuleId,
    tag::RcTag,
  },
};

pub type RcValue = Rc<Value>;

#[derive(Clone, Debug)]
pub enum Value {
  Number(TotalF64),
  String(IString),
  Boolean(bool),
  Tag(RcTag),
  Handle(HandleId),
  Block(RcBlock),
  Function(FunctionRef),
  Structure(Structure),
}

impl Value {
  pub fn number(n: f64) -> RcValue {
    Rc::new(Value::Number(TotalF64::from(n)))
  }

  pub fn string(s: impl Into<IString>) -> RcValue {
    Rc::new(Value::String(s.into()))
  }

  pub fn boolean(b: bool) -> RcValue {
    Rc::new(Value::Boolean(b))
  }

  pub fn tag(tag: RcTag) -> RcValue {
    Rc::new(Value::Tag(tag))
  }

  pub fn handle(id: HandleId) -> RcValue {
    Rc::new(Value::Handle(id))
  }

  pub fn structure(fields: Vec<Field>) -> RcValue {
    Rc::new(Value::Structure(Structure::new(fields)))
  }

  pub fn empty_structure() -> RcValue {
    Rc::new(Value::Structure(Structure::default()))
  }

  /// The promotion rule: a non-structure value acting as pipeline input is treated as a
  /// single-element unnamed-field structure.
  pub fn promote(value: &RcValue) -> RcValue {
    match &**value {
      Value::Structure(_) => value.clone(),
      _ => Value::structure(vec![Field::unnamed(value.clone())]),
    }
  }

  /// True iff the value is a structure carrying a `#fail`-descended tag in an unnamed field.
  #[inline(always)]
  pub fn is_failure(&self) -> bool {
    match self {
      Value::Structure(s) => s.is_failure(),
      _ => false,
    }
  }

  /// Union this value's cached handle set into `out`.
  pub fn collect_handles(&self, out: &mut NatSet) {
    match self {
      Value::Handle(id) => {
        out.insert(id.as_index());
      }
      Value::Structure(s) => out.union_in_place(s.handles()),
      _ => {}
    }
  }

  /// The set of handle references reachable through this value.
  pub fn handles(&self) -> NatSet {
    let mut set = NatSet::new();
    self.collect_handles(&mut set);
    set
  }

  // region Accessors

  pub fn as_number(&self) -> Option<f64> {
    match self {
      Value::Number(n) => Some(n.0),
      _ => None,
    }
  }

  pub fn as_string(&self) -> Option<&IString> {
    match self {
      Value::String(s) => Some(s),
      _ => None,
    }
  }

  /// Booleans proper, and tags whose constant value is a boolean (`#true`/`#false`).
  pub fn as_boolean(&self) -> Option<bool> {
    match self {
      Value::Boolean(b) => Some(*b),
      Value::Tag(tag) => match tag.value().as_deref() {
        Some(Value::Boolean(b)) => Some(*b),
        _ => None,
      },
      _ => None,
    }
  }

  pub fn as_tag(&self) -> Option<&RcTag> {
    match self {
      Value::Tag(tag) => Some(tag),
      _ => None,
    }
  }

  pub fn as_handle(&self) -> Option<HandleId> {
    match self {
      Value::Handle(id) => Some(*id),
      _ => None,
    }
  }

  pub fn as_block(&self) -> Option<&RcBlock> {
    match self {
      Value::Block(block) => Some(block),
      _ => None,
    }
  }

  pub fn as_structure(&self) -> Option<&Structure> {
    match self {
      Value::Structure(s) => Some(s),
      _ => None,
    }
  }

  /// The kind of the value as a lowercase noun, for diagnostics.
  pub fn kind_name(&self) -> &'static str {
    match self {
      Value::Number(_)    => "number",
      Value::String(_)    => "string",
      Value::Boolean(_)   => "boolean",
      Value::Tag(_)       => "tag",
      Value::Handle(_)    => "handle",
      Value::Block(_)     => "block",
      Value::Function(_)  => "function",
      Value::Structure(_) => "structure",
    }
  }

  // endregion

  /// Rank of the variant for cross-variant ordering. Within a variant, ordering is defined per
  /// kind; across variants, rank decides.
  fn variant_rank(&self) -> u8 {
    match self {
      Value::Number(_)    => 0,
      Value::String(_)    => 1,
      Value::Boolean(_)   => 2,
      Value::Tag(_)       => 3,
      Value::Handle(_)    => 4,
      Value::Block(_)     => 5,
      Value::Function(_)  => 6,
      Value::Structure(_) => 7,
    }
  }
}

impl PartialEq for Value {
  fn eq(&self, other: &Value) -> bool {
    match (self, other) {
      (Value::Number(a), Value::Number(b)) => a == b,
      (Value::String(a), Value::String(b)) => a == b,
      (Value::Boolean(a), Value::Boolean(b)) => a == b,
      (Value::Tag(a), Value::Tag(b)) => a.same(b),
      (Value::Handle(a), Value::Handle(b)) => a == b,
      (Value::Block(a), Value::Block(b)) => a.serial == b.serial,
      (Value::Function(a), Value::Function(b)) => a == b,
      (Value::Structure(a), Value::Structure(b)) => a == b,
      _ => false,
    }
  }
}

impl Eq for Value {}

impl PartialOrd for Value {
  fn partial_cmp(&self, other: &Value) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for Value {
  fn cmp(&self, other: &Value) -> Ordering {
    match (self, other) {
      (Value::Number(a), Value::Number(b)) => a.0.total_cmp(&b.0),
      (Value::String(a), Value::String(b)) => (**a).cmp(&**b),
      (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
      (Value::Tag(a), Value::Tag(b)) => a.compare(b),
      (Value::Handle(a), Value::Handle(b)) => a.cmp(b),
      (Value::Block(a), Value::Block(b)) => a.serial.cmp(&b.serial),
      (Value::Function(a), Value::Function(b)) => a
          .module
          .cmp(&b.module)
          .then_with(|| (*a.name).cmp(&*b.name)),
      (Value::Structure(a), Value::Structure(b)) => a.compare(b),
      _ => self.variant_rank().cmp(&other.variant_rank()),
    }
  }
}

impl Display for Value {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      Value::Number(n) => write!(f, "{}", n.0),
      Value::String(s) => write!(f, "{:?}", &**s),
      Value::Boolean(b) => write!(f, "{}", b),
      Value::Tag(tag) => write!(f, "{}", tag),
      Value::Handle(id) => write!(f, "handle({})", id.as_index()),
      Value::Block(block) => write!(f, "block({})", block.serial),
      Value::Function(func) => write!(f, "fn {}", func.name),
      Value::Structure(s) => write!(f, "{}", s),
    }
  }
}


/// One field of a structure: an optional name and a value. Insertion order is preserved;
/// names are unique when present.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field {
  pub name:  Option<IString>,
  pub value: RcValue,
}

impl Field {
  pub fn named(name: impl Into<IString>, value: RcValue) -> Field {
    Field { name: Some(name.into()), value }
  }

  pub fn unnamed(value: RcValue) -> Field {
    Field { name: None, value }
  }
}

impl Display for Field {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match &self.name {
      Some(name) => write!(f, "{}: {}", name, self.value),
      None => write!(f, "{}", self.value),
    }
  }
}


/// An ordered sequence of optionally named fields. The primary composite data shape.
#[derive(Clone, Debug, Default)]
pub struct Structure {
  fields:  Vec<Field>,
  handles: NatSet,
  failure: bool,
}

impl Structure {
  pub fn new(fields: Vec<Field>) -> Structure {
    let mut handles = NatSet::new();
    let mut failure = false;

    for field in fields.iter() {
      field.value.collect_handles(&mut handles);
      if field.name.is_none() {
        failure = failure
            || match &*field.value {
              Value::Tag(tag) => tag.is_fail_kind(),
              Value::Structure(s) => s.is_failure(),
              _ => false,
            };
      }
    }

    Structure { fields, handles, failure }
  }

  #[inline(always)]
  pub fn fields(&self) -> &[Field] {
    &self.fields
  }

  #[inline(always)]
  pub fn len(&self) -> usize {
    self.fields.len()
  }

  #[inline(always)]
  pub fn is_empty(&self) -> bool {
    self.fields.is_empty()
  }

  #[inline(always)]
  pub fn handles(&self) -> &NatSet {
    &self.handles
  }

  #[inline(always)]
  pub fn is_failure(&self) -> bool {
    self.failure
  }

  /// The value of the named field, if present.
  pub fn named(&self, name: &IString) -> Option<&RcValue> {
    self
        .fields
        .iter()
        .find(|field| field.name.as_ref() == Some(name))
        .map(|field| &field.value)
  }

  /// Unnamed fields in insertion order.
  pub fn unnamed(&self) -> impl Iterator<Item = &RcValue> {
    self
        .fields
        .iter()
        .filter(|field| field.name.is_none())
        .map(|field| &field.value)
  }

  /// The `index`th unnamed field.
  pub fn unnamed_at(&self, index: usize) -> Option<&RcValue> {
    self.unnamed().nth(index)
  }

  /// Lexicographic ordering: named fields sorted by name compared first, ties broken by the
  /// unnamed sequence.
  pub fn compare(&self, other: &Structure) -> Ordering {
    let mut lhs_named: Vec<&Field> = self.fields.iter().filter(|f| f.name.is_some()).collect();
    let mut rhs_named: Vec<&Field> = other.fields.iter().filter(|f| f.name.is_some()).collect();
    lhs_named.sort_by(|a, b| name_order(&a.name, &b.name));
    rhs_named.sort_by(|a, b| name_order(&a.name, &b.name));

    for (a, b) in lhs_named.iter().zip(rhs_named.iter()) {
      let ordering = name_order(&a.name, &b.name).then_with(|| a.value.cmp(&b.value));
      if ordering != Ordering::Equal {
        return ordering;
      }
    }
    let ordering = lhs_named.len().cmp(&rhs_named.len());
    if ordering != Ordering::Equal {
      return ordering;
    }

    // Tie: compare the unnamed sequences pointwise.
    for (a, b) in self.unnamed().zip(other.unnamed()) {
      let ordering = a.cmp(b);
      if ordering != Ordering::Equal {
        return ordering;
      }
    }
    self.unnamed().count().cmp(&other.unnamed().count())
  }
}

fn name_order(a: &Option<IString>, b: &Option<IString>) -> Ordering {
  match (a, b) {
    (Some(a), Some(b)) => (**a).cmp(&**b),
    (Some(_), None) => Ordering::Greater,
    (None, Some(_)) => Ordering::Less,
    (None, None) => Ordering::Equal,
  }
}

impl PartialEq for Structure {
  /// Named field sets compare order-insensitively; unnamed sequences compare pointwise.
  fn eq(&self, other: &Structure) -> bool {
    let lhs_named = self.fields.iter().filter(|f| f.name.is_some());
    let rhs_named_count = other.fields.iter().filter(|f| f.name.is_some()).count();

    let mut lhs_named_count = 0;
    for field in lhs_named {
      lhs_named_count += 1;
      match other.named(field.name.as_ref().unwrap()) {
        Some(value) if *value == field.value => {}
        _ => return false,
      }
    }
    if lhs_named_count != rhs_named_count {
      return false;
    }

    self.unnamed().eq(other.unnamed())
  }
}

impl Eq for Structure {}

impl Display for Structure {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "{{{}}}", join_string(self.fields.iter(), ", "))
  }
}


/// A deferred fragment of a function body with a captured scope snapshot and a captured purity
/// flag. Invoking the block runs the body against the snapshot, not the invoker's frame; the
/// captured purity is not weakened by a non-pure invoker.
pub struct BlockValue {
  /// Creation order; block identity.
  pub serial:   u32,
  pub body:     BlockBody,
  pub captured: Rc<ScopeSnapshot>,
  pub pure:     bool,
}

/// Statement-list blocks come from block literals; expression blocks come from lazy structure
/// literals deferring one field.
pub enum BlockBody {
  Statements(Rc<Vec<Statement>>),
  Expression(Rc<Expr>),
}

pub type RcBlock = Rc<BlockValue>;

impl Debug for BlockValue {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "block({})", self.serial)
  }
}


/// A reference to a named, overloaded function family.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionRef {
  pub module: ModuleId,
  pub name:   IString,
}


#[cfg(test)]
mod tests {
  use rand::Rng;

  use super::*;
  use crate::core::tag::TagDef;

  fn sample_scalar(depth: usize) -> RcValue {
    let mut rng = rand::thread_rng();
    match rng.gen_range(0..=2) {
      0 => Value::number(rng.gen_range(-100..100) as f64),
      1 => Value::string(format!("s{}", rng.gen_range(0..10)).as_str()),
      _ => Value::boolean(depth % 2 == 0),
    }
  }

  /// Builds a random structure tree. Scalars only; handle and tag leaves are exercised by
  /// their own modules' tests.
  fn random_structure(depth: usize) -> RcValue {
    let mut rng = rand::thread_rng();
    let width = rng.gen_range(0..4);
    let mut fields = Vec::with_capacity(width);
    for i in 0..width {
      let value = if depth > 0 && rng.gen_range(0..3) == 0 {
        random_structure(depth - 1)
      } else {
        sample_scalar(depth)
      };
      if rng.gen_range(0..2) == 0 {
        fields.push(Field::named(format!("f{}", i).as_str(), value));
      } else {
        fields.push(Field::unnamed(value));
      }
    }
    Value::structure(fields)
  }

  #[test]
  fn equality_is_reflexive_and_ordering_total() {
    for _ in 0..64 {
      let a = random_structure(3);
      let b = random_structure(3);

      assert_eq!(a, a);
      assert_eq!(a.cmp(&a), Ordering::Equal);
      // Antisymmetry of the total order.
      assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
      if a == b {
        assert_eq!(a.cmp(&b), Ordering::Equal);
      }
    }
  }

  #[test]
  fn named_field_equality_is_order_insensitive() {
    let a = Value::structure(vec![
      Field::named("x", Value::number(1.0)),
      Field::named("y", Value::number(2.0)),
      Field::unnamed(Value::string("tail")),
    ]);
    let b = Value::structure(vec![
      Field::named("y", Value::number(2.0)),
      Field::named("x", Value::number(1.0)),
      Field::unnamed(Value::string("tail")),
    ]);
    assert_eq!(a, b);
    assert_eq!(a.cmp(&b), Ordering::Equal);
  }

  #[test]
  fn unnamed_field_equality_is_pointwise() {
    let a = Value::structure(vec![
      Field::unnamed(Value::number(1.0)),
      Field::unnamed(Value::number(2.0)),
    ]);
    let b = Value::structure(vec![
      Field::unnamed(Value::number(2.0)),
      Field::unnamed(Value::number(1.0)),
    ]);
    assert_ne!(a, b);
  }

  #[test]
  fn promotion_wraps_non_structures() {
    let n = Value::number(42.0);
    let promoted = Value::promote(&n);
    let s = promoted.as_structure().unwrap();
    assert_eq!(s.len(), 1);
    assert_eq!(s.unnamed_at(0).unwrap().as_number(), Some(42.0));

    // Structures promote to themselves.
    let s = Value::empty_structure();
    assert!(Rc::ptr_eq(&s, &Value::promote(&s)));
  }

  #[test]
  fn failure_requires_unnamed_fail_tag() {
    let fail_tag = TagDef::fail_root_for_tests();
    let failure = Value::structure(vec![Field::unnamed(Value::tag(fail_tag.clone()))]);
    assert!(failure.is_failure());

    // The same tag in a named field is contained.
    let contained = Value::structure(vec![Field::named("err", Value::tag(fail_tag.clone()))]);
    assert!(!contained.is_failure());

    // An unnamed field holding a failure is itself a failure.
    let nested = Value::structure(vec![Field::unnamed(failure)]);
    assert!(nested.is_failure());

    // A failure buried under a named field is contained, even when nested.
    let buried = Value::structure(vec![Field::named(
      "inner",
      Value::structure(vec![Field::unnamed(Value::tag(fail_tag))]),
    )]);
    assert!(!buried.is_failure());
  }

  #[test]
  fn handle_sets_union_through_structures() {
    let h3 = Value::handle(HandleId::from_index(3));
    let h5 = Value::handle(HandleId::from_index(5));
    let composite = Value::structure(vec![
      Field::named("a", h3),
      Field::unnamed(Value::structure(vec![Field::unnamed(h5)])),
      Field::unnamed(Value::number(1.0)),
    ]);

    let handles = composite.handles();
    assert!(handles.contains(3));
    assert!(handles.contains(5));
    assert_eq!(handles.len(), 2);
  }

  #[test]
  fn display_renders_comp_notation() {
    let v = Value::structure(vec![
      Field::named("host", Value::string("localhost")),
      Field::unnamed(Value::number(8080.0)),
    ]);
    assert_eq!(v.to_string(), "{host: \"localhost\", 8080}");
  }
}
