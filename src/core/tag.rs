/*!

The tag registry. Tags form a forest of hierarchical, compile-time tokens. Each definition has a
qualified path, an optional constant value, children, the defining module, and a privacy flag.
Tag identity is by definition site; aliases compare equal to their aliased target.

## Lifecycle and Ownership

Tags are created while their defining module loads and are immutable thereafter (the value cell
is written at most once, at load). A tag holds a weak link to its parent and strong links to its
base children; ancestry queries walk parent links, which are view-independent.

## Cross-Module Extension

A module may extend an imported tag by adding children. Extensions are deltas recorded in the
*extending* module and merged into that module's [`TagView`]; the defining module does not see
them. Extensions may not change existing values, only add children. Because an extension child's
parent link points at the extended tag, `descends_from` needs no view at all; only enumeration
(children, descendants, pre-order value search) is view-filtered.

*/

use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt::{Debug, Display, Formatter};
use std::rc::{Rc, Weak};

use once_cell::unsync::OnceCell;

use crate::{
  abstractions::{join_string, IString},
  core::{
    module::ModuleId,
    value::{RcValue, Value},
  },
};

pub type RcTag = Rc<TagDef>;

pub struct TagDef {
  /// The last path segment.
  pub name:    IString,
  /// Full path, parent segments first.
  path:        Vec<IString>,
  /// Runtime-wide definition order; identity for equality.
  pub serial:  u32,
  /// Constant value, written at most once at module load (possibly by a generator function).
  value:       OnceCell<RcValue>,
  parent:      Option<Weak<TagDef>>,
  /// Children added by the defining module. Extension children live in [`TagExtension`] deltas.
  children:    RefCell<Vec<RcTag>>,
  pub module:  ModuleId,
  pub private: bool,
  /// Whether this tag is the `#fail` root or descends from it. Fixed at creation; parent links
  /// never change.
  fail_kind:   bool,
  /// Aliases resolve through this link for identity and value.
  alias_of:    Option<RcTag>,
}

impl TagDef {
  /// A root tag (no parent).
  pub fn root(name: impl Into<IString>, serial: u32, module: ModuleId, private: bool) -> RcTag {
    let name = name.into();
    Rc::new(TagDef {
      path: vec![name.clone()],
      name,
      serial,
      value: OnceCell::new(),
      parent: None,
      children: RefCell::new(Vec::new()),
      module,
      private,
      fail_kind: false,
      alias_of: None,
    })
  }

  /// The `#fail` root. Everything created under it is a failure kind.
  pub fn fail_root(serial: u32, module: ModuleId) -> RcTag {
    let name = IString::from("fail");
    Rc::new(TagDef {
      path: vec![name.clone()],
      name,
      serial,
      value: OnceCell::new(),
      parent: None,
      children: RefCell::new(Vec::new()),
      module,
      private: false,
      fail_kind: true,
      alias_of: None,
    })
  }

  /// A child of `parent`, registered into the parent's base children.
  pub fn child(
    parent: &RcTag,
    name: impl Into<IString>,
    serial: u32,
    module: ModuleId,
    private: bool,
  ) -> RcTag {
    let name = name.into();
    let mut path = parent.path.clone();
    path.push(name.clone());

    let tag = Rc::new(TagDef {
      name,
      path,
      serial,
      value: OnceCell::new(),
      parent: Some(Rc::downgrade(parent)),
      children: RefCell::new(Vec::new()),
      module,
      private,
      fail_kind: parent.fail_kind,
      alias_of: None,
    });
    parent.children.borrow_mut().push(tag.clone());
    tag
  }

  /// A child attached to `parent` but *not* registered into the parent's base children; the
  /// caller records it in a [`TagExtension`] delta instead.
  pub fn extension_child(
    parent: &RcTag,
    name: impl Into<IString>,
    serial: u32,
    module: ModuleId,
    private: bool,
  ) -> RcTag {
    let name = name.into();
    let mut path = parent.path.clone();
    path.push(name.clone());

    Rc::new(TagDef {
      name,
      path,
      serial,
      value: OnceCell::new(),
      parent: Some(Rc::downgrade(parent)),
      children: RefCell::new(Vec::new()),
      module,
      private,
      fail_kind: parent.fail_kind,
      alias_of: None,
    })
  }

  /// An alias for `target`. Compares equal to the target; shares its value.
  pub fn alias(
    name: impl Into<IString>,
    target: &RcTag,
    serial: u32,
    module: ModuleId,
    private: bool,
  ) -> RcTag {
    let name = name.into();
    Rc::new(TagDef {
      path: vec![name.clone()],
      name,
      serial,
      value: OnceCell::new(),
      parent: None,
      children: RefCell::new(Vec::new()),
      module,
      private,
      fail_kind: target.resolved().fail_kind,
      alias_of: Some(target.clone()),
    })
  }

  // region Accessors

  /// Follows the alias chain to the defining tag.
  pub fn resolved(&self) -> &TagDef {
    match &self.alias_of {
      Some(target) => target.resolved(),
      None => self,
    }
  }

  /// Equality by definition identity; aliases compare equal to their aliased target.
  #[inline(always)]
  pub fn same(&self, other: &TagDef) -> bool {
    self.resolved().serial == other.resolved().serial
  }

  /// Lexicographic by path segment, parent-first (a parent's path is a proper prefix of its
  /// children's paths). Distinct definitions with equal paths order by definition serial so the
  /// order stays total and consistent with `same`.
  pub fn compare(&self, other: &TagDef) -> Ordering {
    let lhs = self.resolved();
    let rhs = other.resolved();

    for (a, b) in lhs.path.iter().zip(rhs.path.iter()) {
      let ordering = (**a).cmp(&**b);
      if ordering != Ordering::Equal {
        return ordering;
      }
    }
    lhs
        .path
        .len()
        .cmp(&rhs.path.len())
        .then_with(|| lhs.serial.cmp(&rhs.serial))
  }

  /// The tag's constant value, if any.
  pub fn value(&self) -> Option<RcValue> {
    self.resolved().value.get().cloned()
  }

  /// Writes the value cell. Fails if the tag already has a value; tag values never change after
  /// load.
  pub fn set_value(&self, value: RcValue) -> Result<(), RcValue> {
    self.value.set(value)
  }

  pub fn parent(&self) -> Option<RcTag> {
    self.parent.as_ref().and_then(Weak::upgrade)
  }

  /// Distance from the root of the forest this tag lives in.
  #[inline(always)]
  pub fn depth(&self) -> usize {
    self.path.len() - 1
  }

  #[inline(always)]
  pub fn path(&self) -> &[IString] {
    &self.path
  }

  /// The dotted rendering of the path.
  pub fn path_string(&self) -> String {
    join_string(self.path.iter(), ".")
  }

  #[inline(always)]
  pub fn is_fail_kind(&self) -> bool {
    self.fail_kind
  }

  /// Base children (the defining module's view).
  pub fn base_children(&self) -> Vec<RcTag> {
    self.resolved().children.borrow().clone()
  }

  /// True iff `self` is `ancestor` or transitively descends from it.
  pub fn descends_from(&self, ancestor: &TagDef) -> bool {
    let ancestor_serial = ancestor.resolved().serial;
    if self.resolved().serial == ancestor_serial {
      return true;
    }

    let mut cursor = self.resolved().parent();
    while let Some(tag) = cursor {
      if tag.resolved().serial == ancestor_serial {
        return true;
      }
      cursor = tag.resolved().parent();
    }
    false
  }

  // endregion

  #[cfg(test)]
  pub(crate) fn fail_root_for_tests() -> RcTag {
    TagDef::fail_root(0, ModuleId(0))
  }
}

impl Display for TagDef {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "#{}", self.path_string())
  }
}

impl Debug for TagDef {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    Display::fmt(self, f)
  }
}


/// Children added to an imported tag by an extending module.
#[derive(Clone)]
pub struct TagExtension {
  pub target:   RcTag,
  pub children: Vec<RcTag>,
}

/// A module's view of the tag forest: base children merged with the extension deltas visible
/// from that module (its own extensions plus those of its transitive imports).
pub struct TagView<'a> {
  extensions: Vec<&'a TagExtension>,
}

impl<'a> TagView<'a> {
  pub fn new(extensions: Vec<&'a TagExtension>) -> TagView<'a> {
    TagView { extensions }
  }

  /// Base children plus visible extension children, definition order.
  pub fn children(&self, tag: &RcTag) -> Vec<RcTag> {
    let resolved = tag.resolved();
    let mut children = resolved.base_children();
    for extension in self.extensions.iter() {
      if extension.target.same(resolved) {
        children.extend(extension.children.iter().cloned());
      }
    }
    children
  }

  /// All tags strictly below `tag` in this view, pre-order.
  pub fn descendants(&self, tag: &RcTag) -> Vec<RcTag> {
    let mut result = Vec::new();
    self.collect_descendants(tag, &mut result);
    result
  }

  fn collect_descendants(&self, tag: &RcTag, out: &mut Vec<RcTag>) {
    for child in self.children(tag) {
      out.push(child.clone());
      self.collect_descendants(&child, out);
    }
  }

  /// The first tag in pre-order traversal under `root` (inclusive) whose value equals `value`.
  /// Collisions resolve first-defined-wins.
  pub fn find_by_value(&self, root: &RcTag, value: &Value) -> Option<RcTag> {
    if let Some(tag_value) = root.value() {
      if *tag_value == *value {
        return Some(root.clone());
      }
    }
    for child in self.children(root) {
      if let Some(found) = self.find_by_value(&child, value) {
        return Some(found);
      }
    }
    None
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  fn empty_view() -> TagView<'static> {
    TagView::new(Vec::new())
  }

  fn sample_forest() -> (RcTag, RcTag, RcTag, RcTag) {
    let module = ModuleId(0);
    let root = TagDef::root("color", 0, module, false);
    let warm = TagDef::child(&root, "warm", 1, module, false);
    let red = TagDef::child(&warm, "red", 2, module, false);
    let cool = TagDef::child(&root, "cool", 3, module, false);
    (root, warm, red, cool)
  }

  #[test]
  fn ancestry_and_depth() {
    let (root, warm, red, cool) = sample_forest();

    assert!(red.descends_from(&warm));
    assert!(red.descends_from(&root));
    assert!(red.descends_from(&red));
    assert!(!warm.descends_from(&red));
    assert!(!cool.descends_from(&warm));

    assert_eq!(root.depth(), 0);
    assert_eq!(warm.depth(), 1);
    assert_eq!(red.depth(), 2);
    assert_eq!(red.path_string(), "color.warm.red");
  }

  #[test]
  fn ordering_is_parent_first() {
    let (root, warm, red, cool) = sample_forest();

    assert_eq!(root.compare(&warm), Ordering::Less);
    assert_eq!(warm.compare(&red), Ordering::Less);
    // "cool" < "warm" lexicographically.
    assert_eq!(cool.compare(&warm), Ordering::Less);
    assert_eq!(red.compare(&red), Ordering::Equal);
  }

  #[test]
  fn alias_compares_equal_to_target() {
    let (_root, warm, _red, _cool) = sample_forest();
    let other = TagDef::alias("toasty", &warm, 10, ModuleId(1), false);

    assert!(other.same(&warm));
    assert!(warm.same(&other));
    assert_eq!(other.compare(&warm), Ordering::Equal);

    // Values flow through the alias.
    warm.set_value(Value::number(1.0)).unwrap();
    assert_eq!(other.value(), Some(Value::number(1.0)));
  }

  #[test]
  fn find_by_value_is_preorder_first_defined_wins() {
    let (root, warm, red, cool) = sample_forest();
    warm.set_value(Value::number(7.0)).unwrap();
    // Same value deeper and later in pre-order; the earlier definition wins.
    red.set_value(Value::number(7.0)).unwrap();
    cool.set_value(Value::number(9.0)).unwrap();

    let view = empty_view();
    let found = view.find_by_value(&root, &Value::Number(7.0.into())).unwrap();
    assert!(found.same(&warm));

    let found = view.find_by_value(&root, &Value::Number(9.0.into())).unwrap();
    assert!(found.same(&cool));

    assert!(view.find_by_value(&root, &Value::Number(11.0.into())).is_none());
  }

  #[test]
  fn extensions_are_visible_only_through_the_view() {
    let (root, warm, _red, _cool) = sample_forest();
    let extender = ModuleId(1);

    let amber = TagDef::extension_child(&warm, "amber", 20, extender, false);
    let extension = TagExtension { target: warm.clone(), children: vec![amber.clone()] };

    // The defining module's view has no extension deltas.
    let base_view = empty_view();
    assert_eq!(base_view.children(&warm).len(), 1);

    // The extender's view sees the merged children; ancestry works regardless of view.
    let extended_view = TagView::new(vec![&extension]);
    assert_eq!(extended_view.children(&warm).len(), 2);
    assert!(amber.descends_from(&root));

    let descendants = extended_view.descendants(&root);
    assert!(descendants.iter().any(|t| t.same(&amber)));
  }

  #[test]
  fn value_cell_writes_once() {
    let (root, ..) = sample_forest();
    assert!(root.set_value(Value::boolean(true)).is_ok());
    assert!(root.set_value(Value::boolean(false)).is_err());
    assert_eq!(root.value(), Some(Value::boolean(true)));
  }

  #[test]
  fn fail_kind_propagates_to_descendants() {
    let fail = TagDef::fail_root(0, ModuleId(0));
    let kind = TagDef::child(&fail, "shape-mismatch", 1, ModuleId(0), false);
    let user = TagDef::child(&fail, "user", 2, ModuleId(0), false);
    let specific = TagDef::child(&user, "io", 3, ModuleId(0), false);

    assert!(fail.is_fail_kind());
    assert!(kind.is_fail_kind());
    assert!(specific.is_fail_kind());

    let unrelated = TagDef::root("color", 4, ModuleId(0), false);
    assert!(!unrelated.is_fail_kind());
  }
}
