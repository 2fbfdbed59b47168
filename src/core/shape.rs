/*!

Shape definitions. A shape is a structural schema: an ordered sequence of fields, each with an
optional name, an optional type constraint, an optional default, pure predicate checks, and a
cardinality. Shapes are the targets of morphs (see [`morph`](crate::core::morph)) and the
declared input/argument types of function overloads.

Like tags, shapes are materialized while their module loads and are immutable thereafter.

*/

use std::fmt::{Display, Formatter};
use std::rc::Rc;

use crate::{
  abstractions::{join_string, IString},
  api::ast::{Cardinality, Expr},
  core::{
    handle::RcHandleDef,
    module::ModuleId,
    tag::RcTag,
  },
};

pub type RcShape = Rc<ShapeDef>;

pub struct ShapeDef {
  /// Inline shapes are anonymous.
  pub name:          Option<IString>,
  pub fields:        Vec<ShapeField>,
  /// Extra source fields survive even a Strong morph when this is set (the `**` marker).
  pub accept_extras: bool,
  pub module:        ModuleId,
  pub private:       bool,
}

impl ShapeDef {
  /// The empty, extras-accepting shape: morphs anything unchanged. The built-in `any`.
  pub fn accept_anything(name: Option<IString>, module: ModuleId) -> ShapeDef {
    ShapeDef {
      name,
      fields: Vec::new(),
      accept_extras: true,
      module,
      private: false,
    }
  }
}

impl Display for ShapeDef {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    if let Some(name) = &self.name {
      write!(f, "{}", name)
    } else {
      write!(f, "{{{}}}", join_string(self.fields.iter(), ", "))
    }
  }
}


pub struct ShapeField {
  pub name:          Option<IString>,
  pub constraint:    Option<TypeConstraint>,
  /// Evaluated lazily in the surrounding scope chain when the field stays unbound.
  pub default:       Option<Rc<Expr>>,
  /// Satisfied by mere presence; the bound value is not constraint-checked.
  pub presence_only: bool,
  /// Pure predicates run against the bound value after type binding.
  pub checks:        Vec<Rc<Expr>>,
  pub cardinality:   Cardinality,
}

impl ShapeField {
  pub fn unconstrained(name: Option<IString>) -> ShapeField {
    ShapeField {
      name,
      constraint:    None,
      default:       None,
      presence_only: false,
      checks:        Vec::new(),
      cardinality:   Cardinality::One,
    }
  }
}

impl Display for ShapeField {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match (&self.name, &self.constraint) {
      (Some(name), Some(constraint)) => write!(f, "{}: {}", name, constraint),
      (Some(name), None) => write!(f, "{}", name),
      (None, Some(constraint)) => write!(f, "{}", constraint),
      (None, None) => write!(f, "_"),
    }
  }
}


/// A resolved type constraint on a shape field.
pub enum TypeConstraint {
  Any,
  Number,
  String,
  Boolean,
  BlockValue,
  FunctionValue,
  /// The value must be a tag reference descending from (or equal to) this tag.
  Tag(RcTag),
  /// The value must be an unreleased handle of this definition.
  Handle(RcHandleDef),
  /// The value must morph against this shape; the morphed value is bound.
  Shape(RcShape),
}

impl TypeConstraint {
  /// The specificity contribution of a successful match: tag-hierarchy depth for tags,
  /// handle-type depth for handles, zero otherwise.
  pub fn depth(&self) -> u32 {
    match self {
      TypeConstraint::Tag(tag) => tag.depth() as u32 + 1,
      TypeConstraint::Handle(def) => def.depth(),
      _ => 0,
    }
  }
}

impl Display for TypeConstraint {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      TypeConstraint::Any           => write!(f, "any"),
      TypeConstraint::Number        => write!(f, "number"),
      TypeConstraint::String        => write!(f, "string"),
      TypeConstraint::Boolean       => write!(f, "bool"),
      TypeConstraint::BlockValue    => write!(f, "block"),
      TypeConstraint::FunctionValue => write!(f, "function"),
      TypeConstraint::Tag(tag)      => write!(f, "{}", tag),
      TypeConstraint::Handle(def)   => write!(f, "@{}", def.name),
      TypeConstraint::Shape(shape)  => write!(f, "{}", shape),
    }
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::core::tag::TagDef;

  #[test]
  fn display_renders_fields() {
    let host = ShapeField {
      name:          Some(IString::from("host")),
      constraint:    Some(TypeConstraint::String),
      default:       None,
      presence_only: false,
      checks:        Vec::new(),
      cardinality:   Cardinality::One,
    };
    let shape = ShapeDef {
      name:          None,
      fields:        vec![host, ShapeField::unconstrained(None)],
      accept_extras: false,
      module:        ModuleId(0),
      private:       false,
    };
    assert_eq!(shape.to_string(), "{host: string, _}");
  }

  #[test]
  fn constraint_depth_tracks_tag_depth() {
    let root = TagDef::root("animal", 0, ModuleId(0), false);
    let dog = TagDef::child(&root, "dog", 1, ModuleId(0), false);

    assert_eq!(TypeConstraint::Tag(root).depth(), 1);
    assert_eq!(TypeConstraint::Tag(dog).depth(), 2);
    assert_eq!(TypeConstraint::Number.depth(), 0);
  }
}
