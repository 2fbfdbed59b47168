/*!

Function families. A function name resolves to an ordered family of overloads; each overload
declares an input shape, an argument shape, a strength marker, a purity flag, and a body. The
body is either Comp statements, a single expression, or a native function from the
standard-library bridge.

Dispatch (see [`eval::dispatch`](crate::core::eval)) scores candidates by morphing the call's
input and arguments against each overload's shapes and picks the lexicographic maximum; the
definition serial breaks final ties in favor of the earliest overload.

*/

use std::fmt::{Display, Formatter};
use std::rc::Rc;

use crate::{
  abstractions::IString,
  api::{
    ast::{Expr, Statement},
    native::NativeFunction,
    Strength,
  },
  core::{
    module::ModuleId,
    shape::RcShape,
  },
};

pub type RcOverload = Rc<Overload>;

pub struct Overload {
  pub name:        IString,
  pub module:      ModuleId,
  /// Definition order within the family; the final dispatch tie-break.
  pub serial:      u32,
  pub input_shape: RcShape,
  pub args_shape:  RcShape,
  pub strength:    Strength,
  pub pure:        bool,
  pub private:     bool,
  pub body:        FunctionBody,
}

pub enum FunctionBody {
  Statements(Rc<Vec<Statement>>),
  /// An explicit single-expression body; the function's value is that expression's value.
  Expression(Rc<Expr>),
  Native(Rc<dyn NativeFunction>),
}

impl Display for Overload {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}#{}(input={}, args={})", self.name, self.serial, self.input_shape, self.args_shape)
  }
}


/// The overloads defined under one name in one module, in definition order.
pub struct FunctionFamily {
  pub name:      IString,
  pub overloads: Vec<RcOverload>,
}

impl FunctionFamily {
  pub fn new(name: IString) -> FunctionFamily {
    FunctionFamily { name, overloads: Vec::new() }
  }

  /// The serial the next overload added to this family will get.
  pub fn next_serial(&self) -> u32 {
    self.overloads.len() as u32
  }

  pub fn add(&mut self, overload: Overload) {
    self.overloads.push(Rc::new(overload));
  }
}
