/*!

The standard-library bridge. Each native function implements [`NativeFunction`]:

```ignore
invoke(input: Value, args: Value, ctx) -> Value
```

with declared input and argument shapes and a purity flag, carried by [`NativeSpec`]. Native
functions that acquire handles must be non-pure and must go through the handle lifecycle API on
[`NativeContext`]; the runtime never inspects a handle's payload itself.

*/

use std::any::Any;
use std::rc::Rc;

use crate::{
  abstractions::IString,
  api::{
    ast::ShapeRef,
    Strength,
  },
  core::{
    eval::Runtime,
    frame::FrameId,
    handle::RcHandleDef,
    value::RcValue,
  },
};

pub trait NativeFunction {
  fn invoke(&self, input: RcValue, args: RcValue, ctx: &mut NativeContext) -> RcValue;
}

/// Closures with the right signature are native functions.
impl<F> NativeFunction for F
where
    F: Fn(RcValue, RcValue, &mut NativeContext) -> RcValue,
{
  fn invoke(&self, input: RcValue, args: RcValue, ctx: &mut NativeContext) -> RcValue {
    self(input, args, ctx)
  }
}

/// What a native function sees of the runtime while it runs: the runtime itself and the frame
/// the call is executing in.
pub struct NativeContext<'rt> {
  pub runtime: &'rt mut Runtime,
  pub frame:   FrameId,
}

impl NativeContext<'_> {
  /// Acquire a handle wrapping `payload`. Fails with `purity-violation` inside a pure frame.
  pub fn acquire(&mut self, definition: &RcHandleDef, payload: Box<dyn Any>) -> RcValue {
    self.runtime.acquire_handle(self.frame, definition, payload)
  }

  /// Explicitly release a handle, running its cleanup hook exactly once.
  pub fn release(&mut self, handle: &RcValue) -> RcValue {
    self.runtime.release_handle(self.frame, handle)
  }

  /// Build a `user-<kind>` failure value.
  pub fn fail(&mut self, kind: &str, message: &str) -> RcValue {
    self.runtime.user_failure(kind, message)
  }
}

/// The registration record for one native overload. Registered against a module before that
/// module loads; materialized into its function family during load.
pub struct NativeSpec {
  pub name:        IString,
  pub input_shape: ShapeRef,
  pub args_shape:  ShapeRef,
  pub strength:    Strength,
  pub pure:        bool,
  pub private:     bool,
  pub function:    Rc<dyn NativeFunction>,
}
