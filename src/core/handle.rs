/*!

The handle lifecycle subsystem. A handle is a runtime reference to an external resource with
guaranteed cleanup. The core never inspects the payload; it only tracks which frames reference
the handle and runs the definition's cleanup hook exactly once: either at explicit release or
when the last referencing frame pops.

## Registration protocol

Whenever a value is assigned into a scope slot of frame `F`, every handle in `value.handles()`
has `F` added to its frame set and is appended to `F`'s registration list. Registration is O(k)
in the number of distinct handles in the value.

## Cleanup protocol

When `F` pops, each registered handle loses `F` from its frame set; a handle whose frame set
empties and which is not yet released runs its cleanup hook and becomes released. Handles
released in the same pop clean up in reverse registration order (LIFO).

A released handle no longer matches any handle-shape constraint, which turns use-after-release
into a dispatch-time failure, and its payload is gone (taken by the cleanup hook).

*/

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::{Debug, Display, Formatter};
use std::rc::Rc;

use crate::{
  abstractions::{IString, NatSet},
  core::{
    eval::Runtime,
    frame::{Frame, FrameId},
    module::ModuleId,
    value::{RcValue, Value},
  },
  debug,
};

/// Index of a handle instance in the arena.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub struct HandleId(u32);

impl HandleId {
  #[inline(always)]
  pub fn as_index(self) -> usize {
    self.0 as usize
  }

  #[inline(always)]
  pub fn from_index(index: usize) -> HandleId {
    HandleId(index as u32)
  }
}

/// The cleanup hook of a handle definition. Receives the instance's payload.
pub type CleanupFn = Rc<dyn Fn(Box<dyn Any>)>;

pub type RcHandleDef = Rc<HandleDef>;

/// A named kind of external resource: `(qualified path, cleanup hook, defining module, private?)`.
pub struct HandleDef {
  pub name:    IString,
  path:        Vec<IString>,
  /// Runtime-wide definition order; identity.
  pub serial:  u32,
  pub module:  ModuleId,
  pub private: bool,
  /// Settable until the defining module finishes loading; a no-op hook by default.
  cleanup:     RefCell<CleanupFn>,
}

impl HandleDef {
  pub fn new(name: impl Into<IString>, serial: u32, module: ModuleId, private: bool) -> HandleDef {
    let name = name.into();
    HandleDef {
      path: vec![name.clone()],
      name,
      serial,
      module,
      private,
      cleanup: RefCell::new(Rc::new(|_payload| {})),
    }
  }

  #[inline(always)]
  pub fn same(&self, other: &HandleDef) -> bool {
    self.serial == other.serial
  }

  /// Handle-type depth, the specificity contribution in morph scoring.
  #[inline(always)]
  pub fn depth(&self) -> u32 {
    self.path.len() as u32
  }

  pub fn set_cleanup(&self, hook: CleanupFn) {
    *self.cleanup.borrow_mut() = hook;
  }

  pub fn cleanup(&self) -> CleanupFn {
    self.cleanup.borrow().clone()
  }
}

impl Display for HandleDef {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "@{}", self.name)
  }
}

impl Debug for HandleDef {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    Display::fmt(self, f)
  }
}


/// A live external resource: the definition, an opaque payload, the set of frames referencing
/// it, the released flag, and private data visible only to non-pure code.
pub struct HandleInstance {
  pub definition: RcHandleDef,
  payload:        Option<Box<dyn Any>>,
  pub frames:     NatSet,
  pub released:   bool,
  private_data:   HashMap<IString, RcValue>,
}

impl HandleInstance {
  pub fn new(definition: RcHandleDef, payload: Box<dyn Any>) -> HandleInstance {
    HandleInstance {
      definition,
      payload: Some(payload),
      frames: NatSet::new(),
      released: false,
      private_data: HashMap::new(),
    }
  }

  #[inline(always)]
  pub fn is_released(&self) -> bool {
    self.released
  }

  /// The opaque payload, gone once the handle is released.
  pub fn payload(&self) -> Option<&dyn Any> {
    self.payload.as_deref()
  }

  pub(crate) fn take_payload(&mut self) -> Option<Box<dyn Any>> {
    self.payload.take()
  }
}


#[derive(Default)]
pub struct HandleArena {
  instances: Vec<HandleInstance>,
}

impl HandleArena {
  pub fn new() -> HandleArena {
    Self::default()
  }

  pub fn allocate(&mut self, instance: HandleInstance) -> HandleId {
    self.instances.push(instance);
    HandleId::from_index(self.instances.len() - 1)
  }

  #[inline(always)]
  pub fn get(&self, id: HandleId) -> &HandleInstance {
    &self.instances[id.as_index()]
  }

  #[inline(always)]
  pub fn get_mut(&mut self, id: HandleId) -> &mut HandleInstance {
    &mut self.instances[id.as_index()]
  }

  #[inline(always)]
  pub fn len(&self) -> usize {
    self.instances.len()
  }
}


// The lifecycle operations need the frame arena and the handle arena together, so they live on
// the runtime.
impl Runtime {
  /// The registration protocol: `frame` takes a reference to every handle reachable through
  /// `value`.
  pub(crate) fn register_value(&mut self, frame: FrameId, value: &RcValue) {
    let reachable = value.handles();
    for index in reachable.iter() {
      let id = HandleId::from_index(index);
      let instance = self.handles.get_mut(id);
      if instance.released {
        continue;
      }
      if instance.frames.insert(frame.as_index()) {
        self.frames.get_mut(frame).handles.push(id);
      }
    }
  }

  /// The acquire intrinsic. Allocates an instance owned by `frame` and returns the wrapping
  /// handle reference. Must run in a non-pure frame.
  pub fn acquire_handle(
    &mut self,
    frame: FrameId,
    definition: &RcHandleDef,
    payload: Box<dyn Any>,
  ) -> RcValue {
    if self.frames.get(frame).is_pure() {
      return self
          .builtins
          .kinds
          .purity_violation_value("cannot acquire a handle inside a pure frame");
    }

    let id = self.handles.allocate(HandleInstance::new(definition.clone(), payload));
    self.handles.get_mut(id).frames.insert(frame.as_index());
    self.frames.get_mut(frame).handles.push(id);
    debug!(2, "acquired {} as handle {}", definition, id.as_index());
    Value::handle(id)
  }

  /// Explicit release: detaches the handle from every frame and runs the cleanup hook exactly
  /// once. Non-pure only.
  pub fn release_handle(&mut self, frame: FrameId, handle: &RcValue) -> RcValue {
    if self.frames.get(frame).is_pure() {
      return self
          .builtins
          .kinds
          .purity_violation_value("cannot release a handle inside a pure frame");
    }
    let Some(id) = handle.as_handle() else {
      return self
          .builtins
          .kinds
          .shape_mismatch_value("release expects a handle reference");
    };

    let instance = self.handles.get_mut(id);
    if instance.released {
      return self
          .builtins
          .kinds
          .released_handle_value("handle was already released");
    }
    instance.released = true;
    instance.frames.clear();
    let payload = instance.take_payload();
    let hook = instance.definition.cleanup();
    debug!(2, "released handle {} explicitly", id.as_index());
    if let Some(payload) = payload {
      hook(payload);
    }
    Value::empty_structure()
  }

  /// Pops the top frame and runs the cleanup protocol over its registered handles, in reverse
  /// registration order.
  pub(crate) fn pop_frame(&mut self, expected: FrameId) -> Frame {
    let (id, frame) = self.frames.pop();
    debug_assert_eq!(id, expected, "frame pop out of order");

    for &handle_id in frame.handles.iter().rev() {
      let instance = self.handles.get_mut(handle_id);
      instance.frames.remove(id.as_index());
      if instance.frames.is_empty() && !instance.released {
        instance.released = true;
        let payload = instance.take_payload();
        let hook = instance.definition.cleanup();
        debug!(2, "handle {} cleaned up at frame {} exit", handle_id.as_index(), id.as_index());
        if let Some(payload) = payload {
          hook(payload);
        }
      }
    }
    frame
  }

  /// Reads a key of the handle's private data. Pure frames may not see private data.
  pub fn handle_private_get(&mut self, frame: FrameId, handle: &RcValue, key: &IString) -> RcValue {
    if self.frames.get(frame).is_pure() {
      return self
          .builtins
          .kinds
          .purity_violation_value("cannot read handle private data inside a pure frame");
    }
    let Some(id) = handle.as_handle() else {
      return self
          .builtins
          .kinds
          .shape_mismatch_value("private data access expects a handle reference");
    };
    let instance = self.handles.get(id);
    if instance.released {
      return self.builtins.kinds.released_handle_value("handle was released");
    }
    match instance.private_data.get(key) {
      Some(value) => value.clone(),
      None => self
          .builtins
          .kinds
          .missing_field_value(&format!("no private data under {:?}", &**key)),
    }
  }

  /// Writes a key of the handle's private data. Non-pure only.
  pub fn handle_private_set(
    &mut self,
    frame: FrameId,
    handle: &RcValue,
    key: IString,
    value: RcValue,
  ) -> RcValue {
    if self.frames.get(frame).is_pure() {
      return self
          .builtins
          .kinds
          .purity_violation_value("cannot write handle private data inside a pure frame");
    }
    let Some(id) = handle.as_handle() else {
      return self
          .builtins
          .kinds
          .shape_mismatch_value("private data access expects a handle reference");
    };
    if self.handles.get(id).released {
      return self.builtins.kinds.released_handle_value("handle was released");
    }
    self.register_value(frame, &value);
    self.handles.get_mut(id).private_data.insert(key, value);
    Value::empty_structure()
  }
}
