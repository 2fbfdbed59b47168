/*!

The scope and frame machinery. Frames live in an arena with index-based parent links; a frame is
pushed on function or block entry and popped on exit, and popping runs handle cleanup (see
[`handle`](crate::core::handle)).

Each frame owns the scopes an identifier can resolve against:

| scope    | purpose                                        |
|----------|------------------------------------------------|
| input    | value flowing into the current statement       |
| variable | function-local bindings, once-assigned         |
| argument | the function's morphed arguments               |
| context  | flows across the call stack (dynamic scope)    |
| module   | per-module state (held by the module registry) |
| pipe     | the output structure being built               |

Unqualified resolution order is variable → argument → context → module. Variables and arguments
are local: they never leak through `FrameParent::Frame` links. Context is dynamic: reads walk the
parent chain; writes land in the writing frame and revert when it pops.

Blocks capture a [`ScopeSnapshot`]: a flattened, shared-immutable copy of everything visible at
capture time plus the captured purity flag. Invoking a block pushes a frame whose parent is the
snapshot rather than the invoker's frame.

*/

use std::collections::HashMap;
use std::rc::Rc;

use enumflags2::{bitflags, BitFlags};

use crate::{
  abstractions::IString,
  core::{
    handle::HandleId,
    module::ModuleId,
    value::{Field, RcValue},
  },
};

/// Index of a frame in the arena.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub struct FrameId(u32);

impl FrameId {
  #[inline(always)]
  pub fn as_index(self) -> usize {
    self.0 as usize
  }

  #[inline(always)]
  pub(crate) fn from_index(index: usize) -> FrameId {
    FrameId(index as u32)
  }
}

/// Frame evaluation modes. `Pure` is sticky: a child frame is pure if its parent is or if the
/// callee demands it, and it is never weakened. `DisarmBypass` makes failure checks
/// short-circuit to "not a failure".
#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum FrameMode {
  Pure,
  DisarmBypass,
}

pub type FrameModes = BitFlags<FrameMode, u8>;

/// What sits above a frame in the resolution chain.
pub enum FrameParent {
  None,
  Frame(FrameId),
  Snapshot(Rc<ScopeSnapshot>),
}

/// The flattened scope chain a block carries. Never mutated after capture.
pub struct ScopeSnapshot {
  pub variables: HashMap<IString, RcValue>,
  pub arguments: HashMap<IString, RcValue>,
  pub context:   HashMap<IString, RcValue>,
  pub input:     RcValue,
  pub module:    ModuleId,
}

pub struct Frame {
  pub parent:  FrameParent,
  pub module:  ModuleId,
  pub modes:   FrameModes,
  pub input:   RcValue,
  pub(crate) variables: HashMap<IString, RcValue>,
  pub(crate) arguments: HashMap<IString, RcValue>,
  pub(crate) context:   HashMap<IString, RcValue>,
  /// The output structure under construction, in insertion order.
  pub(crate) pipe:      Vec<Field>,
  /// Handles registered to this frame, in registration order. Cleanup runs in reverse.
  pub(crate) handles:   Vec<HandleId>,
}

impl Frame {
  pub fn new(parent: FrameParent, module: ModuleId, modes: FrameModes, input: RcValue) -> Frame {
    Frame {
      parent,
      module,
      modes,
      input,
      variables: HashMap::new(),
      arguments: HashMap::new(),
      context:   HashMap::new(),
      pipe:      Vec::new(),
      handles:   Vec::new(),
    }
  }

  #[inline(always)]
  pub fn is_pure(&self) -> bool {
    self.modes.contains(FrameMode::Pure)
  }

  #[inline(always)]
  pub fn is_disarmed(&self) -> bool {
    self.modes.contains(FrameMode::DisarmBypass)
  }
}


/// A stack of frames. Evaluation is strictly nested, so push/pop is LIFO and indices of live
/// frames are stable.
#[derive(Default)]
pub struct FrameArena {
  frames: Vec<Frame>,
}

impl FrameArena {
  pub fn new() -> FrameArena {
    Self::default()
  }

  pub fn push(&mut self, frame: Frame) -> FrameId {
    self.frames.push(frame);
    FrameId::from_index(self.frames.len() - 1)
  }

  /// Removes and returns the top frame. The caller is responsible for running handle cleanup.
  pub fn pop(&mut self) -> (FrameId, Frame) {
    let frame = self.frames.pop().expect("popped an empty frame arena");
    (FrameId::from_index(self.frames.len()), frame)
  }

  pub fn top(&self) -> FrameId {
    assert!(!self.frames.is_empty(), "no live frames");
    FrameId::from_index(self.frames.len() - 1)
  }

  #[inline(always)]
  pub fn len(&self) -> usize {
    self.frames.len()
  }

  #[inline(always)]
  pub fn get(&self, id: FrameId) -> &Frame {
    &self.frames[id.as_index()]
  }

  #[inline(always)]
  pub fn get_mut(&mut self, id: FrameId) -> &mut Frame {
    &mut self.frames[id.as_index()]
  }

  /// Unqualified lookup: variable → argument → context. Module scope is the runtime's concern
  /// and is consulted after this returns `None`.
  pub fn resolve(&self, frame: FrameId, name: &IString) -> Option<RcValue> {
    let f = self.get(frame);

    if let Some(value) = f.variables.get(name) {
      return Some(value.clone());
    }
    if let FrameParent::Snapshot(snapshot) = &f.parent {
      if let Some(value) = snapshot.variables.get(name) {
        return Some(value.clone());
      }
    }

    if let Some(value) = f.arguments.get(name) {
      return Some(value.clone());
    }
    if let FrameParent::Snapshot(snapshot) = &f.parent {
      if let Some(value) = snapshot.arguments.get(name) {
        return Some(value.clone());
      }
    }

    self.resolve_context(frame, name)
  }

  /// Context lookup walks the frame chain; a snapshot parent terminates the walk with its own
  /// flattened context.
  pub fn resolve_context(&self, frame: FrameId, name: &IString) -> Option<RcValue> {
    let mut cursor = frame;
    loop {
      let f = self.get(cursor);
      if let Some(value) = f.context.get(name) {
        return Some(value.clone());
      }
      match &f.parent {
        FrameParent::Frame(parent) => cursor = *parent,
        FrameParent::Snapshot(snapshot) => return snapshot.context.get(name).cloned(),
        FrameParent::None => return None,
      }
    }
  }

  /// Flattens everything visible from `frame` into a self-contained snapshot for block capture.
  pub fn capture_snapshot(&self, frame: FrameId) -> ScopeSnapshot {
    let f = self.get(frame);

    let mut variables = f.variables.clone();
    let mut arguments = f.arguments.clone();
    if let FrameParent::Snapshot(snapshot) = &f.parent {
      for (name, value) in snapshot.variables.iter() {
        variables.entry(name.clone()).or_insert_with(|| value.clone());
      }
      for (name, value) in snapshot.arguments.iter() {
        arguments.entry(name.clone()).or_insert_with(|| value.clone());
      }
    }

    // Nearest context binding wins.
    let mut context = HashMap::new();
    let mut cursor = frame;
    loop {
      let current = self.get(cursor);
      for (name, value) in current.context.iter() {
        context.entry(name.clone()).or_insert_with(|| value.clone());
      }
      match &current.parent {
        FrameParent::Frame(parent) => cursor = *parent,
        FrameParent::Snapshot(snapshot) => {
          for (name, value) in snapshot.context.iter() {
            context.entry(name.clone()).or_insert_with(|| value.clone());
          }
          break;
        }
        FrameParent::None => break,
      }
    }

    ScopeSnapshot {
      variables,
      arguments,
      context,
      input: f.input.clone(),
      module: f.module,
    }
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::core::value::Value;

  fn name(s: &str) -> IString {
    IString::from(s)
  }

  #[test]
  fn resolution_prefers_variables_over_arguments() {
    let mut arena = FrameArena::new();
    let frame = arena.push(Frame::new(
      FrameParent::None,
      ModuleId(0),
      FrameModes::empty(),
      Value::empty_structure(),
    ));

    let f = arena.get_mut(frame);
    f.arguments.insert(name("x"), Value::number(1.0));
    f.variables.insert(name("x"), Value::number(2.0));

    assert_eq!(arena.resolve(frame, &name("x")), Some(Value::number(2.0)));
  }

  #[test]
  fn variables_do_not_leak_across_call_frames_but_context_does() {
    let mut arena = FrameArena::new();
    let caller = arena.push(Frame::new(
      FrameParent::None,
      ModuleId(0),
      FrameModes::empty(),
      Value::empty_structure(),
    ));
    {
      let f = arena.get_mut(caller);
      f.variables.insert(name("local"), Value::number(1.0));
      f.context.insert(name("request"), Value::string("r1"));
    }

    let callee = arena.push(Frame::new(
      FrameParent::Frame(caller),
      ModuleId(0),
      FrameModes::empty(),
      Value::empty_structure(),
    ));

    assert_eq!(arena.resolve(callee, &name("local")), None);
    assert_eq!(arena.resolve(callee, &name("request")), Some(Value::string("r1")));
  }

  #[test]
  fn nearer_context_shadows_farther() {
    let mut arena = FrameArena::new();
    let outer = arena.push(Frame::new(
      FrameParent::None,
      ModuleId(0),
      FrameModes::empty(),
      Value::empty_structure(),
    ));
    arena.get_mut(outer).context.insert(name("depth"), Value::number(1.0));

    let inner = arena.push(Frame::new(
      FrameParent::Frame(outer),
      ModuleId(0),
      FrameModes::empty(),
      Value::empty_structure(),
    ));
    arena.get_mut(inner).context.insert(name("depth"), Value::number(2.0));

    assert_eq!(arena.resolve_context(inner, &name("depth")), Some(Value::number(2.0)));
    assert_eq!(arena.resolve_context(outer, &name("depth")), Some(Value::number(1.0)));
  }

  #[test]
  fn snapshots_flatten_the_chain_and_cut_it_off() {
    let mut arena = FrameArena::new();
    let outer = arena.push(Frame::new(
      FrameParent::None,
      ModuleId(0),
      FrameModes::empty(),
      Value::empty_structure(),
    ));
    arena.get_mut(outer).context.insert(name("session"), Value::string("s"));

    let middle = arena.push(Frame::new(
      FrameParent::Frame(outer),
      ModuleId(0),
      FrameModes::empty(),
      Value::number(7.0),
    ));
    arena.get_mut(middle).variables.insert(name("v"), Value::number(3.0));

    let snapshot = Rc::new(arena.capture_snapshot(middle));
    assert_eq!(snapshot.variables.get(&name("v")), Some(&Value::number(3.0)));
    assert_eq!(snapshot.context.get(&name("session")), Some(&Value::string("s")));
    assert_eq!(snapshot.input, Value::number(7.0));

    // A frame hung off the snapshot sees the captured values, not the current stack.
    let block_frame = arena.push(Frame::new(
      FrameParent::Snapshot(snapshot),
      ModuleId(0),
      FrameModes::empty(),
      Value::empty_structure(),
    ));
    assert_eq!(arena.resolve(block_frame, &name("v")), Some(Value::number(3.0)));
    assert_eq!(arena.resolve(block_frame, &name("session")), Some(Value::string("s")));
  }

  #[test]
  fn pop_is_lifo() {
    let mut arena = FrameArena::new();
    let a = arena.push(Frame::new(
      FrameParent::None,
      ModuleId(0),
      FrameModes::empty(),
      Value::empty_structure(),
    ));
    let b = arena.push(Frame::new(
      FrameParent::Frame(a),
      ModuleId(0),
      FrameModes::empty(),
      Value::empty_structure(),
    ));

    assert_eq!(arena.top(), b);
    let (popped, _) = arena.pop();
    assert_eq!(popped, b);
    assert_eq!(arena.top(), a);
  }
}
