/*!

A `NatSet` is a set of (small) natural numbers. The runtime uses them wherever a dense set of
arena indices needs cheap membership, union, and iteration: the handle set cached on every
value, the frame set of a live handle, and the registration set of a frame.

The backing implementation is the [`bit-set` crate](https://crates.io/crates/bit-set).

*/

use std::fmt::{Debug, Display, Formatter};

use bit_set::BitSet;

#[derive(Clone, Default, PartialEq, Eq)]
pub struct NatSet(BitSet);

impl NatSet {
  pub fn new() -> NatSet {
    Self::default()
  }

  /// The set containing only `element`.
  pub fn singleton(element: usize) -> NatSet {
    let mut set = NatSet::new();
    set.insert(element);
    set
  }

  /// Inserts `element`, returning `true` if it was not already present.
  #[inline(always)]
  pub fn insert(&mut self, element: usize) -> bool {
    self.0.insert(element)
  }

  /// Removes `element`, returning `true` if it was present.
  #[inline(always)]
  pub fn remove(&mut self, element: usize) -> bool {
    self.0.remove(element)
  }

  #[inline(always)]
  pub fn contains(&self, element: usize) -> bool {
    self.0.contains(element)
  }

  /// Unions `other` into `self` without allocating a new set.
  #[inline(always)]
  pub fn union_in_place(&mut self, other: &NatSet) {
    self.0.union_with(&other.0);
  }

  #[inline(always)]
  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  #[inline(always)]
  pub fn len(&self) -> usize {
    self.0.len()
  }

  #[inline(always)]
  pub fn clear(&mut self) {
    self.0.clear();
  }

  pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
    self.0.iter()
  }
}

impl FromIterator<usize> for NatSet {
  fn from_iter<T: IntoIterator<Item = usize>>(iter: T) -> Self {
    let mut set = NatSet::new();
    for element in iter {
      set.insert(element);
    }
    set
  }
}

impl Display for NatSet {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "{{")?;
    for (count, element) in self.iter().enumerate() {
      if count > 0 {
        write!(f, ", ")?;
      }
      write!(f, "{}", element)?;
    }
    write!(f, "}}")
  }
}

impl Debug for NatSet {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    Display::fmt(self, f)
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn insert_and_membership() {
    let mut set = NatSet::new();
    assert!(set.insert(3));
    assert!(set.insert(7));
    assert!(!set.insert(3));

    assert!(set.contains(3));
    assert!(set.contains(7));
    assert!(!set.contains(4));
    assert_eq!(set.len(), 2);
  }

  #[test]
  fn union_in_place_test() {
    let mut lhs = NatSet::from_iter([1usize, 2, 3]);
    let rhs = NatSet::from_iter([3usize, 4]);
    lhs.union_in_place(&rhs);

    assert_eq!(lhs, NatSet::from_iter([1usize, 2, 3, 4]));
  }

  #[test]
  fn remove_until_empty() {
    let mut set = NatSet::singleton(5);
    assert!(!set.is_empty());
    assert!(set.remove(5));
    assert!(!set.remove(5));
    assert!(set.is_empty());
  }

  #[test]
  fn display_test() {
    let set = NatSet::from_iter([0usize, 2, 9]);
    assert_eq!(set.to_string(), "{0, 2, 9}");
  }
}
