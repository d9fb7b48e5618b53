//! Two-slot rotation for double buffering.

/// Two slots, one of which is current.
///
/// `swap` is the only way to change which slot is current; the other slot is
/// always the one submitted on the previous call.
#[derive(Debug)]
pub struct SlotPair<T> {
    slots: [T; 2],
    current: usize,
}

impl<T> SlotPair<T> {
    pub fn new(first: T, second: T) -> Self {
        Self {
            slots: [first, second],
            current: 0,
        }
    }

    /// Build both slots, passing each its index.
    pub fn try_from_fn<E>(mut make: impl FnMut(usize) -> Result<T, E>) -> Result<Self, E> {
        let first = make(0)?;
        let second = make(1)?;
        Ok(Self::new(first, second))
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn other_index(&self) -> usize {
        self.current ^ 1
    }

    pub fn current(&self) -> &T {
        &self.slots[self.current]
    }

    pub fn other(&self) -> &T {
        &self.slots[self.current ^ 1]
    }

    /// Mutable access to (current, other).
    pub fn split_mut(&mut self) -> (&mut T, &mut T) {
        let [first, second] = &mut self.slots;
        if self.current == 0 {
            (first, second)
        } else {
            (second, first)
        }
    }

    pub fn swap(&mut self) {
        self.current ^= 1;
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_alternates() {
        let mut pair = SlotPair::new("a", "b");
        assert_eq!((*pair.current(), *pair.other()), ("a", "b"));
        pair.swap();
        assert_eq!(pair.current_index(), 1);
        assert_eq!(pair.other_index(), 0);
        assert_eq!((*pair.current(), *pair.other()), ("b", "a"));
        pair.swap();
        assert_eq!(*pair.current(), "a");
    }

    #[test]
    fn test_split_mut_follows_current() {
        let mut pair = SlotPair::new(0, 0);
        pair.swap();
        let (current, other) = pair.split_mut();
        *current = 1;
        *other = 2;
        assert_eq!(pair.iter().copied().collect::<Vec<_>>(), vec![2, 1]);
    }

    #[test]
    fn test_try_from_fn_passes_index() {
        let pair = SlotPair::try_from_fn(|i| Ok::<_, ()>(i * 10)).unwrap();
        assert_eq!(pair.iter().copied().collect::<Vec<_>>(), vec![0, 10]);
        assert!(SlotPair::<usize>::try_from_fn(|i| if i == 1 { Err("no") } else { Ok(i) }).is_err());
    }
}
