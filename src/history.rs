use std::ops::{Deref, DerefMut};

/// Append-only snapshot stack. The first entry is never popped.
#[derive(Clone, Debug)]
pub struct UndoHistory<T: Clone> {
    stack: Vec<T>,
    suppressed: bool,
}

impl<T: Clone> UndoHistory<T> {
    pub fn new(initial: T) -> Self {
        Self {
            stack: vec![initial],
            suppressed: false,
        }
    }

    /// Appends a snapshot unless capture is currently suppressed.
    /// Returns whether the snapshot was kept.
    pub fn push_snapshot(&mut self, value: T) -> bool {
        if self.suppressed {
            return false;
        }
        self.stack.push(value);
        true
    }

    pub fn can_undo(&self) -> bool {
        self.stack.len() > 1
    }

    /// Drops the newest snapshot and returns the one that is now current.
    pub fn undo(&mut self) -> Option<T> {
        if !self.can_undo() {
            return None;
        }
        self.stack.pop();
        self.stack.last().cloned()
    }

    pub fn current(&self) -> &T {
        // `stack` is seeded in `new`/`clear_with` and `undo` never pops the last entry.
        &self.stack[self.stack.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed
    }

    pub fn clear_with(&mut self, value: T) {
        self.stack.clear();
        self.stack.push(value);
    }

    /// Disables capture until the returned guard is dropped.
    pub fn suppress(&mut self) -> Suppressed<'_, T> {
        let previous = self.suppressed;
        self.suppressed = true;
        Suppressed {
            history: self,
            previous,
        }
    }
}

/// Capture is off while this guard lives; the previous state comes back on drop.
pub struct Suppressed<'a, T: Clone> {
    history: &'a mut UndoHistory<T>,
    previous: bool,
}

impl<T: Clone> Deref for Suppressed<'_, T> {
    type Target = UndoHistory<T>;

    fn deref(&self) -> &Self::Target {
        self.history
    }
}

impl<T: Clone> DerefMut for Suppressed<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.history
    }
}

impl<T: Clone> Drop for Suppressed<'_, T> {
    fn drop(&mut self) {
        self.history.suppressed = self.previous;
    }
}

#[cfg(test)]
mod tests {
    use super::UndoHistory;

    #[test]
    fn undo_flow() {
        let mut history = UndoHistory::new(vec![1]);
        history.push_snapshot(vec![1, 2]);
        history.push_snapshot(vec![1, 2, 3]);
        assert_eq!(history.len(), 3);

        assert_eq!(history.undo(), Some(vec![1, 2]));
        assert_eq!(history.undo(), Some(vec![1]));
        assert_eq!(history.undo(), None);
        assert_eq!(history.len(), 1);
        assert_eq!(history.current(), &vec![1]);
    }

    #[test]
    fn suppressed_pushes_are_dropped_and_guard_restores_capture() {
        let mut history = UndoHistory::new(0);
        {
            let mut guard = history.suppress();
            assert!(!guard.push_snapshot(1));
            assert!(guard.is_suppressed());
        }
        assert!(!history.is_suppressed());
        assert!(history.push_snapshot(2));
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn guard_is_released_on_early_return() {
        fn restore(history: &mut UndoHistory<u8>) -> Result<(), &'static str> {
            let _guard = history.suppress();
            Err("corrupt snapshot")
        }

        let mut history = UndoHistory::new(0u8);
        assert!(restore(&mut history).is_err());
        assert!(!history.is_suppressed());
    }

    #[test]
    fn clear_with_reseeds() {
        let mut history = UndoHistory::new("a");
        history.push_snapshot("b");
        history.clear_with("c");
        assert_eq!(history.len(), 1);
        assert!(!history.can_undo());
        assert_eq!(*history.current(), "c");
    }
}
