// Previous-value tracking across render passes.
// Holds one slot that always reflects the prior observation, never the current one.

/// Tracks the value seen on the previous observation.
///
/// Each pass either calls [`Previous::observe`], or reads with
/// [`Previous::render`] and stores with [`Previous::commit`] once the pass
/// is done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Previous<T> {
    slot: Option<T>,
}

impl<T> Default for Previous<T> {
    fn default() -> Self {
        Self { slot: None }
    }
}

impl<T> Previous<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the value from the prior observation and store `value` for the next one.
    pub fn observe(&mut self, value: T) -> Option<T> {
        self.slot.replace(value)
    }

    /// Value stored by the last commit, without touching the slot.
    pub fn render(&self) -> Option<&T> {
        self.slot.as_ref()
    }

    /// Store `value` for the next pass.
    pub fn commit(&mut self, value: T) {
        self.slot = Some(value);
    }

    /// Forget the stored value.
    pub fn reset(&mut self) {
        self.slot = None;
    }
}

impl<T: PartialEq> Previous<T> {
    /// Observe `value` and report whether it differs from the prior observation.
    /// The first observation always counts as a change.
    pub fn changed(&mut self, value: T) -> bool {
        match self.slot.as_ref() {
            Some(prev) if *prev == value => false,
            _ => {
                self.slot = Some(value);
                true
            }
        }
    }
}

impl Previous<bool> {
    /// True only when `value` is true and the prior observation was not.
    pub fn rising_edge(&mut self, value: bool) -> bool {
        let prev = self.observe(value).unwrap_or(false);
        value && !prev
    }
}

/// Pure form of [`Previous::observe`]: returns `(returned_value, new_state)`.
pub fn update<T>(state: Option<T>, value: T) -> (Option<T>, Option<T>) {
    (state, Some(value))
}
