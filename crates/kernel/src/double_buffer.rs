//! Ping-pong storage with explicit "current" and "scratch" roles.
//!
//! A pass reads `current` and writes `scratch`; `flip` then exchanges the
//! roles without moving any data. The CPU backend holds `Vec`s in it, the GPU
//! backend holds `wgpu::Buffer`s and picks bind groups by [`PingPong::parity`].

/// Two slots of `T`, one readable as "current", the other writable as "scratch".
#[derive(Debug, Clone)]
pub struct PingPong<T> {
    slots: [T; 2],
    current: usize,
}

impl<T> PingPong<T> {
    /// Start with `current` as the current slot.
    pub fn new(current: T, scratch: T) -> Self {
        Self {
            slots: [current, scratch],
            current: 0,
        }
    }

    /// Slot holding the latest data.
    pub fn current(&self) -> &T {
        &self.slots[self.current]
    }

    /// Mutable access to the current slot.
    pub fn current_mut(&mut self) -> &mut T {
        &mut self.slots[self.current]
    }

    /// Slot that the next pass writes into.
    pub fn scratch(&self) -> &T {
        &self.slots[1 - self.current]
    }

    /// Borrow current for reading and scratch for writing at the same time.
    pub fn split(&mut self) -> (&T, &mut T) {
        let [a, b] = &mut self.slots;
        if self.current == 0 {
            (&*a, b)
        } else {
            (&*b, a)
        }
    }

    /// Exchange roles: scratch becomes current.
    pub fn flip(&mut self) {
        self.current = 1 - self.current;
    }

    /// Index of the current slot (0 or 1).
    pub fn parity(&self) -> usize {
        self.current
    }

    /// Both slots in storage order, independent of roles.
    pub fn slots(&self) -> &[T; 2] {
        &self.slots
    }
}

impl<T: Clone> PingPong<T> {
    /// Both slots start as copies of `value`.
    pub fn filled(value: T) -> Self {
        Self::new(value.clone(), value)
    }
}
