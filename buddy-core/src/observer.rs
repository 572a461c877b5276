//! Observer registry for local state flips.

use std::fmt;

/// Handle returned by [`Observers::add`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Callback<T> = Box<dyn Fn(&T) + Send + Sync>;

/// Zero-or-more callbacks interested in a value of type `T`.
pub struct Observers<T> {
    next_id: u64,
    callbacks: Vec<(ObserverId, Callback<T>)>,
}

impl<T> Observers<T> {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            callbacks: Vec::new(),
        }
    }

    pub fn add<F>(&mut self, callback: F) -> ObserverId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        self.callbacks.push((id, Box::new(callback)));
        id
    }

    /// Returns false if `id` was not registered (or already removed).
    pub fn remove(&mut self, id: ObserverId) -> bool {
        let before = self.callbacks.len();
        self.callbacks.retain(|(existing, _)| *existing != id);
        self.callbacks.len() != before
    }

    /// Call every observer in registration order.
    pub fn notify(&self, value: &T) {
        for (_, callback) in &self.callbacks {
            callback(value);
        }
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

impl<T> Default for Observers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Observers<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("count", &self.callbacks.len())
            .finish()
    }
}

/// Whether the buddy is currently speaking (text-to-speech playback).
///
/// Observers fire only when the value actually flips.
#[derive(Debug, Default)]
pub struct SpeakingState {
    speaking: bool,
    observers: Observers<bool>,
}

impl SpeakingState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Returns true if the state changed.
    pub fn set_speaking(&mut self, speaking: bool) -> bool {
        if self.speaking == speaking {
            return false;
        }
        self.speaking = speaking;
        self.observers.notify(&speaking);
        true
    }

    pub fn on_change<F>(&mut self, callback: F) -> ObserverId
    where
        F: Fn(&bool) + Send + Sync + 'static,
    {
        self.observers.add(callback)
    }

    pub fn remove_listener(&mut self, id: ObserverId) -> bool {
        self.observers.remove(id)
    }
}
