//! Last-write-wins parameter maps handed between threads.

use crate::module::ParamId;
use parking_lot::Mutex;
use std::collections::HashMap;

/// One writer, one drainer. Draining swaps the map out so the lock is held
/// only for the swap.
#[derive(Debug, Default)]
pub struct ParameterMailbox {
    values: Mutex<HashMap<ParamId, f64>>,
}

impl ParameterMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&self, id: ParamId, value: f64) {
        self.values.lock().insert(id, value);
    }

    pub fn post_all(&self, values: impl IntoIterator<Item = (ParamId, f64)>) {
        let mut map = self.values.lock();
        for (id, value) in values {
            map.insert(id, value);
        }
    }

    /// Take every entry, leaving the mailbox empty.
    pub fn drain(&self) -> HashMap<ParamId, f64> {
        std::mem::take(&mut *self.values.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }

    pub fn clear(&self) {
        self.values.lock().clear();
    }
}
