use crate::{
    config::clamp_name,
    error::{Result, ThreadError},
    sync::{Arc, Mutex},
};
use tracing::error;

#[derive(Debug)]
struct Slot<T> {
    used: bool,
    name: String,
    value: Option<Arc<T>>,
}

#[derive(Debug)]
struct SlotTable<T> {
    slots: Vec<Slot<T>>,
    /// Where the next allocation starts scanning: the last slot handed out or
    /// freed.
    hint: usize,
    in_use: usize,
}

/// Fixed-capacity pool addressed by slot index.
///
/// Indices stay valid for the lifetime of the pool; released slots are reused
/// but the table never grows or shrinks.
#[derive(Debug)]
pub struct SlotPool<T> {
    kind: &'static str,
    table: Mutex<SlotTable<T>>,
}

impl<T> SlotPool<T> {
    pub fn new(kind: &'static str, capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| Slot {
                used: false,
                name: String::new(),
                value: None,
            })
            .collect();
        Self {
            kind,
            table: Mutex::new(SlotTable {
                slots,
                hint: 0,
                in_use: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.table.lock().slots.len()
    }

    pub fn in_use(&self) -> usize {
        self.table.lock().in_use
    }

    /// Places `value` in the first free slot at or after the hint, wrapping to
    /// the start once.
    pub fn allocate(&self, name: &str, value: T) -> Result<usize> {
        let mut table = self.table.lock();
        let capacity = table.slots.len();
        let start = table.hint.min(capacity);

        let found = (start..capacity)
            .chain(0..start)
            .find(|&i| !table.slots[i].used);
        let Some(index) = found else {
            error!(pool = self.kind, capacity, "pool exhausted");
            return Err(ThreadError::Exhausted { capacity });
        };

        let slot = &mut table.slots[index];
        slot.used = true;
        slot.name = clamp_name(name);
        slot.value = Some(Arc::new(value));
        table.hint = index;
        table.in_use += 1;
        Ok(index)
    }

    pub fn get(&self, index: usize) -> Result<Arc<T>> {
        let table = self.table.lock();
        match table.slots.get(index) {
            Some(Slot {
                used: true,
                value: Some(value),
                ..
            }) => Ok(value.clone()),
            _ => Err(ThreadError::InvalidArgs("unallocated pool index")),
        }
    }

    pub fn name_of(&self, index: usize) -> Result<String> {
        let table = self.table.lock();
        match table.slots.get(index) {
            Some(slot) if slot.used => Ok(slot.name.clone()),
            _ => Err(ThreadError::InvalidArgs("unallocated pool index")),
        }
    }

    /// Frees `index` if `check` accepts its value. The check runs under the
    /// table lock, so no new user can look the slot up meanwhile.
    pub fn release_if(&self, index: usize, check: impl FnOnce(&T) -> Result<()>) -> Result<()> {
        let mut table = self.table.lock();
        let slot = match table.slots.get_mut(index) {
            Some(slot) if slot.used => slot,
            _ => return Err(ThreadError::InvalidArgs("unallocated pool index")),
        };
        if let Some(value) = &slot.value {
            check(value)?;
        }
        slot.used = false;
        slot.name.clear();
        slot.value = None;
        table.hint = index;
        table.in_use -= 1;
        Ok(())
    }
}
