//! Clock-PRO eviction policy for one cache shard.
//!
//! Entries live on a circular clock list in one of three states:
//!
//! - **Hot** — resident, recently useful.
//! - **Cold** — resident, on probation.
//! - **Test** — non-resident ghost; remembers a recently evicted key
//!   so a quick re-reference can adapt the cold/hot balance.
//!
//! A hit sets the entry's reference bit and touches nothing else, so
//! the common path does no list surgery under the shard lock. Under
//! capacity pressure the cold hand promotes referenced cold entries
//! and demotes unreferenced ones to test ghosts (releasing their
//! payload); the hot hand demotes stale hot entries back to cold; the
//! test hand expires ghosts. Re-referencing a ghost before expiry
//! enlarges `cold_target`, expiring a ghost shrinks it — the adaptive
//! feedback loop of the Clock-PRO design.
//!
//! All accounting is in bytes. `cold_target` starts at 1% of the
//! shard capacity.

use std::collections::HashMap;

use super::{CacheError, CacheKey, CacheValue};

const NIL: usize = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Hot,
    Cold,
    Test,
}

struct Slot {
    key: CacheKey,
    /// Payload; `None` for test ghosts.
    value: Option<CacheValue>,
    /// Byte charge (payload length); ghosts keep their former charge.
    charge: usize,
    status: Status,
    referenced: bool,
    next: usize,
    prev: usize,
}

/// One shard's Clock-PRO state. Callers hold the shard mutex.
pub(crate) struct ClockPro {
    capacity: usize,
    cold_target: usize,
    map: HashMap<CacheKey, usize>,
    slots: Vec<Slot>,
    free: Vec<usize>,
    hand_hot: usize,
    hand_cold: usize,
    hand_test: usize,
    count_hot: usize,
    count_cold: usize,
    count_test: usize,
}

impl ClockPro {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            cold_target: (capacity / 100).max(1),
            map: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            hand_hot: NIL,
            hand_cold: NIL,
            hand_test: NIL,
            count_hot: 0,
            count_cold: 0,
            count_test: 0,
        }
    }

    /// Bytes of resident (hot + cold) payload.
    pub(crate) fn resident_bytes(&self) -> usize {
        self.count_hot + self.count_cold
    }

    /// Looks up `key`, setting the reference bit on a resident hit.
    pub(crate) fn get(&mut self, key: &CacheKey) -> Option<CacheValue> {
        let idx = *self.map.get(key)?;
        let slot = &mut self.slots[idx];
        let value = slot.value.clone()?;
        slot.referenced = true;
        Some(value)
    }

    /// Inserts or refreshes `key`.
    pub(crate) fn set(&mut self, key: CacheKey, value: CacheValue) -> Result<(), CacheError> {
        let charge = value.len();
        if charge > self.capacity {
            return Err(CacheError::Full);
        }

        if let Some(&idx) = self.map.get(&key) {
            if self.slots[idx].value.is_some() {
                // Resident update: swap the payload, adjust the bucket.
                let old = self.slots[idx].charge;
                match self.slots[idx].status {
                    Status::Hot => self.count_hot = self.count_hot - old + charge,
                    Status::Cold => self.count_cold = self.count_cold - old + charge,
                    Status::Test => {}
                }
                let slot = &mut self.slots[idx];
                slot.value = Some(value);
                slot.charge = charge;
                slot.referenced = true;
                self.evict_for(0);
                return Ok(());
            }

            // Test ghost hit: the entry proved useful after eviction,
            // so cold pages deserve more room. Re-admit as hot.
            let old = self.slots[idx].charge;
            self.cold_target = (self.cold_target + old).min(self.capacity);
            self.meta_del(idx);
            self.evict_for(charge);
            self.meta_add(key, Some(value), charge, Status::Hot);
            return Ok(());
        }

        // First touch: admit as cold.
        self.evict_for(charge);
        self.meta_add(key, Some(value), charge, Status::Cold);
        Ok(())
    }

    /// Removes every entry whose key matches `pred` (ghosts included).
    pub(crate) fn evict_matching(&mut self, pred: impl Fn(&CacheKey) -> bool) {
        let victims: Vec<usize> = self
            .map
            .iter()
            .filter(|(k, _)| pred(k))
            .map(|(_, &idx)| idx)
            .collect();
        for idx in victims {
            self.meta_del(idx);
        }
    }

    // --------------------------------------------------------------------------------------------
    // Hands
    // --------------------------------------------------------------------------------------------

    fn evict_for(&mut self, incoming: usize) {
        // Fuel bounds the walk so a degenerate state cannot spin.
        let mut fuel = self.slots.len() * 8 + 16;
        while self.count_hot + self.count_cold + incoming > self.capacity && fuel > 0 {
            if self.count_cold + self.count_hot == 0 {
                break;
            }
            self.run_hand_cold();
            fuel -= 1;
        }
    }

    fn run_hand_cold(&mut self) {
        if self.count_cold == 0 {
            // No probation pages; demote one hot page to create one.
            self.run_hand_hot();
            if self.count_cold == 0 {
                return;
            }
        }
        let Some(idx) = self.advance_to(self.hand_cold, Status::Cold) else {
            return;
        };

        let charge = self.slots[idx].charge;
        if self.slots[idx].referenced {
            // A cold page touched during its probation graduates.
            self.slots[idx].referenced = false;
            self.slots[idx].status = Status::Hot;
            self.count_cold -= charge;
            self.count_hot += charge;
        } else {
            // Release the payload, keep a ghost for the test period.
            self.slots[idx].value = None;
            self.slots[idx].status = Status::Test;
            self.count_cold -= charge;
            self.count_test += charge;
            let mut fuel = self.slots.len() + 4;
            while self.count_test > self.capacity && fuel > 0 {
                self.run_hand_test();
                fuel -= 1;
            }
        }
        self.hand_cold = self.slots[idx].next;

        let hot_bound = self.capacity.saturating_sub(self.cold_target);
        let mut fuel = self.slots.len() * 2 + 4;
        while self.count_hot > hot_bound && fuel > 0 {
            self.run_hand_hot();
            fuel -= 1;
        }
    }

    fn run_hand_hot(&mut self) {
        if self.count_hot == 0 {
            return;
        }
        let Some(idx) = self.advance_to(self.hand_hot, Status::Hot) else {
            return;
        };
        if self.slots[idx].referenced {
            self.slots[idx].referenced = false;
        } else {
            let charge = self.slots[idx].charge;
            self.slots[idx].status = Status::Cold;
            self.count_hot -= charge;
            self.count_cold += charge;
        }
        self.hand_hot = self.slots[idx].next;
    }

    fn run_hand_test(&mut self) {
        if self.count_test == 0 {
            return;
        }
        let Some(idx) = self.advance_to(self.hand_test, Status::Test) else {
            return;
        };
        // An expired ghost was never re-referenced: cold pages were
        // getting more room than they earned.
        let charge = self.slots[idx].charge;
        self.cold_target = self.cold_target.saturating_sub(charge).max(1);
        self.hand_test = self.slots[idx].next;
        self.meta_del(idx);
    }

    /// Walks the clock from `start` to the first slot in `status`.
    /// Returns `None` when the list is empty or has no such slot.
    fn advance_to(&self, start: usize, status: Status) -> Option<usize> {
        if start == NIL {
            return None;
        }
        let mut idx = start;
        for _ in 0..self.map.len() + 1 {
            if self.slots[idx].status == status {
                return Some(idx);
            }
            idx = self.slots[idx].next;
        }
        None
    }

    // --------------------------------------------------------------------------------------------
    // List maintenance
    // --------------------------------------------------------------------------------------------

    fn meta_add(&mut self, key: CacheKey, value: Option<CacheValue>, charge: usize, status: Status) {
        let idx = if let Some(idx) = self.free.pop() {
            self.slots[idx] = Slot {
                key,
                value,
                charge,
                status,
                referenced: false,
                next: NIL,
                prev: NIL,
            };
            idx
        } else {
            self.slots.push(Slot {
                key,
                value,
                charge,
                status,
                referenced: false,
                next: NIL,
                prev: NIL,
            });
            self.slots.len() - 1
        };

        if self.hand_hot == NIL {
            self.slots[idx].next = idx;
            self.slots[idx].prev = idx;
            self.hand_hot = idx;
            self.hand_cold = idx;
            self.hand_test = idx;
        } else {
            // Insert behind the hot hand: the freshest clock position.
            let head = self.hand_hot;
            let tail = self.slots[head].prev;
            self.slots[idx].next = head;
            self.slots[idx].prev = tail;
            self.slots[tail].next = idx;
            self.slots[head].prev = idx;
        }

        match status {
            Status::Hot => self.count_hot += charge,
            Status::Cold => self.count_cold += charge,
            Status::Test => self.count_test += charge,
        }
        self.map.insert(key, idx);
    }

    fn meta_del(&mut self, idx: usize) {
        let charge = self.slots[idx].charge;
        match self.slots[idx].status {
            Status::Hot => self.count_hot -= charge,
            Status::Cold => self.count_cold -= charge,
            Status::Test => self.count_test -= charge,
        }
        self.map.remove(&self.slots[idx].key);

        let next = self.slots[idx].next;
        let prev = self.slots[idx].prev;
        if next == idx {
            self.hand_hot = NIL;
            self.hand_cold = NIL;
            self.hand_test = NIL;
        } else {
            self.slots[prev].next = next;
            self.slots[next].prev = prev;
            if self.hand_hot == idx {
                self.hand_hot = next;
            }
            if self.hand_cold == idx {
                self.hand_cold = next;
            }
            if self.hand_test == idx {
                self.hand_test = next;
            }
        }

        self.slots[idx].value = None;
        self.slots[idx].next = NIL;
        self.slots[idx].prev = NIL;
        self.free.push(idx);
    }
}
