//! Per-key population locks.
//!
//! Cache wrappers take the flight lock for their key before re-checking a
//! miss and populating it, so concurrent misses in one process run the
//! populate callback once. Separate processes sharing a distributed backend
//! are not coordinated.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Registry of per-key mutexes, shared by every wrapper built from a store.
#[derive(Debug, Default)]
pub struct FlightRegistry {
    flights: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the flight lock for `key`.
    ///
    /// Calls for the same key are serialized; calls for different keys run
    /// concurrently. Not reentrant for the same key.
    pub fn run<R>(&self, key: &str, f: impl FnOnce() -> R) -> R {
        let flight = {
            let mut flights = self
                .flights
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            Arc::clone(flights.entry(key.to_string()).or_default())
        };

        let result = {
            let _guard = flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            f()
        };

        self.release(key, &flight);
        result
    }

    /// Number of keys with a flight in progress or waiting.
    pub fn in_flight(&self) -> usize {
        self.flights
            .lock()
            .map(|flights| flights.len())
            .unwrap_or_default()
    }

    fn release(&self, key: &str, flight: &Arc<Mutex<()>>) {
        let mut flights = self
            .flights
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Only the map and this caller hold it: nobody else is waiting.
        if Arc::strong_count(flight) == 2 {
            flights.remove(key);
        }
    }
}
