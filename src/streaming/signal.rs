// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Event that stays signalled until explicitly reset; every waiter is released while it is set.
#[derive(Debug, Default)]
pub struct ManualResetEvent {
    signalled: Mutex<bool>,
    condvar: Condvar,
}

impl ManualResetEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        let mut signalled = self.signalled.lock();
        *signalled = true;
        self.condvar.notify_all();
    }

    pub fn reset(&self) {
        *self.signalled.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.signalled.lock()
    }

    pub fn wait(&self) {
        let mut signalled = self.signalled.lock();
        while !*signalled {
            self.condvar.wait(&mut signalled);
        }
    }

    /// Wait until set or `timeout` elapses. Returns whether the event was set.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signalled = self.signalled.lock();
        while !*signalled {
            if self.condvar.wait_until(&mut signalled, deadline).timed_out() {
                return *signalled;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_wait_for_times_out() {
        let event = ManualResetEvent::new();
        assert!(!event.wait_for(Duration::from_millis(10)));
    }

    #[test]
    fn test_set_releases_waiter() {
        let event = Arc::new(ManualResetEvent::new());
        let waiter = {
            let event = Arc::clone(&event);
            thread::spawn(move || event.wait_for(Duration::from_secs(5)))
        };
        event.set();
        assert!(waiter.join().unwrap());
        assert!(event.is_set());

        // Stays set until reset.
        assert!(event.wait_for(Duration::from_millis(1)));
        event.reset();
        assert!(!event.is_set());
    }
}
