//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::io;
use std::sync::Arc;

use alt_flux::{ActionKey, Payload, Store};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Clone, Default)]
struct Sink(Arc<Mutex<Vec<u8>>>);

impl io::Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Run `f` and return its result along with every warning it logged.
pub fn with_warnings<R>(f: impl FnOnce() -> R) -> (R, String) {
    let sink = Sink::default();
    let writer = sink.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let result = tracing::subscriber::with_default(subscriber, f);
    let logs = String::from_utf8_lossy(&sink.0.lock()).into_owned();
    (result, logs)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tally {
    pub count: i64,
    pub history: Vec<i64>,
}

/// Adds every `add` payload to its count.
pub struct TallyStore {
    pub add: ActionKey,
    pub state: Tally,
}

impl Store for TallyStore {
    type State = Tally;
    const DISPLAY_NAME: Option<&'static str> = Some("Tally");

    fn state(&self) -> &Tally {
        &self.state
    }

    fn set_state(&mut self, state: Tally) {
        self.state = state;
    }

    fn reduce(&mut self, payload: &Payload) -> bool {
        if !payload.is(&self.add) {
            return false;
        }
        let Some(n) = payload.data.as_i64() else {
            return false;
        };
        self.state.count += n;
        self.state.history.push(n);
        true
    }
}
