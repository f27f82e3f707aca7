//! Self-contained walkthrough of actions, a typed store, and the snapshot
//! lifecycle.
//!
//! Run with: `cargo run --example counter`
//!
//! Set `RUST_LOG=alt_flux=debug` to see registrations and lifecycle events.

use alt_flux::{
    ActionContext, ActionKey, ActionsClass, ActionsModel, Alt, Members, Payload, Store,
    StoreModel,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// Counter actions. `step` is a constructor argument.
struct CounterActions {
    step: i64,
}

impl CounterActions {
    fn increment(&self, ctx: &ActionContext, _args: Vec<Value>) -> alt_flux::Result<()> {
        ctx.dispatch(json!(self.step))
    }
}

impl ActionsClass for CounterActions {
    fn describe(members: &mut Members<Self>) {
        members.action("increment", Self::increment).generate(&["set"]);
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Counter {
    value: i64,
}

struct CounterStore {
    increment: ActionKey,
    set: ActionKey,
    state: Counter,
}

impl Store for CounterStore {
    type State = Counter;
    const DISPLAY_NAME: Option<&'static str> = Some("Counter");

    fn state(&self) -> &Counter {
        &self.state
    }

    fn set_state(&mut self, state: Counter) {
        self.state = state;
    }

    fn reduce(&mut self, payload: &Payload) -> bool {
        let Some(n) = payload.data.as_i64() else {
            return false;
        };
        if payload.is(&self.increment) {
            self.state.value += n;
        } else if payload.is(&self.set) {
            self.state.value = n;
        } else {
            return false;
        }
        true
    }

    fn rollback(&mut self) {
        tracing::info!(value = self.state.value, "counter rolled back");
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let alt = Alt::new();
    let actions = alt.create_actions(ActionsModel::class(|| CounterActions { step: 2 }));
    let increment = actions["increment"].key().clone();
    let set = actions["set"].key().clone();

    let counter = alt.create_store(
        StoreModel::class(move || CounterStore {
            increment,
            set,
            state: Counter::default(),
        }),
        None,
    )?;
    counter.listen(|store| {
        if let Ok(state) = store.state::<Counter>() {
            println!("changed: {}", state.value);
        }
    });

    actions["increment"].invoke(vec![])?;
    actions["increment"].invoke(vec![])?;
    let snapshot = alt.take_snapshot(&[])?;
    println!("snapshot = {snapshot}");

    actions["set"].call(json!(40))?;
    alt.rollback()?;
    assert_eq!(counter.state::<Counter>()?.value, 4);

    // Deferred invocations run once the current dispatch has unwound.
    actions["set"].defer(vec![json!(9)])?;
    while counter.state::<Counter>()?.value != 9 {
        tokio::task::yield_now().await;
    }

    let flushed = alt.flush()?;
    println!("flushed = {flushed}");
    assert_eq!(counter.state::<Counter>()?.value, 0);

    alt.bootstrap(&flushed)?;
    assert_eq!(counter.state::<Counter>()?.value, 9);

    // A detached store keeps its state but stops hearing actions.
    assert!(counter.unbind(alt.dispatcher()));
    actions["set"].call(json!(1))?;
    assert_eq!(counter.state::<Counter>()?.value, 9);

    println!("all assertions passed");
    Ok(())
}
