//! Tracks whether the visitor has interacted with the page this session.
//!
//! Browsers refuse unsolicited audio until the page has seen a click, touch
//! or key press. The flag is mirrored into the session slot so it survives
//! navigations within the tab.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::{debug, warn};

use crate::config::storage::GESTURE_KEY;
use crate::db::KeyValueStore;

/// DOM events that count as a qualifying gesture.
pub const GESTURE_EVENTS: &[&str] = &["click", "touchstart", "keydown", "mousedown"];

pub struct GestureTracker {
    granted: Cell<bool>,
    armed: Cell<bool>,
    store: Option<Rc<dyn KeyValueStore>>,
    on_first: RefCell<Vec<Box<dyn FnOnce()>>>,
    detach: RefCell<Vec<Box<dyn FnOnce()>>>,
}

impl GestureTracker {
    pub fn new(store: Option<Rc<dyn KeyValueStore>>) -> Rc<Self> {
        Rc::new(Self {
            granted: Cell::new(false),
            armed: Cell::new(false),
            store,
            on_first: RefCell::new(Vec::new()),
            detach: RefCell::new(Vec::new()),
        })
    }

    pub fn has_gesture(&self) -> bool {
        if self.granted.get() {
            return true;
        }
        let stored = self
            .store
            .as_ref()
            .and_then(|store| store.get(GESTURE_KEY).ok().flatten())
            .is_some_and(|value| value == "true");
        if stored {
            self.granted.set(true);
        }
        stored
    }

    /// Record a gesture. Returns `true` only for the first one; later calls
    /// are no-ops.
    pub fn record_gesture(&self) -> bool {
        if self.granted.replace(true) {
            return false;
        }
        if let Some(store) = &self.store {
            if let Err(e) = store.set(GESTURE_KEY, "true") {
                warn!(error = %e, "failed to persist gesture flag");
            }
        }
        debug!("first user gesture recorded");
        let detach = std::mem::take(&mut *self.detach.borrow_mut());
        for remove in detach {
            remove();
        }
        let callbacks = std::mem::take(&mut *self.on_first.borrow_mut());
        for callback in callbacks {
            callback();
        }
        true
    }

    /// Run `callback` once, on the first gesture. Dropped if a gesture was
    /// already granted.
    pub fn on_first_gesture(&self, callback: impl FnOnce() + 'static) {
        if self.has_gesture() {
            return;
        }
        self.on_first.borrow_mut().push(Box::new(callback));
    }

    /// Register cleanup for the gesture listeners, run on the first gesture.
    #[cfg_attr(not(target_arch = "wasm32"), allow(dead_code))]
    fn on_detach(&self, remove: impl FnOnce() + 'static) {
        if self.granted.get() {
            remove();
            return;
        }
        self.detach.borrow_mut().push(Box::new(remove));
    }

    /// Claim the right to attach DOM listeners. `false` when already armed
    /// or when no gesture is needed anymore.
    #[cfg_attr(not(target_arch = "wasm32"), allow(dead_code))]
    fn claim_arming(&self) -> bool {
        !self.has_gesture() && !self.armed.replace(true)
    }

    /// Attach document listeners for the first gesture. All of them are
    /// removed as soon as any gesture is recorded.
    #[cfg(target_arch = "wasm32")]
    pub fn arm_listeners(self: &Rc<Self>, on_first_gesture: impl FnOnce() + 'static) {
        use wasm_bindgen::{closure::Closure, JsCast};
        use web_sys::{window, AddEventListenerOptions};

        if !self.claim_arming() {
            return;
        }
        self.on_first_gesture(on_first_gesture);

        let Some(doc) = window().and_then(|w| w.document()) else {
            return;
        };
        let options = AddEventListenerOptions::new();
        options.set_once(true);
        options.set_passive(true);

        let mut listeners = Vec::with_capacity(GESTURE_EVENTS.len());
        for event in GESTURE_EVENTS {
            let tracker = Rc::clone(self);
            let callback = Closure::wrap(Box::new(move || {
                tracker.record_gesture();
            }) as Box<dyn FnMut()>);
            let _ = doc.add_event_listener_with_callback_and_add_event_listener_options(
                event,
                callback.as_ref().unchecked_ref(),
                &options,
            );
            listeners.push((*event, callback));
        }

        self.on_detach(move || {
            for (event, callback) in &listeners {
                let _ = doc
                    .remove_event_listener_with_callback(event, callback.as_ref().unchecked_ref());
            }
            // The closures may be mid-call; free them once the handler returns.
            wasm_bindgen_futures::spawn_local(async move { drop(listeners) });
        });
    }
}
