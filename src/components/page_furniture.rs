//! Hides competing page furniture (author sidebars) while the player is shown.

use wasm_bindgen::JsCast;
use web_sys::{window, HtmlElement};

use crate::components::continuity::FurnitureSignal;
use crate::config::page::SIDEBAR_SELECTORS;

/// Attribute remembering an element's inline `display` before we hid it.
const SAVED_DISPLAY_ATTR: &str = "data-miniplayer-display";

fn for_each_sidebar(mut f: impl FnMut(&HtmlElement)) {
    let Some(doc) = window().and_then(|w| w.document()) else {
        return;
    };
    for selector in SIDEBAR_SELECTORS {
        let Ok(nodes) = doc.query_selector_all(selector) else {
            continue;
        };
        for index in 0..nodes.length() {
            if let Some(element) = nodes.item(index).and_then(|n| n.dyn_into::<HtmlElement>().ok()) {
                f(&element);
            }
        }
    }
}

pub fn apply(signal: FurnitureSignal) {
    match signal {
        FurnitureSignal::Suppress => for_each_sidebar(|element| {
            if element.has_attribute(SAVED_DISPLAY_ATTR) {
                return;
            }
            let style = element.style();
            let previous = style.get_property_value("display").unwrap_or_default();
            let _ = element.set_attribute(SAVED_DISPLAY_ATTR, &previous);
            let _ = style.set_property("display", "none");
        }),
        FurnitureSignal::Restore => for_each_sidebar(|element| {
            let Some(previous) = element.get_attribute(SAVED_DISPLAY_ATTR) else {
                return;
            };
            let style = element.style();
            if previous.is_empty() {
                let _ = style.remove_property("display");
            } else {
                let _ = style.set_property("display", &previous);
            }
            let _ = element.remove_attribute(SAVED_DISPLAY_ATTR);
        }),
    }
}
