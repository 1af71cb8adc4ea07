use dioxus::logger::tracing::Level;
use dioxus::prelude::*;

use miniplayer::components::PlayerRoot;

fn main() {
    let level = if cfg!(debug_assertions) {
        Level::DEBUG
    } else {
        Level::INFO
    };
    if let Err(e) = dioxus::logger::init(level) {
        eprintln!("logger init failed: {e}");
    }
    dioxus::launch(App);
}

#[component]
fn App() -> Element {
    rsx! {
        document::Meta { name: "theme-color", content: "#10b981" }
        PlayerRoot {}
    }
}
