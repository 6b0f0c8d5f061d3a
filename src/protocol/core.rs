//! Core interfaces: `wl_display`, `wl_registry` and `wl_callback`
//!
//! Generated at build time from `protocols/wayland-core.xml`. These are the
//! only interfaces the connection engine needs to know about.

include!(concat!(env!("OUT_DIR"), "/wayland_core.rs"));
