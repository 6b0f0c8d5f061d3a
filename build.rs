// build.rs - Build script for waywire
// Generates the core protocol bindings and the test protocol bindings

use std::env;
use std::path::{Path, PathBuf};

use waywire_scanner::Generator;

fn main() {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());

    let core = manifest_dir.join("protocols").join("wayland-core.xml");
    let calculator = manifest_dir
        .join("tests")
        .join("protocols")
        .join("calculator.xml");

    // wl_display, wl_registry and wl_callback, compiled into the runtime itself
    generate(&core, "crate", &out_dir.join("wayland_core.rs"));

    // Test protocol, once for the unit tests and once for the integration tests
    generate(&calculator, "crate", &out_dir.join("calculator_unit.rs"));
    generate(&calculator, "waywire", &out_dir.join("calculator.rs"));
}

fn generate(input: &Path, runtime: &str, output: &Path) {
    println!("cargo:rerun-if-changed={}", input.display());

    let protocols = match waywire_scanner::load_files(&[input]) {
        Ok(protocols) => protocols,
        Err(e) => panic!("Failed to load {}: {}", input.display(), e),
    };
    if let Err(e) = Generator::new()
        .runtime_path(runtime)
        .write_to_file(&protocols, output)
    {
        panic!("Failed to generate {}: {}", output.display(), e);
    }
}
