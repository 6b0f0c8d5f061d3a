//! waywire-scanner - protocol compiler for waywire
//!
//! Reads Wayland protocol XML files and generates typed client and server
//! bindings on top of the `waywire` runtime. Meant to be called from a build
//! script:
//!
//! ```no_run
//! let protocols = waywire_scanner::load_files(&["protocols/wayland.xml"]).unwrap();
//! waywire_scanner::Generator::new()
//!     .write_to_file(&protocols, "wayland.rs")
//!     .unwrap();
//! ```

pub mod codegen;
pub mod protocol;

pub use codegen::{GenerationError, Generator};
pub use protocol::{parse_file, parse_str, validate, ParseError, ParseErrorKind, Protocol};

use std::path::Path;

/// Scanner version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Parse every file, then validate the references of the whole set
pub fn load_files<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<Protocol>, ParseError> {
    let protocols = paths
        .iter()
        .map(parse_file)
        .collect::<Result<Vec<_>, _>>()?;
    validate(&protocols)?;
    Ok(protocols)
}
