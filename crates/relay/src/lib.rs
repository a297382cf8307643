pub mod reader;

pub use reader::{ModuleReader, PostUpdate, RelayError, TunerUpdate};
