//! Skein Runtime
//!
//! Executes compiled branching-narrative story bytecode: advances story flow,
//! streams output text, and yields choices at branch points.
//!
//! ```no_run
//! use std::rc::Rc;
//! use skein_runtime::{load, Evaluator, GlueWriter};
//!
//! # fn main() -> skein_runtime::Result<()> {
//! let story = Rc::new(load(std::fs::File::open("story.json")?)?);
//! let mut eval = Evaluator::new(story, 42)?;
//! let mut out = GlueWriter::new();
//! let choices = eval.continue_story(&mut out)?;
//! print!("{}", out.take());
//! # let _ = choices;
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod error;
pub mod evaluator;
pub mod frame;
pub mod glue;
pub mod list;
pub mod loader;
pub mod rng;
pub mod stepper;
pub mod tree;
pub mod value;

pub use address::Address;
pub use error::{Error, Result};
pub use evaluator::{Choice, Evaluator};
pub use glue::GlueWriter;
pub use list::{ListDefs, ListValue};
pub use loader::{load, load_str};
pub use tree::{Element, Node, Story};
pub use value::Value;
