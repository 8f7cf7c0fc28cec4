//! Commonly imported items.
//!
//! ```
//! use dsqdata::prelude::*;
//! ```

pub use crate::alphabet::Alphabet;
pub use crate::chunk::{Chunk, SeqRef};
pub use crate::error::{Error, Result};
pub use crate::reader::{DsqDataReader, DsqDataReaderBuilder};
