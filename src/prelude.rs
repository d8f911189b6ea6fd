//! Imported via `use crate::prelude::*` by basically all modules.

pub(crate) use anyhow::{Context as _, Result, anyhow, bail};
pub(crate) use tracing::{trace, debug, info, warn, error};
