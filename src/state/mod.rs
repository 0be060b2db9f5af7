//! Share workflow state
//!
//! This module contains the state value, the closed set of actions, and the
//! pure reducer that ties them together. Side effects live in `share`.

mod action;
mod reducer;
mod share;

pub use action::ShareAction;
pub use reducer::reduce;
pub use share::{ShareOutcome, SharePhase, ShareState};

use crate::store::Store;

/// Store specialised to the share workflow
pub type ShareStore = Store<ShareState, ShareAction>;
