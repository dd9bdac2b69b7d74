//! # Ambit Codec
//!
//! ## Purpose
//!
//! The narrow contract between the actor runtime and the language's value
//! model:
//!
//! - [`Envelope`]: opaque payload + description + optional destination actor
//! - [`Passable`] / [`Resolvable`]: the explicit hook pair a value uses to
//!   leave its actor (copy, proxy, or refuse) and to come back to life
//!
//! ## What This Crate Does NOT Contain
//! - Transport or membership logic (belongs in `network`)
//! - Scheduling, far references or discovery (belongs in `messaging-actors`)
//!
//! ## Architecture Role
//!
//! ```text
//! libs/types → [codec] → network/ → actors/
//!     ↑           ↓
//! Identities   Envelopes
//! Type tags    Passing hooks
//! ```

pub mod envelope;
pub mod error;
pub mod passing;

pub use envelope::Envelope;
pub use error::{CodecError, Result};
pub use passing::{pass_by_copy, resolve_by_copy, Passable, Resolvable};
